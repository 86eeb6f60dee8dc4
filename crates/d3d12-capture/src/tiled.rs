//! Software model of reserved (tiled) resource bindings.
//!
//! Every tile of a reserved resource is either unbound or bound to one tile of a heap.
//! [`ReservedResource::update`] applies an `UpdateTileMappings` call to that table with the
//! API's defaulting rules, and the per-heap [`TileMapping`]s are re-derived from the table so
//! that re-issuing them reproduces the bindings exactly.

use std::collections::BTreeMap;

use bitflags::bitflags;
use tracing::debug;

use crate::barrier::ResourceStates;
use crate::error::TileMappingError;
use crate::id::ResourceId;
use crate::resource::{ClearValue, ResourceDesc};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TiledResourceCoordinate {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub subresource: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TileRegionSize {
    pub num_tiles: u32,
    pub use_box: bool,
    pub width: u32,
    pub height: u16,
    pub depth: u16,
}

impl TileRegionSize {
    pub fn single_tile() -> Self {
        Self::linear(1)
    }

    /// A region of `num_tiles` consecutive tiles in resource tile order.
    pub fn linear(num_tiles: u32) -> Self {
        Self {
            num_tiles,
            use_box: false,
            width: num_tiles,
            height: 1,
            depth: 1,
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TileRangeFlags: u32 {
        const NULL = 0x1;
        const SKIP = 0x2;
        const REUSE_SINGLE_TILE = 0x4;
    }
}

impl TileRangeFlags {
    /// Direct mapping of consecutive heap tiles.
    pub const NONE: TileRangeFlags = TileRangeFlags::empty();
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TileMappingFlags: u32 {
        const NO_HAZARD = 0x1;
    }
}

impl TileMappingFlags {
    pub const NONE: TileMappingFlags = TileMappingFlags::empty();
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileShape {
    pub width_in_texels: u32,
    pub height_in_texels: u32,
    pub depth_in_texels: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubresourceTiling {
    pub width_in_tiles: u32,
    pub height_in_tiles: u16,
    pub depth_in_tiles: u16,
    /// [`SubresourceTiling::PACKED`] for mips stored in the packed tail.
    pub start_tile_index_in_overall_resource: u32,
}

impl SubresourceTiling {
    pub const PACKED: u32 = u32::MAX;

    fn is_packed(&self) -> bool {
        self.start_tile_index_in_overall_resource == Self::PACKED
    }

    fn num_tiles(&self) -> u64 {
        u64::from(self.width_in_tiles)
            * u64::from(self.height_in_tiles)
            * u64::from(self.depth_in_tiles)
    }
}

/// Tiling layout reported by the driver for a reserved resource.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceTiling {
    pub num_tiles: u32,
    pub tile_shape: TileShape,
    pub subresources: Vec<SubresourceTiling>,
    pub num_packed_tiles: u32,
    pub start_tile_index_of_packed_mips: u32,
}

impl ResourceTiling {
    /// Layout of a single-subresource resource without a packed tail.
    pub fn simple(width_in_tiles: u32, height_in_tiles: u16, depth_in_tiles: u16, tile_shape: TileShape) -> Self {
        let sub = SubresourceTiling {
            width_in_tiles,
            height_in_tiles,
            depth_in_tiles,
            start_tile_index_in_overall_resource: 0,
        };
        Self {
            num_tiles: sub.num_tiles() as u32,
            tile_shape,
            subresources: vec![sub],
            num_packed_tiles: 0,
            start_tile_index_of_packed_mips: 0,
        }
    }

    /// Overall-resource tile index of `c`.
    pub fn tile_index(&self, c: TiledResourceCoordinate) -> Result<u32, TileMappingError> {
        let sub = self
            .subresources
            .get(c.subresource as usize)
            .ok_or(TileMappingError::InvalidSubresource(c.subresource))?;
        let out_of_bounds = || TileMappingError::CoordinateOutOfBounds {
            x: c.x,
            y: c.y,
            z: c.z,
            subresource: c.subresource,
        };

        if sub.is_packed() {
            // packed mips are addressed by tile offset into the packed tail
            if c.y != 0 || c.z != 0 || c.x >= self.num_packed_tiles {
                return Err(out_of_bounds());
            }
            return Ok(self.start_tile_index_of_packed_mips + c.x);
        }

        if c.x >= sub.width_in_tiles
            || c.y >= u32::from(sub.height_in_tiles)
            || c.z >= u32::from(sub.depth_in_tiles)
        {
            return Err(out_of_bounds());
        }

        let w = sub.width_in_tiles;
        let h = u32::from(sub.height_in_tiles);
        Ok(sub.start_tile_index_in_overall_resource + c.x + c.y * w + c.z * w * h)
    }

    /// Inverse of [`ResourceTiling::tile_index`].
    pub fn coordinate(&self, tile: u32) -> Option<TiledResourceCoordinate> {
        let packed_end = u64::from(self.start_tile_index_of_packed_mips) + u64::from(self.num_packed_tiles);
        for (i, sub) in self.subresources.iter().enumerate() {
            let subresource = i as u32;
            if sub.is_packed() {
                if tile >= self.start_tile_index_of_packed_mips && u64::from(tile) < packed_end {
                    return Some(TiledResourceCoordinate {
                        x: tile - self.start_tile_index_of_packed_mips,
                        y: 0,
                        z: 0,
                        subresource,
                    });
                }
                continue;
            }

            let start = sub.start_tile_index_in_overall_resource;
            if tile < start || u64::from(tile - start) >= sub.num_tiles() {
                continue;
            }
            let rem = tile - start;
            let w = sub.width_in_tiles;
            let h = u32::from(sub.height_in_tiles);
            return Some(TiledResourceCoordinate {
                x: rem % w,
                y: (rem / w) % h,
                z: rem / (w * h),
                subresource,
            });
        }
        None
    }
}

/// Binding of one resource tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileBinding {
    pub heap: ResourceId,
    pub heap_tile: u32,
}

/// Arguments of one `UpdateTileMappings` call. `None` arrays are the API's null pointers.
#[derive(Clone, Copy, Debug, Default)]
pub struct TileMappingUpdate<'a> {
    pub num_resource_regions: u32,
    pub region_start_coordinates: Option<&'a [TiledResourceCoordinate]>,
    pub region_sizes: Option<&'a [TileRegionSize]>,
    pub heap: Option<ResourceId>,
    pub num_ranges: u32,
    pub range_flags: Option<&'a [TileRangeFlags]>,
    pub heap_range_start_offsets: Option<&'a [u32]>,
    pub range_tile_counts: Option<&'a [u32]>,
    pub flags: TileMappingFlags,
}

/// The regions of a reserved resource bound to one heap, as parallel per-field arrays.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TileMapping {
    pub region_start_coordinates: Vec<TiledResourceCoordinate>,
    pub region_sizes: Vec<TileRegionSize>,
    pub range_flags: Vec<TileRangeFlags>,
    pub heap_range_start_offsets: Vec<u32>,
    pub range_tile_counts: Vec<u32>,
    pub flags: TileMappingFlags,
}

impl TileMapping {
    /// The update call that re-establishes this mapping on `heap`.
    pub fn as_update(&self, heap: ResourceId) -> TileMappingUpdate<'_> {
        TileMappingUpdate {
            num_resource_regions: self.region_start_coordinates.len() as u32,
            region_start_coordinates: Some(&self.region_start_coordinates),
            region_sizes: Some(&self.region_sizes),
            heap: Some(heap),
            num_ranges: self.range_flags.len() as u32,
            range_flags: Some(&self.range_flags),
            heap_range_start_offsets: Some(&self.heap_range_start_offsets),
            range_tile_counts: Some(&self.range_tile_counts),
            flags: self.flags,
        }
    }

    pub fn num_tiles(&self) -> u64 {
        self.range_tile_counts.iter().map(|&n| u64::from(n)).sum()
    }
}

fn require<'a, T>(
    name: &'static str,
    array: &'a [T],
    expected: u32,
) -> Result<&'a [T], TileMappingError> {
    array
        .get(..expected as usize)
        .ok_or(TileMappingError::ArrayTooShort {
            name,
            expected,
            found: array.len(),
        })
}

/// Current binding state of a reserved resource.
#[derive(Clone, Debug)]
pub struct ReservedResource {
    desc: ResourceDesc,
    tiling: ResourceTiling,
    state: ResourceStates,
    clear_value: Option<ClearValue>,
    bindings: Vec<Option<TileBinding>>,
    mappings: BTreeMap<ResourceId, TileMapping>,
}

impl ReservedResource {
    pub fn new(
        desc: ResourceDesc,
        tiling: ResourceTiling,
        state: ResourceStates,
        clear_value: Option<ClearValue>,
    ) -> Self {
        let bindings = vec![None; tiling.num_tiles as usize];
        Self {
            desc,
            tiling,
            state,
            clear_value,
            bindings,
            mappings: BTreeMap::new(),
        }
    }

    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    pub fn tiling(&self) -> &ResourceTiling {
        &self.tiling
    }

    pub fn state(&self) -> ResourceStates {
        self.state
    }

    pub fn set_state(&mut self, state: ResourceStates) {
        self.state = state;
    }

    pub fn clear_value(&self) -> Option<&ClearValue> {
        self.clear_value.as_ref()
    }

    /// Binding of every resource tile, in overall tile order.
    pub fn bindings(&self) -> &[Option<TileBinding>] {
        &self.bindings
    }

    pub fn binding(&self, tile: u32) -> Option<TileBinding> {
        self.bindings.get(tile as usize).copied().flatten()
    }

    /// Mapping currently in force for `heap`, re-issuable through [`TileMapping::as_update`].
    pub fn mapping_for_heap(&self, heap: ResourceId) -> Option<&TileMapping> {
        self.mappings.get(&heap)
    }

    pub fn mappings(&self) -> impl Iterator<Item = (ResourceId, &TileMapping)> {
        self.mappings.iter().map(|(&heap, m)| (heap, m))
    }

    /// Heaps that back at least one tile.
    pub fn bound_heaps(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.mappings.keys().copied()
    }

    pub fn heap_bindings_count(&self) -> usize {
        self.mappings.len()
    }

    /// Apply one `UpdateTileMappings` call.
    ///
    /// The call is validated in full before any binding changes, so a rejected update leaves
    /// the resource untouched.
    pub fn update(&mut self, u: &TileMappingUpdate<'_>) -> Result<(), TileMappingError> {
        let Some(heap) = u.heap else {
            debug!(heaps = self.mappings.len(), "null heap, unmapping every tile");
            self.bindings.fill(None);
            self.mappings.clear();
            return Ok(());
        };

        let tiles = self.region_tiles(u)?;
        let n = u.num_ranges;

        let flags = match u.range_flags {
            Some(flags) => require("range_flags", flags, n)?.to_vec(),
            None => vec![TileRangeFlags::NONE; n as usize],
        };
        for f in &flags {
            if f.bits().count_ones() > 1 || !TileRangeFlags::all().contains(*f) {
                return Err(TileMappingError::InvalidRangeFlags(f.bits()));
            }
        }

        let counts = match u.range_tile_counts {
            Some(counts) => require("range_tile_counts", counts, n)?.to_vec(),
            None if n == 1 => vec![tiles.len() as u32],
            None if n == 0 => Vec::new(),
            None => return Err(TileMappingError::MissingRangeTileCounts),
        };

        let needs_offsets = flags
            .iter()
            .any(|f| !f.intersects(TileRangeFlags::NULL | TileRangeFlags::SKIP));
        let offsets = match u.heap_range_start_offsets {
            Some(offsets) => require("heap_range_start_offsets", offsets, n)?.to_vec(),
            None if needs_offsets => return Err(TileMappingError::MissingHeapRangeStartOffsets),
            None => vec![0; n as usize],
        };

        let ranges: u64 = counts.iter().map(|&c| u64::from(c)).sum();
        if ranges != tiles.len() as u64 {
            return Err(TileMappingError::TileCountMismatch {
                regions: tiles.len() as u64,
                ranges,
            });
        }

        for ((flag, &count), &offset) in flags.iter().zip(&counts).zip(&offsets) {
            if *flag == TileRangeFlags::NONE
                && count > 0
                && offset.checked_add(count - 1).is_none()
            {
                return Err(TileMappingError::HeapRangeOverflow {
                    offset,
                    num_tiles: count,
                });
            }
        }

        let mut cursor = 0usize;
        for ((flag, &count), &offset) in flags.iter().zip(&counts).zip(&offsets) {
            for (k, &tile) in tiles[cursor..cursor + count as usize].iter().enumerate() {
                let slot = &mut self.bindings[tile as usize];
                if *flag == TileRangeFlags::NONE {
                    *slot = Some(TileBinding {
                        heap,
                        heap_tile: offset + k as u32,
                    });
                } else if flag.contains(TileRangeFlags::REUSE_SINGLE_TILE) {
                    *slot = Some(TileBinding {
                        heap,
                        heap_tile: offset,
                    });
                } else if flag.contains(TileRangeFlags::NULL) {
                    *slot = None;
                }
                // SKIP leaves the tile as it was
            }
            cursor += count as usize;
        }

        self.rebuild_mappings(u.flags);
        debug!(%heap, tiles = tiles.len(), ranges = n, heaps = self.mappings.len(), "applied tile mapping update");
        Ok(())
    }

    /// Expand the update's regions to overall tile indices, in region order.
    fn region_tiles(&self, u: &TileMappingUpdate<'_>) -> Result<Vec<u32>, TileMappingError> {
        let n = u.num_resource_regions;
        let mut tiles = Vec::new();

        match u.region_start_coordinates {
            None => {
                if n > 1 {
                    return Err(TileMappingError::MissingStartCoordinates);
                }
                if n == 1 {
                    match u.region_sizes {
                        // no coordinates and no sizes covers the whole resource
                        None => tiles.extend(0..self.tiling.num_tiles),
                        Some(sizes) => {
                            let size = require("region_sizes", sizes, 1)?[0];
                            self.expand_region(TiledResourceCoordinate::default(), size, &mut tiles)?;
                        }
                    }
                }
            }
            Some(coords) => {
                let coords = require("region_start_coordinates", coords, n)?;
                let sizes = match u.region_sizes {
                    Some(sizes) => Some(require("region_sizes", sizes, n)?),
                    None => None,
                };
                for (i, &start) in coords.iter().enumerate() {
                    let size = sizes.map_or_else(TileRegionSize::single_tile, |s| s[i]);
                    self.expand_region(start, size, &mut tiles)?;
                }
            }
        }

        Ok(tiles)
    }

    fn expand_region(
        &self,
        start: TiledResourceCoordinate,
        size: TileRegionSize,
        out: &mut Vec<u32>,
    ) -> Result<(), TileMappingError> {
        if size.use_box {
            let volume = u64::from(size.width) * u64::from(size.height) * u64::from(size.depth);
            if volume != u64::from(size.num_tiles) {
                return Err(TileMappingError::BoxSizeMismatch {
                    width: size.width,
                    height: size.height,
                    depth: size.depth,
                    num_tiles: size.num_tiles,
                });
            }
            for z in 0..u32::from(size.depth) {
                for y in 0..u32::from(size.height) {
                    for x in 0..size.width {
                        out.push(self.tiling.tile_index(TiledResourceCoordinate {
                            x: start.x.saturating_add(x),
                            y: start.y.saturating_add(y),
                            z: start.z.saturating_add(z),
                            subresource: start.subresource,
                        })?);
                    }
                }
            }
            return Ok(());
        }

        let first = self.tiling.tile_index(start)?;
        if u64::from(first) + u64::from(size.num_tiles) > u64::from(self.tiling.num_tiles) {
            return Err(TileMappingError::RegionOutOfBounds {
                start: first,
                num_tiles: size.num_tiles,
                total: self.tiling.num_tiles,
            });
        }
        out.extend(first..first + size.num_tiles);
        Ok(())
    }

    /// Re-derive the per-heap mappings from the binding table.
    ///
    /// Consecutive resource tiles bound to consecutive heap tiles become one direct range, and
    /// consecutive resource tiles bound to the same heap tile become one reuse range.
    fn rebuild_mappings(&mut self, flags: TileMappingFlags) {
        struct Run {
            first_tile: u32,
            len: u32,
            heap_tile: u32,
            reuse: bool,
        }

        let mut runs: BTreeMap<ResourceId, Vec<Run>> = BTreeMap::new();
        for (tile, binding) in self.bindings.iter().enumerate() {
            let Some(b) = binding else { continue };
            let tile = tile as u32;
            let heap_runs = runs.entry(b.heap).or_default();

            if let Some(run) = heap_runs.last_mut() {
                let contiguous = run.first_tile + run.len == tile;
                let last_heap_tile = if run.reuse { run.heap_tile } else { run.heap_tile + run.len - 1 };
                if contiguous {
                    if run.len == 1 && b.heap_tile == run.heap_tile {
                        run.reuse = true;
                    }
                    let extends = if run.reuse {
                        b.heap_tile == run.heap_tile
                    } else {
                        b.heap_tile == last_heap_tile + 1
                    };
                    if extends {
                        run.len += 1;
                        continue;
                    }
                }
            }

            heap_runs.push(Run {
                first_tile: tile,
                len: 1,
                heap_tile: b.heap_tile,
                reuse: false,
            });
        }

        self.mappings.clear();
        for (heap, heap_runs) in runs {
            let mut mapping = TileMapping {
                flags,
                ..TileMapping::default()
            };
            for run in heap_runs {
                let Some(start) = self.tiling.coordinate(run.first_tile) else {
                    continue;
                };
                mapping.region_start_coordinates.push(start);
                mapping.region_sizes.push(TileRegionSize::linear(run.len));
                mapping.range_flags.push(if run.reuse {
                    TileRangeFlags::REUSE_SINGLE_TILE
                } else {
                    TileRangeFlags::NONE
                });
                mapping.heap_range_start_offsets.push(run.heap_tile);
                mapping.range_tile_counts.push(run.len);
            }
            self.mappings.insert(heap, mapping);
        }
    }
}
