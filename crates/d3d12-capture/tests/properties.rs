use d3d12_capture::{
    GpuAddressRange, GpuAddressRangeTracker, Format, ResourceDesc, ResourceId, ResourceStates,
    ResourceTiling, ReservedResource, TileMappingUpdate, TileRangeFlags, TileRegionSize,
    TileShape, TiledResourceCoordinate,
};
use proptest::prelude::*;

/// Disjoint `(start, len)` ranges built from gaps and lengths, so they never overlap.
fn disjoint_ranges() -> impl Strategy<Value = Vec<(u64, u64)>> {
    prop::collection::vec((0u64..0x1_0000, 1u64..0x1_0000), 1..32).prop_map(|parts| {
        let mut next = 0x1000u64;
        parts
            .into_iter()
            .map(|(gap, len)| {
                let start = next + gap;
                next = start + len;
                (start, len)
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn lookups_resolve_owner_and_offset(ranges in disjoint_ranges(), addr in any::<u64>()) {
        let tracker = GpuAddressRangeTracker::new();
        // insertion order must not matter
        for (i, &(start, len)) in ranges.iter().enumerate().rev() {
            tracker.add_to(GpuAddressRange::new(start, start + len, ResourceId::from_raw(i as u64 + 1)));
        }
        prop_assert_eq!(tracker.len(), ranges.len());

        for (i, &(start, len)) in ranges.iter().enumerate() {
            let id = ResourceId::from_raw(i as u64 + 1);
            prop_assert_eq!(tracker.lookup(start), Some((id, 0)));
            prop_assert_eq!(tracker.lookup(start + len - 1), Some((id, len - 1)));
        }

        let owner = ranges
            .iter()
            .enumerate()
            .find(|(_, r)| r.0 <= addr && addr < r.0 + r.1)
            .map(|(i, r)| (ResourceId::from_raw(i as u64 + 1), addr - r.0));
        let expected = if addr == 0 { None } else { owner };
        prop_assert_eq!(tracker.lookup(addr), expected);
    }

    #[test]
    fn removals_keep_ranges_sorted_and_disjoint(
        ranges in disjoint_ranges(),
        mut seed in any::<u64>(),
    ) {
        let tracker = GpuAddressRangeTracker::new();
        for (i, &(start, len)) in ranges.iter().enumerate() {
            tracker.add_to(GpuAddressRange::new(start, start + len, ResourceId::from_raw(i as u64 + 1)));
        }

        // remove in a pseudo-random order, checking the invariant after every step
        let mut remaining: Vec<usize> = (0..ranges.len()).collect();
        while !remaining.is_empty() {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let victim = remaining.swap_remove((seed >> 33) as usize % remaining.len());
            let (start, len) = ranges[victim];
            tracker.remove_from(start + len / 2);

            prop_assert_eq!(tracker.lookup(start), None);
            prop_assert_eq!(tracker.lookup(start + len - 1), None);
            prop_assert_eq!(tracker.len(), remaining.len());
            let listed = tracker.ranges();
            prop_assert!(listed.windows(2).all(|w| w[0].end <= w[1].start));
            for &i in &remaining {
                prop_assert_eq!(tracker.lookup(ranges[i].0), Some((ResourceId::from_raw(i as u64 + 1), 0)));
            }
        }
        prop_assert!(tracker.is_empty());
    }
}

fn reserved(w: u32, h: u16) -> ReservedResource {
    let shape = TileShape {
        width_in_texels: 128,
        height_in_texels: 128,
        depth_in_texels: 1,
    };
    ReservedResource::new(
        ResourceDesc::texture_2d(u64::from(w) * 128, u32::from(h) * 128, 1, Format::R8G8B8A8_UNORM),
        ResourceTiling::simple(w, h, 1, shape),
        ResourceStates::COMMON,
        None,
    )
}

#[derive(Debug, Clone)]
struct SingleTileUpdate {
    tile: u32,
    heap: u64,
    flag: TileRangeFlags,
    offset: u32,
}

fn updates(tiles: u32) -> impl Strategy<Value = Vec<SingleTileUpdate>> {
    let flag = prop_oneof![
        Just(TileRangeFlags::NONE),
        Just(TileRangeFlags::NULL),
        Just(TileRangeFlags::REUSE_SINGLE_TILE),
        Just(TileRangeFlags::SKIP),
    ];
    prop::collection::vec(
        (0..tiles, 1u64..4, flag, 0u32..64).prop_map(|(tile, heap, flag, offset)| SingleTileUpdate {
            tile,
            heap,
            flag,
            offset,
        }),
        0..48,
    )
}

proptest! {
    #[test]
    fn recorded_mappings_reproduce_bindings(ops in updates(16)) {
        let mut res = reserved(4, 4);
        for op in &ops {
            let coord = res.tiling().coordinate(op.tile).unwrap();
            res.update(&TileMappingUpdate {
                num_resource_regions: 1,
                region_start_coordinates: Some(&[coord]),
                region_sizes: Some(&[TileRegionSize::single_tile()]),
                heap: Some(ResourceId::from_raw(op.heap)),
                num_ranges: 1,
                range_flags: Some(&[op.flag]),
                heap_range_start_offsets: Some(&[op.offset]),
                range_tile_counts: Some(&[1]),
                ..TileMappingUpdate::default()
            })
            .unwrap();
        }

        // replaying every per-heap mapping onto a fresh resource gives the same tile table
        let mut replayed = reserved(4, 4);
        for (heap, mapping) in res.mappings() {
            replayed.update(&mapping.as_update(heap)).unwrap();
        }
        prop_assert_eq!(replayed.bindings(), res.bindings());

        let bound = res.bindings().iter().filter(|b| b.is_some()).count() as u64;
        let recorded: u64 = res.mappings().map(|(_, m)| m.num_tiles()).sum();
        prop_assert_eq!(bound, recorded);
    }

    #[test]
    fn tile_coordinates_round_trip(tile in 0u32..16) {
        let res = reserved(4, 4);
        let coord: TiledResourceCoordinate = res.tiling().coordinate(tile).unwrap();
        prop_assert_eq!(res.tiling().tile_index(coord).unwrap(), tile);
    }
}
