use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::id::ResourceId;

/// A successful `Map` of one subresource, returned to the caller so the matching `Unmap` can
/// name it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapState {
    pub resource: ResourceId,
    pub subresource: u32,
    pub total_size: u64,
}

/// CPU shadow copy handed out in place of the real mapped pointer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShadowMapping {
    /// Real mapped address, as returned by the driver.
    pub real: u64,
    pub shadow: Vec<u8>,
}

#[derive(Debug, Default)]
struct MapData {
    refcount: AtomicU32,
    mapping: Mutex<Option<ShadowMapping>>,
}

/// Map reference counts of every subresource of one resource.
///
/// Nested maps of the same subresource share a single shadow mapping. The mapping is created
/// on the 0 -> 1 transition and handed back to the caller for flushing on the 1 -> 0
/// transition.
#[derive(Debug)]
pub struct SubresourceMaps {
    resource: ResourceId,
    subresources: Vec<MapData>,
}

impl SubresourceMaps {
    pub fn new(resource: ResourceId, num_subresources: u32) -> Self {
        Self {
            resource,
            subresources: (0..num_subresources).map(|_| MapData::default()).collect(),
        }
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    /// Record a map of `subresource`. `establish` is only called for the first outstanding map.
    ///
    /// Returns `None` for subresource indices outside the resource.
    pub fn map(
        &self,
        subresource: u32,
        total_size: u64,
        establish: impl FnOnce() -> ShadowMapping,
    ) -> Option<MapState> {
        let data = self.subresources.get(subresource as usize)?;

        // Holding the mapping lock across the increment keeps a racing unmap from tearing down
        // the mapping between the count going to 1 and the mapping being installed.
        let mut mapping = data.mapping.lock();
        if data.refcount.fetch_add(1, Ordering::AcqRel) == 0 {
            debug!(resource = %self.resource, subresource, total_size, "establishing shadow mapping");
            *mapping = Some(establish());
        }

        Some(MapState {
            resource: self.resource,
            subresource,
            total_size,
        })
    }

    /// Record an unmap. Returns the shadow mapping when this was the last outstanding map.
    pub fn unmap(&self, state: &MapState) -> Option<ShadowMapping> {
        let data = self.subresources.get(state.subresource as usize)?;

        let mut mapping = data.mapping.lock();
        let prev = data
            .refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match prev {
            Ok(1) => mapping.take(),
            Ok(_) => None,
            Err(_) => {
                debug_assert!(false, "unmap of subresource {} without a matching map", state.subresource);
                error!(resource = %self.resource, subresource = state.subresource, "unbalanced unmap");
                None
            }
        }
    }

    pub fn refcount(&self, subresource: u32) -> u32 {
        self.subresources
            .get(subresource as usize)
            .map_or(0, |d| d.refcount.load(Ordering::Acquire))
    }

    /// Run `f` on the live shadow mapping of `subresource`, if it is mapped.
    pub fn with_shadow<T>(&self, subresource: u32, f: impl FnOnce(&mut ShadowMapping) -> T) -> Option<T> {
        let data = self.subresources.get(subresource as usize)?;
        let mut mapping = data.mapping.lock();
        mapping.as_mut().map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_maps_share_one_mapping() {
        let maps = SubresourceMaps::new(ResourceId::from_raw(1), 2);
        let mut established = 0;

        let first = maps
            .map(0, 64, || {
                established += 1;
                ShadowMapping {
                    real: 0x1000,
                    shadow: vec![0; 64],
                }
            })
            .unwrap();
        let second = maps.map(0, 64, || unreachable!()).unwrap();
        assert_eq!(established, 1);
        assert_eq!(maps.refcount(0), 2);

        maps.with_shadow(0, |m| m.shadow[0] = 7);

        assert_eq!(maps.unmap(&second), None);
        let last = maps.unmap(&first).unwrap();
        assert_eq!(last.real, 0x1000);
        assert_eq!(last.shadow[0], 7);
        assert_eq!(maps.refcount(0), 0);
    }

    #[test]
    fn out_of_range_subresource_is_rejected() {
        let maps = SubresourceMaps::new(ResourceId::from_raw(1), 1);
        assert!(maps.map(1, 4, ShadowMapping::default).is_none());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "without a matching map")]
    fn unbalanced_unmap_is_a_contract_violation() {
        let maps = SubresourceMaps::new(ResourceId::from_raw(1), 1);
        maps.unmap(&MapState {
            resource: ResourceId::from_raw(1),
            subresource: 0,
            total_size: 4,
        });
    }
}
