use parking_lot::RwLock;
use tracing::error;

use crate::id::ResourceId;

/// A half-open GPU virtual address range `[start, end)` owned by one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuAddressRange {
    pub start: u64,
    pub end: u64,
    pub id: ResourceId,
}

impl GpuAddressRange {
    pub fn new(start: u64, end: u64, id: ResourceId) -> Self {
        Self { start, end, id }
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.start <= addr && addr < self.end
    }
}

/// Index from GPU virtual addresses back to the resource that owns them.
///
/// Invariants:
/// - Ranges are stored in ascending `start` order.
/// - No two ranges overlap.
///
/// Lookups vastly outnumber insertions/removals, so lookups only take the read side of the lock.
#[derive(Debug, Default)]
pub struct GpuAddressRangeTracker {
    addresses: RwLock<Vec<GpuAddressRange>>,
}

impl GpuAddressRangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the address range of a newly created resource.
    ///
    /// Overlapping an existing range is a contract violation: it panics in debug builds and the
    /// range is dropped (with an error log) in release builds.
    pub fn add_to(&self, range: GpuAddressRange) {
        if range.start >= range.end {
            debug_assert!(false, "empty GPU address range {range:?}");
            error!(?range, "ignoring empty GPU address range");
            return;
        }

        let mut addresses = self.addresses.write();
        let idx = addresses.partition_point(|r| r.start < range.start);

        let overlaps_prev = idx > 0 && addresses[idx - 1].end > range.start;
        let overlaps_next = idx < addresses.len() && addresses[idx].start < range.end;
        if overlaps_prev || overlaps_next {
            debug_assert!(false, "GPU address range {range:?} overlaps a registered range");
            error!(?range, "ignoring GPU address range that overlaps a registered range");
            return;
        }

        addresses.insert(idx, range);
    }

    /// Unregister the range containing `base_addr`.
    pub fn remove_from(&self, base_addr: u64) {
        let mut addresses = self.addresses.write();
        let idx = addresses.partition_point(|r| r.end <= base_addr);
        if idx < addresses.len() && addresses[idx].contains(base_addr) {
            addresses.remove(idx);
            return;
        }

        debug_assert!(false, "no GPU address range contains {base_addr:#x}");
        error!(base_addr, "removing unregistered GPU address range");
    }

    /// Resolve `addr` to the owning resource and the byte offset into it.
    pub fn lookup(&self, addr: u64) -> Option<(ResourceId, u64)> {
        if addr == 0 {
            return None;
        }

        let range = {
            let addresses = self.addresses.read();
            let idx = addresses.partition_point(|r| r.start <= addr);
            if idx == 0 {
                return None;
            }
            addresses[idx - 1]
        };

        if !range.contains(addr) {
            return None;
        }

        Some((range.id, addr - range.start))
    }

    /// [`GpuAddressRangeTracker::lookup`] with the null id and a zero offset for misses.
    pub fn get_res_id_from_addr(&self, addr: u64) -> (ResourceId, u64) {
        self.lookup(addr).unwrap_or((ResourceId::NULL, 0))
    }

    pub fn len(&self) -> usize {
        self.addresses.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.read().is_empty()
    }

    /// Copy of the current range list, in address order.
    pub fn ranges(&self) -> Vec<GpuAddressRange> {
        self.addresses.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> ResourceId {
        ResourceId::from_raw(raw)
    }

    #[test]
    fn lookup_resolves_containing_range() {
        let tracker = GpuAddressRangeTracker::new();
        tracker.add_to(GpuAddressRange::new(0x2000, 0x3000, id(2)));
        tracker.add_to(GpuAddressRange::new(0x1000, 0x1100, id(1)));

        assert_eq!(tracker.get_res_id_from_addr(0x1000), (id(1), 0));
        assert_eq!(tracker.get_res_id_from_addr(0x10ff), (id(1), 0xff));
        assert_eq!(tracker.get_res_id_from_addr(0x2800), (id(2), 0x800));
    }

    #[test]
    fn lookup_misses_return_null() {
        let tracker = GpuAddressRangeTracker::new();
        tracker.add_to(GpuAddressRange::new(0x1000, 0x1100, id(1)));

        assert_eq!(tracker.get_res_id_from_addr(0), (ResourceId::NULL, 0));
        assert_eq!(tracker.get_res_id_from_addr(0xfff), (ResourceId::NULL, 0));
        // `end` is exclusive.
        assert_eq!(tracker.get_res_id_from_addr(0x1100), (ResourceId::NULL, 0));
        assert_eq!(tracker.lookup(u64::MAX), None);
    }

    #[test]
    fn remove_accepts_any_address_inside_the_range() {
        let tracker = GpuAddressRangeTracker::new();
        tracker.add_to(GpuAddressRange::new(0x1000, 0x2000, id(1)));
        tracker.add_to(GpuAddressRange::new(0x2000, 0x3000, id(2)));

        tracker.remove_from(0x2000);
        assert_eq!(tracker.ranges(), vec![GpuAddressRange::new(0x1000, 0x2000, id(1))]);

        tracker.remove_from(0x1800);
        assert!(tracker.is_empty());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "overlaps")]
    fn overlapping_insert_is_a_contract_violation() {
        let tracker = GpuAddressRangeTracker::new();
        tracker.add_to(GpuAddressRange::new(0x1000, 0x2000, id(1)));
        tracker.add_to(GpuAddressRange::new(0x1800, 0x2800, id(2)));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "no GPU address range")]
    fn removing_unknown_range_is_a_contract_violation() {
        let tracker = GpuAddressRangeTracker::new();
        tracker.remove_from(0x1000);
    }
}
