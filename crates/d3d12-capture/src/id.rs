use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identifier of a logical resource.
///
/// The same id names a resource during capture and during replay, even though the driver object
/// behind it is a different one in each process. The zero value is the null id.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(u64);

impl ResourceId {
    pub const NULL: ResourceId = ResourceId(0);

    /// Allocate a fresh process-unique id.
    pub fn new_unique() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId::{}", self.0)
    }
}

/// Category of a wrapped driver object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ResourceType {
    #[default]
    Unknown = 0,
    Device,
    CommandAllocator,
    CommandQueue,
    CommandSignature,
    DescriptorHeap,
    Fence,
    Heap,
    PipelineState,
    QueryHeap,
    Resource,
    GraphicsCommandList,
    RootSignature,
    PipelineLibrary,
}

impl ResourceType {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::Unknown,
            1 => Self::Device,
            2 => Self::CommandAllocator,
            3 => Self::CommandQueue,
            4 => Self::CommandSignature,
            5 => Self::DescriptorHeap,
            6 => Self::Fence,
            7 => Self::Heap,
            8 => Self::PipelineState,
            9 => Self::QueryHeap,
            10 => Self::Resource,
            11 => Self::GraphicsCommandList,
            12 => Self::RootSignature,
            13 => Self::PipelineLibrary,
            _ => return None,
        })
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_ids_are_never_null_and_distinct() {
        let a = ResourceId::new_unique();
        let b = ResourceId::new_unique();
        assert!(!a.is_null());
        assert_ne!(a, b);
        assert!(ResourceId::default().is_null());
    }

    #[test]
    fn resource_type_round_trips_through_u32() {
        for v in 0..=13 {
            let ty = ResourceType::from_u32(v).unwrap();
            assert_eq!(ty.as_u32(), v);
        }
        assert_eq!(ResourceType::from_u32(14), None);
    }
}
