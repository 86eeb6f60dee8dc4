use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::device::ObjectRef;
use crate::id::ResourceId;

bitflags! {
    /// D3D12 resource usage states.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ResourceStates: u32 {
        const COMMON = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 0x1;
        const INDEX_BUFFER = 0x2;
        const RENDER_TARGET = 0x4;
        const UNORDERED_ACCESS = 0x8;
        const DEPTH_WRITE = 0x10;
        const DEPTH_READ = 0x20;
        const NON_PIXEL_SHADER_RESOURCE = 0x40;
        const PIXEL_SHADER_RESOURCE = 0x80;
        const STREAM_OUT = 0x100;
        const INDIRECT_ARGUMENT = 0x200;
        const COPY_DEST = 0x400;
        const COPY_SOURCE = 0x800;
        const RESOLVE_DEST = 0x1000;
        const RESOLVE_SOURCE = 0x2000;
        const GENERIC_READ = 0x1 | 0x2 | 0x40 | 0x80 | 0x200 | 0x800;
    }
}

impl ResourceStates {
    pub const PRESENT: ResourceStates = ResourceStates::COMMON;
    pub const PREDICATION: ResourceStates = ResourceStates::INDIRECT_ARGUMENT;
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BarrierFlags: u32 {
        const BEGIN_ONLY = 0x1;
        const END_ONLY = 0x2;
    }
}

/// Subresource index that addresses every subresource of a resource at once.
pub const ALL_SUBRESOURCES: u32 = 0xffff_ffff;

/// One barrier of a `ResourceBarrier` call.
#[derive(Clone, Debug)]
pub enum ResourceBarrier {
    Transition {
        resource: ObjectRef,
        subresource: u32,
        before: ResourceStates,
        after: ResourceStates,
        flags: BarrierFlags,
    },
    Aliasing {
        before: Option<ObjectRef>,
        after: Option<ObjectRef>,
        flags: BarrierFlags,
    },
    Uav {
        resource: Option<ObjectRef>,
        flags: BarrierFlags,
    },
}

impl ResourceBarrier {
    pub fn transition(
        resource: ObjectRef,
        subresource: u32,
        before: ResourceStates,
        after: ResourceStates,
    ) -> Self {
        Self::Transition {
            resource,
            subresource,
            before,
            after,
            flags: BarrierFlags::empty(),
        }
    }

    pub fn flags(&self) -> BarrierFlags {
        match self {
            Self::Transition { flags, .. } | Self::Aliasing { flags, .. } | Self::Uav { flags, .. } => {
                *flags
            }
        }
    }

    /// True for transitions whose before and after states match.
    pub fn is_noop_transition(&self) -> bool {
        matches!(self, Self::Transition { before, after, .. } if before == after)
    }
}

/// Current state of every subresource of one resource.
pub type SubresourceStateVector = Vec<ResourceStates>;

/// Per-resource subresource states, ordered by id so serialization is deterministic.
pub type ResourceStateTable = BTreeMap<ResourceId, SubresourceStateVector>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_read_is_the_union_of_read_states() {
        let read = ResourceStates::VERTEX_AND_CONSTANT_BUFFER
            | ResourceStates::INDEX_BUFFER
            | ResourceStates::NON_PIXEL_SHADER_RESOURCE
            | ResourceStates::PIXEL_SHADER_RESOURCE
            | ResourceStates::INDIRECT_ARGUMENT
            | ResourceStates::COPY_SOURCE;
        assert_eq!(ResourceStates::GENERIC_READ, read);
        assert_eq!(ResourceStates::GENERIC_READ.bits(), 0xac3);
    }
}
