use std::io;

use thiserror::Error;

use crate::id::{ResourceId, ResourceType};

pub type Result<T> = std::result::Result<T, CaptureError>;

/// Failure that aborts capture of the current frame (or the current replay load).
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("{0} is not registered")]
    NotFound(ResourceId),

    #[error("{id} has unexpected type {found:?}")]
    UnexpectedType { id: ResourceId, found: ResourceType },

    #[error("{0} has no command list recording state")]
    NotCommandList(ResourceId),

    #[error("device call failed: {0}")]
    Device(#[from] DeviceError),

    #[error("tile mapping update rejected: {0}")]
    TileMapping(#[from] TileMappingError),

    #[error("serialisation failed: {0}")]
    Serialise(#[from] SerialiseError),
}

/// Error surfaced by the [`crate::CaptureDevice`] collaborator.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("out of memory allocating {len} bytes")]
    OutOfMemory { len: u64 },

    #[error("device removed")]
    DeviceRemoved,

    #[error("object {0} cannot be used for this operation")]
    InvalidObject(ResourceId),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum SerialiseError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("out of memory allocating {len} bytes")]
    OutOfMemory { len: usize },

    #[error("corrupt chunk: {0}")]
    Corrupt(&'static str),

    #[error("unknown initial contents tag {0}")]
    UnknownTag(u32),

    #[error("unknown resource type {0}")]
    UnknownResourceType(u32),

    #[error("unknown descriptor type {0:#x}")]
    UnknownDescriptorType(u32),

    #[error("unknown view dimension {0}")]
    UnknownViewDimension(u32),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TileMappingError {
    #[error("{name} holds {found} entries but {expected} are required")]
    ArrayTooShort {
        name: &'static str,
        expected: u32,
        found: usize,
    },

    #[error("region start coordinates are required when more than one region is given")]
    MissingStartCoordinates,

    #[error("range tile counts are required when more than one range is given")]
    MissingRangeTileCounts,

    #[error("heap range start offsets are required for ranges that map heap tiles")]
    MissingHeapRangeStartOffsets,

    #[error("subresource {0} is not tiled")]
    InvalidSubresource(u32),

    #[error("tile coordinate ({x}, {y}, {z}) is outside subresource {subresource}")]
    CoordinateOutOfBounds {
        x: u32,
        y: u32,
        z: u32,
        subresource: u32,
    },

    #[error("region of {num_tiles} tiles starting at tile {start} exceeds {total} resource tiles")]
    RegionOutOfBounds { start: u32, num_tiles: u32, total: u32 },

    #[error("box region {width}x{height}x{depth} does not hold {num_tiles} tiles")]
    BoxSizeMismatch {
        width: u32,
        height: u16,
        depth: u16,
        num_tiles: u32,
    },

    #[error("ranges cover {ranges} tiles but regions cover {regions} tiles")]
    TileCountMismatch { regions: u64, ranges: u64 },

    #[error("invalid tile range flags {0:#x}")]
    InvalidRangeFlags(u32),

    #[error("{num_tiles} heap tiles starting at {offset} exceed the heap tile index range")]
    HeapRangeOverflow { offset: u32, num_tiles: u32 },
}
