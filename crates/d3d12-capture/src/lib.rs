//! Capture-time resource tracking and virtualization for D3D12 capture/replay.
//!
//! This crate shadows the driver objects an application creates so that a recorded command
//! stream can be serialized and later replayed against a different device instance:
//! - [`ResourceManager`] maps driver objects to stable [`ResourceId`]s (capture) and back to
//!   replacement objects (replay).
//! - [`Descriptor`]s are stored as plain data inside [`DescriptorHeap`] arenas; handles are
//!   `(heap slot, index)` keys and persist as [`PortableHandle`]s.
//! - [`GpuAddressRangeTracker`] resolves raw GPU virtual addresses to resource + offset.
//! - [`ResourceRecord`] carries per-resource chunks, parents and command-list state
//!   (baking, dependency closure).
//! - [`ReservedResource`] virtualizes tile mappings of reserved (tiled) resources.
//! - [`D3D12ResourceManager`] implements initial-state capture and apply.
//!
//! Driver object wrappers and the device are external collaborators; they plug in through the
//! [`DeviceChild`] and [`CaptureDevice`] traits.

mod barrier;
mod chunk;
mod config;
mod d3d12_manager;
mod descriptor;
mod device;
mod error;
mod gpu_address;
mod id;
mod initial_state;
mod io;
mod manager;
mod map;
mod record;
mod resource;
mod tiled;

pub use crate::barrier::{
    BarrierFlags, ResourceBarrier, ResourceStateTable, ResourceStates, SubresourceStateVector,
    ALL_SUBRESOURCES,
};
pub use crate::chunk::{Chunk, ChunkList};
pub use crate::config::{CaptureOptions, DEFAULT_INITIAL_STATE_CHUNK_OVERHEAD};
pub use crate::d3d12_manager::{D3D12ManagerConfig, D3D12ResourceManager};
pub use crate::descriptor::{
    BufferView, ConstantBufferViewDesc, CpuDescriptorHandle, DepthStencilViewDesc, Descriptor,
    DescriptorHandle, DescriptorHeap, DescriptorHeapDesc, DescriptorHeapTable,
    DescriptorHeapType, DescriptorType, DescriptorView, DynamicDescriptorCopy,
    DynamicDescriptorWrite, GpuDescriptorHandle, HeapSlot, PortableHandle,
    RenderTargetViewDesc, SamplerDesc, ShaderResourceViewDesc, SqueezedUavDesc, TextureView,
    UnorderedAccessViewDesc, ViewDimension, ViewRange, DESCRIPTOR_RECORD_SIZE,
    DESCRIPTOR_TYPE_SENTINEL,
};
pub use crate::device::{CaptureDevice, DeviceChild, NativeObject, NativeView, ObjectRef};
pub use crate::error::{
    CaptureError, DeviceError, Result, SerialiseError, TileMappingError,
};
pub use crate::gpu_address::{GpuAddressRange, GpuAddressRangeTracker};
pub use crate::id::{ResourceId, ResourceType};
pub use crate::initial_state::{
    read_initial_state_chunk, write_initial_state_chunk, InitialContents, InitialContentsTag,
    InitialPayload, InitialStateHandler, SerialisedInitialState, SerialisedPayload,
};
pub use crate::io::{ReadLeExt, WriteLeExt};
pub use crate::manager::{
    CaptureState, FrameRefType, ObjectKey, ResourceManager, ResourceManagerConfig,
};
pub use crate::map::{MapState, ShadowMapping, SubresourceMaps};
pub use crate::record::{CmdListRecordingInfo, RecordRef, ResourceRecord};
pub use crate::resource::{
    ClearValue, Format, HeapType, ResourceDesc, ResourceDimension, ResourceFlags,
};
pub use crate::tiled::{
    ReservedResource, ResourceTiling, SubresourceTiling, TileBinding, TileMapping,
    TileMappingFlags, TileMappingUpdate, TileRangeFlags, TileRegionSize, TileShape,
    TiledResourceCoordinate,
};
