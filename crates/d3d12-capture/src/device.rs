//! Contracts the driver-side collaborators implement.
//!
//! The object wrappers that intercept API calls expose their wrapped objects as
//! [`DeviceChild`] trait objects, and the device wrapper implements [`CaptureDevice`] for the
//! handful of native operations this crate has to trigger (view creation, staging copies and
//! uploads).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::descriptor::{
    ConstantBufferViewDesc, CpuDescriptorHandle, DepthStencilViewDesc, DescriptorHeap,
    DescriptorHeapType, RenderTargetViewDesc, SamplerDesc, ShaderResourceViewDesc,
    UnorderedAccessViewDesc,
};
use crate::error::DeviceError;
use crate::id::{ResourceId, ResourceType};
use crate::resource::{HeapType, ResourceDesc};

/// Opaque value of an unwrapped driver object (the native interface pointer).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NativeObject(pub u64);

/// A wrapped driver object.
pub trait DeviceChild: Send + Sync + fmt::Debug {
    /// Id assigned to the object when it was wrapped.
    fn resource_id(&self) -> ResourceId;

    fn resource_type(&self) -> ResourceType;

    fn native(&self) -> NativeObject {
        NativeObject::default()
    }

    /// The descriptor storage, for descriptor heaps.
    fn descriptor_heap(&self) -> Option<&DescriptorHeap> {
        None
    }

    /// The creation description, for GPU resources.
    fn resource_desc(&self) -> Option<&ResourceDesc> {
        None
    }

    /// The heap type the resource lives in, for committed/placed resources.
    fn heap_type(&self) -> Option<HeapType> {
        None
    }

    fn gpu_virtual_address(&self) -> u64 {
        0
    }

    fn as_any(&self) -> &dyn Any;
}

pub type ObjectRef = Arc<dyn DeviceChild>;

/// A native view creation call, produced by [`crate::Descriptor::create`].
#[derive(Clone, Copy, Debug)]
pub enum NativeView<'a> {
    Sampler(SamplerDesc),
    ConstantBuffer(ConstantBufferViewDesc),
    ShaderResource {
        resource: Option<&'a ObjectRef>,
        desc: Option<ShaderResourceViewDesc>,
    },
    UnorderedAccess {
        resource: Option<&'a ObjectRef>,
        counter_resource: Option<&'a ObjectRef>,
        desc: Option<UnorderedAccessViewDesc>,
    },
    RenderTarget {
        resource: Option<&'a ObjectRef>,
        desc: Option<RenderTargetViewDesc>,
    },
    DepthStencil {
        resource: Option<&'a ObjectRef>,
        desc: Option<DepthStencilViewDesc>,
    },
}

/// Native device operations needed to materialize descriptors and to snapshot/restore
/// resource contents.
pub trait CaptureDevice: Send + Sync {
    fn create_view(
        &self,
        heap_type: DescriptorHeapType,
        view: NativeView<'_>,
        dest: CpuDescriptorHandle,
    );

    /// Copy the full contents of `resource` into a new CPU-readable staging object.
    fn copy_to_readback(&self, resource: &ObjectRef) -> Result<ObjectRef, DeviceError>;

    /// Copy every sample of a multisampled `resource` into consecutive slices of a new
    /// CPU-readable staging object.
    fn copy_samples_to_readback(&self, resource: &ObjectRef) -> Result<ObjectRef, DeviceError>;

    /// Read the bytes of a CPU-visible object.
    fn read_contents(&self, object: &ObjectRef) -> Result<Vec<u8>, DeviceError>;

    /// Create an object holding `contents`, shaped so it can later be copied into `live`.
    fn create_upload(&self, live: &ObjectRef, contents: &[u8]) -> Result<ObjectRef, DeviceError>;

    fn copy_resource(&self, dst: &ObjectRef, src: &ObjectRef) -> Result<(), DeviceError>;

    /// Inverse of [`CaptureDevice::copy_samples_to_readback`].
    fn copy_samples_from_array(&self, dst: &ObjectRef, src: &ObjectRef)
        -> Result<(), DeviceError>;
}
