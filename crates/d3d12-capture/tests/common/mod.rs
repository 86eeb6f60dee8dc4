//! Shared fakes for `d3d12-capture` integration tests.
//!
//! `FakeResource` holds its contents in memory and `FakeDevice` implements the staging/upload
//! copies on top of it, so initial-state capture and apply can be exercised without a driver.

#![allow(dead_code)]

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use d3d12_capture::{
    CaptureDevice, CaptureOptions, CaptureState, CpuDescriptorHandle, D3D12ResourceManager,
    DescriptorHeapDesc, DescriptorHeapType, DeviceChild, DeviceError, HeapType, NativeObject,
    NativeView, ObjectRef, ResourceDesc, ResourceId, ResourceType,
};
use parking_lot::Mutex;

static NEXT_GPU_VA: AtomicU64 = AtomicU64::new(0x1_0000_0000);
static NEXT_NATIVE: AtomicU64 = AtomicU64::new(0x1000);

#[derive(Debug)]
pub struct FakeResource {
    id: ResourceId,
    desc: ResourceDesc,
    heap_type: HeapType,
    gpu_va: u64,
    native: NativeObject,
    /// Staging copies of this resource fail as if the device was removed.
    unreadable: bool,
    pub contents: Mutex<Vec<u8>>,
}

impl FakeResource {
    pub fn new(desc: ResourceDesc, heap_type: HeapType, contents: Vec<u8>) -> Arc<Self> {
        Self::build(desc, heap_type, contents, false)
    }

    /// A buffer whose contents can never be copied out.
    pub fn unreadable_buffer(len: u64) -> Arc<Self> {
        Self::build(ResourceDesc::buffer(len), HeapType::Default, Vec::new(), true)
    }

    fn build(desc: ResourceDesc, heap_type: HeapType, contents: Vec<u8>, unreadable: bool) -> Arc<Self> {
        let gpu_va = if desc.is_buffer() {
            // keep ranges disjoint and 64KiB aligned like a real allocator
            let size = desc.width.max(1).next_multiple_of(0x1_0000);
            NEXT_GPU_VA.fetch_add(size, Ordering::Relaxed)
        } else {
            0
        };
        Arc::new(Self {
            id: ResourceId::new_unique(),
            desc,
            heap_type,
            gpu_va,
            native: NativeObject(NEXT_NATIVE.fetch_add(8, Ordering::Relaxed)),
            unreadable,
            contents: Mutex::new(contents),
        })
    }

    pub fn buffer(contents: Vec<u8>) -> Arc<Self> {
        Self::new(
            ResourceDesc::buffer(contents.len() as u64),
            HeapType::Default,
            contents,
        )
    }

    pub fn contents(&self) -> Vec<u8> {
        self.contents.lock().clone()
    }
}

impl DeviceChild for FakeResource {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn resource_type(&self) -> ResourceType {
        ResourceType::Resource
    }

    fn native(&self) -> NativeObject {
        self.native
    }

    fn resource_desc(&self) -> Option<&ResourceDesc> {
        Some(&self.desc)
    }

    fn heap_type(&self) -> Option<HeapType> {
        Some(self.heap_type)
    }

    fn gpu_virtual_address(&self) -> u64 {
        self.gpu_va
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Any non-resource object (command list, queue, heap, ...).
#[derive(Debug)]
pub struct FakeObject {
    id: ResourceId,
    resource_type: ResourceType,
}

impl FakeObject {
    pub fn new(resource_type: ResourceType) -> Arc<Self> {
        Arc::new(Self {
            id: ResourceId::new_unique(),
            resource_type,
        })
    }
}

impl DeviceChild for FakeObject {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedView {
    pub heap_type: DescriptorHeapType,
    pub dest: CpuDescriptorHandle,
    pub resource: Option<ResourceId>,
    pub null_desc: bool,
}

#[derive(Default)]
pub struct FakeDevice {
    pub views: Mutex<Vec<CreatedView>>,
}

fn fake(obj: &ObjectRef) -> Result<&FakeResource, DeviceError> {
    obj.as_any()
        .downcast_ref::<FakeResource>()
        .ok_or(DeviceError::InvalidObject(obj.resource_id()))
}

impl CaptureDevice for FakeDevice {
    fn create_view(
        &self,
        heap_type: DescriptorHeapType,
        view: NativeView<'_>,
        dest: CpuDescriptorHandle,
    ) {
        let (resource, null_desc) = match view {
            NativeView::Sampler(_) | NativeView::ConstantBuffer(_) => (None, false),
            NativeView::ShaderResource { resource, desc } => (resource, desc.is_some()),
            NativeView::UnorderedAccess { resource, desc, .. } => (resource, desc.is_some()),
            NativeView::RenderTarget { resource, desc } => (resource, desc.is_some()),
            NativeView::DepthStencil { resource, desc } => (resource, desc.is_some()),
        };
        self.views.lock().push(CreatedView {
            heap_type,
            dest,
            resource: resource.map(|r| r.resource_id()),
            null_desc: resource.is_none() && null_desc,
        });
    }

    fn copy_to_readback(&self, resource: &ObjectRef) -> Result<ObjectRef, DeviceError> {
        let res = fake(resource)?;
        if res.unreadable {
            return Err(DeviceError::DeviceRemoved);
        }
        let contents = res.contents();
        Ok(FakeResource::new(
            ResourceDesc::buffer(contents.len() as u64),
            HeapType::Readback,
            contents,
        ))
    }

    fn copy_samples_to_readback(&self, resource: &ObjectRef) -> Result<ObjectRef, DeviceError> {
        self.copy_to_readback(resource)
    }

    fn read_contents(&self, object: &ObjectRef) -> Result<Vec<u8>, DeviceError> {
        Ok(fake(object)?.contents())
    }

    fn create_upload(&self, _live: &ObjectRef, contents: &[u8]) -> Result<ObjectRef, DeviceError> {
        Ok(FakeResource::new(
            ResourceDesc::buffer(contents.len() as u64),
            HeapType::Upload,
            contents.to_vec(),
        ))
    }

    fn copy_resource(&self, dst: &ObjectRef, src: &ObjectRef) -> Result<(), DeviceError> {
        let data = fake(src)?.contents();
        *fake(dst)?.contents.lock() = data;
        Ok(())
    }

    fn copy_samples_from_array(&self, dst: &ObjectRef, src: &ObjectRef) -> Result<(), DeviceError> {
        self.copy_resource(dst, src)
    }
}

/// Show crate logs in the output of failing tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn capture_manager(options: CaptureOptions) -> (Arc<FakeDevice>, D3D12ResourceManager) {
    init_tracing();
    let device = Arc::new(FakeDevice::default());
    let manager = D3D12ResourceManager::new(
        Arc::clone(&device) as Arc<dyn CaptureDevice>,
        options,
        CaptureState::ActiveCapturing,
    );
    (device, manager)
}

pub fn replay_manager() -> (Arc<FakeDevice>, D3D12ResourceManager) {
    init_tracing();
    let device = Arc::new(FakeDevice::default());
    let manager = D3D12ResourceManager::new(
        Arc::clone(&device) as Arc<dyn CaptureDevice>,
        CaptureOptions::default(),
        CaptureState::Loading,
    );
    (device, manager)
}

/// Create a descriptor heap in `manager`'s table and track it as a current object.
pub fn tracked_heap(
    manager: &D3D12ResourceManager,
    heap_type: DescriptorHeapType,
    num_descriptors: u32,
    shader_visible: bool,
) -> ObjectRef {
    let heap = manager.heaps().create_heap(
        ResourceId::new_unique(),
        DescriptorHeapDesc {
            heap_type,
            num_descriptors,
            shader_visible,
        },
    );
    let obj: ObjectRef = heap;
    manager.track_object(&obj);
    obj
}

pub fn tracked(manager: &D3D12ResourceManager, obj: ObjectRef) -> ObjectRef {
    manager.track_object(&obj);
    obj
}
