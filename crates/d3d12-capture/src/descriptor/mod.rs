//! Virtualized descriptors.
//!
//! Descriptors live as plain data inside [`DescriptorHeap`] arenas and are addressed by
//! `(heap slot, index)` handles. When the application writes a descriptor we record the view
//! description here and create the native view immediately; at replay the same data recreates
//! it through [`Descriptor::create`].

mod heap;
mod view;

pub use heap::{
    CpuDescriptorHandle, DescriptorHandle, DescriptorHeap, DescriptorHeapDesc,
    DescriptorHeapTable, DescriptorHeapType, DynamicDescriptorCopy, DynamicDescriptorWrite,
    GpuDescriptorHandle, HeapSlot, PortableHandle,
};
pub use view::{
    BufferView, ConstantBufferViewDesc, DepthStencilViewDesc, RenderTargetViewDesc, SamplerDesc,
    ShaderResourceViewDesc, SqueezedUavDesc, TextureView, UnorderedAccessViewDesc,
    ViewDimension, ViewRange,
};

use tracing::trace;

use crate::device::{CaptureDevice, NativeView, ObjectRef};
use crate::error::SerialiseError;
use crate::gpu_address::GpuAddressRangeTracker;
use crate::id::ResourceId;
use crate::manager::FrameRefType;

/// Size of one encoded descriptor record.
pub const DESCRIPTOR_RECORD_SIZE: usize = 64;

/// Lowest non-sampler type tag. The tag shares its slot with the sampler filter, and every
/// valid filter is below this value.
pub const DESCRIPTOR_TYPE_SENTINEL: u32 = 0x1000;

const RECORD_WORDS: usize = DESCRIPTOR_RECORD_SIZE / 4;
const SAMPLER_WORDS: usize = std::mem::size_of::<SamplerDesc>() / 4;
const PAYLOAD_WORDS: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DescriptorType {
    Sampler = 0,
    Cbv = DESCRIPTOR_TYPE_SENTINEL,
    Srv,
    Uav,
    Rtv,
    Dsv,
    Undefined,
}

impl DescriptorType {
    fn from_tag(tag: u32) -> Result<Self, SerialiseError> {
        Ok(match tag {
            t if t < DESCRIPTOR_TYPE_SENTINEL => Self::Sampler,
            0x1000 => Self::Cbv,
            0x1001 => Self::Srv,
            0x1002 => Self::Uav,
            0x1003 => Self::Rtv,
            0x1004 => Self::Dsv,
            0x1005 => Self::Undefined,
            other => return Err(SerialiseError::UnknownDescriptorType(other)),
        })
    }
}

/// What a descriptor slot currently holds.
#[derive(Clone, Debug, Default)]
pub enum DescriptorView {
    /// Never written since the heap was created.
    #[default]
    Undefined,
    Sampler(SamplerDesc),
    ConstantBuffer(ConstantBufferViewDesc),
    ShaderResource {
        resource: Option<ObjectRef>,
        desc: ShaderResourceViewDesc,
    },
    UnorderedAccess {
        resource: Option<ObjectRef>,
        counter_resource: Option<ObjectRef>,
        desc: UnorderedAccessViewDesc,
    },
    RenderTarget {
        resource: Option<ObjectRef>,
        desc: RenderTargetViewDesc,
    },
    DepthStencil {
        resource: Option<ObjectRef>,
        desc: DepthStencilViewDesc,
    },
}

/// One descriptor slot.
///
/// The owning heap id and the slot index are fixed at heap creation; only the view changes.
/// A view description with [`ViewDimension::Unknown`] means the application passed no
/// description and the driver derives one from the resource.
#[derive(Clone, Debug, Default)]
pub struct Descriptor {
    heap: ResourceId,
    index: u32,
    view: DescriptorView,
}

fn explicit<T>(desc: T, dimension: ViewDimension) -> Option<T> {
    (dimension != ViewDimension::Unknown).then_some(desc)
}

impl Descriptor {
    pub fn new(heap: ResourceId, index: u32) -> Self {
        Self {
            heap,
            index,
            view: DescriptorView::Undefined,
        }
    }

    pub fn heap(&self) -> ResourceId {
        self.heap
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn view(&self) -> &DescriptorView {
        &self.view
    }

    pub fn descriptor_type(&self) -> DescriptorType {
        match self.view {
            DescriptorView::Undefined => DescriptorType::Undefined,
            DescriptorView::Sampler(_) => DescriptorType::Sampler,
            DescriptorView::ConstantBuffer(_) => DescriptorType::Cbv,
            DescriptorView::ShaderResource { .. } => DescriptorType::Srv,
            DescriptorView::UnorderedAccess { .. } => DescriptorType::Uav,
            DescriptorView::RenderTarget { .. } => DescriptorType::Rtv,
            DescriptorView::DepthStencil { .. } => DescriptorType::Dsv,
        }
    }

    pub fn init_sampler(&mut self, desc: SamplerDesc) {
        debug_assert!(
            desc.filter < DESCRIPTOR_TYPE_SENTINEL,
            "sampler filter {:#x} collides with descriptor type tags",
            desc.filter
        );
        self.view = DescriptorView::Sampler(desc);
    }

    pub fn init_cbv(&mut self, desc: ConstantBufferViewDesc) {
        self.view = DescriptorView::ConstantBuffer(desc);
    }

    pub fn init_srv(&mut self, resource: Option<ObjectRef>, desc: Option<ShaderResourceViewDesc>) {
        self.view = DescriptorView::ShaderResource {
            resource,
            desc: desc.unwrap_or_default(),
        };
    }

    pub fn init_uav(
        &mut self,
        resource: Option<ObjectRef>,
        counter_resource: Option<ObjectRef>,
        desc: Option<UnorderedAccessViewDesc>,
    ) {
        self.view = DescriptorView::UnorderedAccess {
            resource,
            counter_resource,
            desc: desc.unwrap_or_default(),
        };
    }

    pub fn init_rtv(&mut self, resource: Option<ObjectRef>, desc: Option<RenderTargetViewDesc>) {
        self.view = DescriptorView::RenderTarget {
            resource,
            desc: desc.unwrap_or_default(),
        };
    }

    pub fn init_dsv(&mut self, resource: Option<ObjectRef>, desc: Option<DepthStencilViewDesc>) {
        self.view = DescriptorView::DepthStencil {
            resource,
            desc: desc.unwrap_or_default(),
        };
    }

    /// Overwrite this descriptor's view with `src`'s, keeping this slot's heap and index.
    pub fn copy_from(&mut self, src: &Descriptor) {
        self.view = src.view.clone();
    }

    /// Create the native view this descriptor describes at `dest`.
    ///
    /// A null resource without a description gets a well-formed null view, and a slot that was
    /// never written gets the null view appropriate for `heap_type`, so every slot of a heap is
    /// valid after initial state is applied.
    pub fn create(
        &self,
        heap_type: DescriptorHeapType,
        device: &dyn CaptureDevice,
        dest: CpuDescriptorHandle,
    ) {
        let view = match &self.view {
            DescriptorView::Undefined => match heap_type {
                DescriptorHeapType::Sampler => NativeView::Sampler(SamplerDesc::null()),
                DescriptorHeapType::CbvSrvUav => NativeView::ShaderResource {
                    resource: None,
                    desc: Some(ShaderResourceViewDesc::null_view()),
                },
                DescriptorHeapType::Rtv => NativeView::RenderTarget {
                    resource: None,
                    desc: Some(RenderTargetViewDesc::null_view()),
                },
                DescriptorHeapType::Dsv => NativeView::DepthStencil {
                    resource: None,
                    desc: Some(DepthStencilViewDesc::null_view()),
                },
            },
            DescriptorView::Sampler(desc) => NativeView::Sampler(*desc),
            DescriptorView::ConstantBuffer(desc) => NativeView::ConstantBuffer(*desc),
            DescriptorView::ShaderResource { resource, desc } => {
                let mut desc = explicit(*desc, desc.dimension);
                if desc.is_none() && resource.is_none() {
                    desc = Some(ShaderResourceViewDesc::null_view());
                }
                NativeView::ShaderResource {
                    resource: resource.as_ref(),
                    desc,
                }
            }
            DescriptorView::UnorderedAccess {
                resource,
                counter_resource,
                desc,
            } => {
                let mut desc = explicit(*desc, desc.dimension);
                if desc.is_none() && resource.is_none() {
                    desc = Some(UnorderedAccessViewDesc::null_view());
                }
                NativeView::UnorderedAccess {
                    resource: resource.as_ref(),
                    // a counter without a resource is invalid
                    counter_resource: resource.as_ref().and(counter_resource.as_ref()),
                    desc,
                }
            }
            DescriptorView::RenderTarget { resource, desc } => {
                let mut desc = explicit(*desc, desc.dimension);
                if desc.is_none() && resource.is_none() {
                    desc = Some(RenderTargetViewDesc::null_view());
                }
                NativeView::RenderTarget {
                    resource: resource.as_ref(),
                    desc,
                }
            }
            DescriptorView::DepthStencil { resource, desc } => {
                let mut desc = explicit(*desc, desc.dimension);
                if desc.is_none() && resource.is_none() {
                    desc = Some(DepthStencilViewDesc::null_view());
                }
                NativeView::DepthStencil {
                    resource: resource.as_ref(),
                    desc,
                }
            }
        };

        trace!(heap = %self.heap, index = self.index, ?heap_type, "creating descriptor view");
        device.create_view(heap_type, view, dest);
    }

    /// Resources this descriptor references and how a draw or dispatch would use them.
    pub fn get_ref_ids(
        &self,
        addresses: &GpuAddressRangeTracker,
    ) -> (ResourceId, ResourceId, FrameRefType) {
        fn id_of(r: &Option<ObjectRef>) -> ResourceId {
            r.as_ref().map_or(ResourceId::NULL, |r| r.resource_id())
        }

        match &self.view {
            DescriptorView::Undefined | DescriptorView::Sampler(_) => {
                (ResourceId::NULL, ResourceId::NULL, FrameRefType::Read)
            }
            DescriptorView::ConstantBuffer(desc) => {
                let (id, _offset) = addresses.get_res_id_from_addr(desc.buffer_location);
                (id, ResourceId::NULL, FrameRefType::Read)
            }
            DescriptorView::ShaderResource { resource, .. } => {
                (id_of(resource), ResourceId::NULL, FrameRefType::Read)
            }
            DescriptorView::UnorderedAccess {
                resource,
                counter_resource,
                ..
            } => (id_of(resource), id_of(counter_resource), FrameRefType::Write),
            DescriptorView::RenderTarget { resource, .. }
            | DescriptorView::DepthStencil { resource, .. } => {
                (id_of(resource), ResourceId::NULL, FrameRefType::Write)
            }
        }
    }

    /// Encode to the fixed 64-byte little-endian record.
    ///
    /// Layout: heap id (8), index (4), then either the 52-byte sampler description (whose
    /// leading filter doubles as the type tag) or the type tag (4), the primary resource id (8)
    /// and a 40-byte view payload.
    pub fn encode(&self) -> [u8; DESCRIPTOR_RECORD_SIZE] {
        let mut words = [0u32; RECORD_WORDS];
        words[0] = self.heap.raw() as u32;
        words[1] = (self.heap.raw() >> 32) as u32;
        words[2] = self.index;

        fn put_id(dst: &mut [u32], r: &Option<ObjectRef>) {
            let raw = r.as_ref().map_or(0, |r| r.resource_id().raw());
            dst[0] = raw as u32;
            dst[1] = (raw >> 32) as u32;
        }

        if let DescriptorView::Sampler(desc) = &self.view {
            let sampler: [u32; SAMPLER_WORDS] = bytemuck::cast(*desc);
            words[3..].copy_from_slice(&sampler);
        } else {
            words[3] = self.descriptor_type() as u32;
            let (head, payload) = words.split_at_mut(6);
            let p: &mut [u32] = payload;
            match &self.view {
                DescriptorView::Undefined | DescriptorView::Sampler(_) => {}
                DescriptorView::ConstantBuffer(desc) => {
                    p[0] = desc.buffer_location as u32;
                    p[1] = (desc.buffer_location >> 32) as u32;
                    p[2] = desc.size_in_bytes;
                }
                DescriptorView::ShaderResource { resource, desc } => {
                    put_id(&mut head[4..6], resource);
                    p[0] = desc.format.0;
                    p[1] = desc.dimension as u32;
                    p[2] = desc.component_mapping;
                    p[3..9].copy_from_slice(&desc.range.to_words());
                }
                DescriptorView::UnorderedAccess {
                    resource,
                    counter_resource,
                    desc,
                } => {
                    put_id(&mut head[4..6], resource);
                    put_id(&mut p[0..2], counter_resource);
                    let squeezed: [u32; 8] = bytemuck::cast(SqueezedUavDesc::from_desc(desc));
                    p[2..10].copy_from_slice(&squeezed);
                }
                DescriptorView::RenderTarget { resource, desc } => {
                    put_id(&mut head[4..6], resource);
                    p[0] = desc.format.0;
                    p[1] = desc.dimension as u32;
                    p[2..8].copy_from_slice(&desc.range.to_words());
                }
                DescriptorView::DepthStencil { resource, desc } => {
                    put_id(&mut head[4..6], resource);
                    p[0] = desc.format.0;
                    p[1] = desc.dimension as u32;
                    p[2] = desc.flags;
                    p[3..9].copy_from_slice(&desc.range.to_words());
                }
            }
        }

        let mut out = [0u8; DESCRIPTOR_RECORD_SIZE];
        for (dst, w) in out.chunks_exact_mut(4).zip(words) {
            dst.copy_from_slice(&w.to_le_bytes());
        }
        out
    }

    /// Decode a record produced by [`Descriptor::encode`].
    ///
    /// `resolve` maps persisted resource ids to live objects; ids it cannot resolve (resources
    /// released before the state was read) decode as null resources.
    pub fn decode(
        bytes: &[u8],
        resolve: impl Fn(ResourceId) -> Option<ObjectRef>,
    ) -> Result<Self, SerialiseError> {
        if bytes.len() != DESCRIPTOR_RECORD_SIZE {
            return Err(SerialiseError::Corrupt("descriptor record has the wrong size"));
        }

        let mut words = [0u32; RECORD_WORDS];
        for (w, src) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *w = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        }

        let u64_at = |lo: usize| u64::from(words[lo]) | (u64::from(words[lo + 1]) << 32);
        let object_at = |lo: usize| {
            let id = ResourceId::from_raw(u64_at(lo));
            if id.is_null() {
                None
            } else {
                resolve(id)
            }
        };
        let range_at = |dimension, lo: usize| {
            let mut range = [0u32; 6];
            range.copy_from_slice(&words[lo..lo + 6]);
            ViewRange::from_words(dimension, range)
        };

        let mut desc = Descriptor::new(ResourceId::from_raw(u64_at(0)), words[2]);

        const P: usize = RECORD_WORDS - PAYLOAD_WORDS;
        desc.view = match DescriptorType::from_tag(words[3])? {
            DescriptorType::Sampler => {
                let mut sampler = [0u32; SAMPLER_WORDS];
                sampler.copy_from_slice(&words[3..]);
                DescriptorView::Sampler(bytemuck::cast(sampler))
            }
            DescriptorType::Undefined => DescriptorView::Undefined,
            DescriptorType::Cbv => DescriptorView::ConstantBuffer(ConstantBufferViewDesc {
                buffer_location: u64_at(P),
                size_in_bytes: words[P + 2],
            }),
            DescriptorType::Srv => {
                let dimension = ViewDimension::from_u32(words[P + 1])?;
                DescriptorView::ShaderResource {
                    resource: object_at(4),
                    desc: ShaderResourceViewDesc {
                        format: crate::resource::Format(words[P]),
                        dimension,
                        component_mapping: words[P + 2],
                        range: range_at(dimension, P + 3),
                    },
                }
            }
            DescriptorType::Uav => {
                let mut squeezed = [0u32; 8];
                squeezed.copy_from_slice(&words[P + 2..P + 10]);
                let squeezed: SqueezedUavDesc = bytemuck::cast(squeezed);
                DescriptorView::UnorderedAccess {
                    resource: object_at(4),
                    counter_resource: object_at(P),
                    desc: squeezed.as_desc()?,
                }
            }
            DescriptorType::Rtv => {
                let dimension = ViewDimension::from_u32(words[P + 1])?;
                DescriptorView::RenderTarget {
                    resource: object_at(4),
                    desc: RenderTargetViewDesc {
                        format: crate::resource::Format(words[P]),
                        dimension,
                        range: range_at(dimension, P + 2),
                    },
                }
            }
            DescriptorType::Dsv => {
                let dimension = ViewDimension::from_u32(words[P + 1])?;
                DescriptorView::DepthStencil {
                    resource: object_at(4),
                    desc: DepthStencilViewDesc {
                        format: crate::resource::Format(words[P]),
                        dimension,
                        flags: words[P + 2],
                        range: range_at(dimension, P + 3),
                    },
                }
            }
        };

        Ok(desc)
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::device::DeviceChild;
    use crate::gpu_address::GpuAddressRange;
    use crate::id::ResourceType;
    use crate::resource::Format;

    #[derive(Debug)]
    struct Res(ResourceId);

    impl DeviceChild for Res {
        fn resource_id(&self) -> ResourceId {
            self.0
        }

        fn resource_type(&self) -> ResourceType {
            ResourceType::Resource
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn res(raw: u64) -> ObjectRef {
        Arc::new(Res(ResourceId::from_raw(raw)))
    }

    fn resolver(id: ResourceId) -> Option<ObjectRef> {
        Some(Arc::new(Res(id)) as ObjectRef)
    }

    #[test]
    fn sampler_record_aliases_filter_with_type_tag() {
        let mut d = Descriptor::new(ResourceId::from_raw(9), 3);
        d.init_sampler(SamplerDesc {
            filter: 0x55,
            max_anisotropy: 16,
            border_color: [1.0, 0.0, 0.0, 1.0],
            ..SamplerDesc::null()
        });

        let bytes = d.encode();
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), 0x55);

        let decoded = Descriptor::decode(&bytes, resolver).unwrap();
        assert_eq!(decoded.descriptor_type(), DescriptorType::Sampler);
        assert_eq!(decoded.heap(), ResourceId::from_raw(9));
        assert_eq!(decoded.index(), 3);
        match decoded.view() {
            DescriptorView::Sampler(s) => assert_eq!(s.border_color, [1.0, 0.0, 0.0, 1.0]),
            other => panic!("unexpected view {other:?}"),
        }
    }

    #[test]
    fn uav_record_keeps_resource_and_counter() {
        let mut d = Descriptor::new(ResourceId::from_raw(1), 0);
        d.init_uav(
            Some(res(10)),
            Some(res(11)),
            Some(UnorderedAccessViewDesc {
                format: Format::R32_UINT,
                dimension: ViewDimension::Buffer,
                range: ViewRange::Buffer(BufferView {
                    num_elements: 128,
                    structure_byte_stride: 4,
                    counter_offset_in_bytes: 512,
                    ..BufferView::default()
                }),
            }),
        );

        let decoded = Descriptor::decode(&d.encode(), resolver).unwrap();
        let (res_id, counter_id, ref_type) = decoded.get_ref_ids(&GpuAddressRangeTracker::new());
        assert_eq!(res_id, ResourceId::from_raw(10));
        assert_eq!(counter_id, ResourceId::from_raw(11));
        assert_eq!(ref_type, FrameRefType::Write);
        match decoded.view() {
            DescriptorView::UnorderedAccess { desc, .. } => match desc.range {
                ViewRange::Buffer(b) => assert_eq!(b.counter_offset_in_bytes, 512),
                other => panic!("unexpected range {other:?}"),
            },
            other => panic!("unexpected view {other:?}"),
        }
    }

    #[test]
    fn unresolvable_resources_decode_as_null() {
        let mut d = Descriptor::new(ResourceId::from_raw(1), 0);
        d.init_rtv(Some(res(42)), None);

        let decoded = Descriptor::decode(&d.encode(), |_| None).unwrap();
        match decoded.view() {
            DescriptorView::RenderTarget { resource, desc } => {
                assert!(resource.is_none());
                assert_eq!(desc.dimension, ViewDimension::Unknown);
            }
            other => panic!("unexpected view {other:?}"),
        }
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        let mut bytes = Descriptor::new(ResourceId::from_raw(1), 0).encode();
        bytes[12..16].copy_from_slice(&0x2000u32.to_le_bytes());
        assert!(matches!(
            Descriptor::decode(&bytes, resolver),
            Err(SerialiseError::UnknownDescriptorType(0x2000))
        ));
        assert!(matches!(
            Descriptor::decode(&bytes[..32], resolver),
            Err(SerialiseError::Corrupt(_))
        ));
    }

    #[test]
    fn cbv_references_resolve_through_gpu_addresses() {
        let addresses = GpuAddressRangeTracker::new();
        addresses.add_to(GpuAddressRange::new(0x10000, 0x20000, ResourceId::from_raw(5)));

        let mut d = Descriptor::new(ResourceId::from_raw(1), 0);
        d.init_cbv(ConstantBufferViewDesc {
            buffer_location: 0x10100,
            size_in_bytes: 256,
        });

        assert_eq!(
            d.get_ref_ids(&addresses),
            (ResourceId::from_raw(5), ResourceId::NULL, FrameRefType::Read)
        );
    }

    #[test]
    fn srv_and_rtv_reference_types() {
        let mut srv = Descriptor::new(ResourceId::from_raw(1), 0);
        srv.init_srv(Some(res(3)), None);
        let mut rtv = Descriptor::new(ResourceId::from_raw(1), 1);
        rtv.init_rtv(Some(res(4)), None);
        let addresses = GpuAddressRangeTracker::new();

        assert_eq!(
            srv.get_ref_ids(&addresses),
            (ResourceId::from_raw(3), ResourceId::NULL, FrameRefType::Read)
        );
        assert_eq!(
            rtv.get_ref_ids(&addresses),
            (ResourceId::from_raw(4), ResourceId::NULL, FrameRefType::Write)
        );
    }
}
