use std::any::Any;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::Descriptor;
use crate::device::DeviceChild;
use crate::error::SerialiseError;
use crate::id::{ResourceId, ResourceType};
use crate::io::{ReadLeExt, WriteLeExt};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DescriptorHeapType {
    #[default]
    CbvSrvUav = 0,
    Sampler = 1,
    Rtv = 2,
    Dsv = 3,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DescriptorHeapDesc {
    pub heap_type: DescriptorHeapType,
    pub num_descriptors: u32,
    pub shader_visible: bool,
}

/// Arena slot of a live descriptor heap in a [`DescriptorHeapTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapSlot(u32);

impl HeapSlot {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Address of one descriptor: the owning heap's arena slot and the index inside that heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DescriptorHandle {
    pub heap: HeapSlot,
    pub index: u32,
}

impl DescriptorHandle {
    /// Opaque integer form handed to the application. Zero is never a valid handle.
    pub fn to_raw(self) -> u64 {
        (u64::from(self.heap.0 + 1) << 32) | u64::from(self.index)
    }

    pub fn from_raw(raw: u64) -> Option<Self> {
        let slot = (raw >> 32) as u32;
        if slot == 0 {
            return None;
        }
        Some(Self {
            heap: HeapSlot(slot - 1),
            index: raw as u32,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CpuDescriptorHandle(pub DescriptorHandle);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuDescriptorHandle(pub DescriptorHandle);

/// Serializable descriptor address: heap id plus index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PortableHandle {
    pub heap: ResourceId,
    pub index: u32,
}

impl PortableHandle {
    pub fn new(heap: ResourceId, index: u32) -> Self {
        Self { heap, index }
    }

    pub fn is_null(&self) -> bool {
        self.heap.is_null()
    }

    pub fn write<W: WriteLeExt + ?Sized>(&self, w: &mut W) -> Result<(), SerialiseError> {
        w.write_resource_id(self.heap)?;
        w.write_u32_le(self.index)
    }

    pub fn read<R: ReadLeExt + ?Sized>(r: &mut R) -> Result<Self, SerialiseError> {
        Ok(Self {
            heap: r.read_resource_id()?,
            index: r.read_u32_le()?,
        })
    }
}

/// Backing storage of a wrapped descriptor heap.
#[derive(Debug)]
pub struct DescriptorHeap {
    id: ResourceId,
    desc: DescriptorHeapDesc,
    slot: HeapSlot,
    descriptors: RwLock<Vec<Descriptor>>,
}

impl DescriptorHeap {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn desc(&self) -> &DescriptorHeapDesc {
        &self.desc
    }

    pub fn slot(&self) -> HeapSlot {
        self.slot
    }

    pub fn num_descriptors(&self) -> u32 {
        self.desc.num_descriptors
    }

    pub fn cpu_handle(&self, index: u32) -> CpuDescriptorHandle {
        CpuDescriptorHandle(DescriptorHandle {
            heap: self.slot,
            index,
        })
    }

    /// Only shader-visible heaps have GPU handles.
    pub fn gpu_handle(&self, index: u32) -> Option<GpuDescriptorHandle> {
        self.desc.shader_visible.then_some(GpuDescriptorHandle(DescriptorHandle {
            heap: self.slot,
            index,
        }))
    }

    pub fn descriptor(&self, index: u32) -> Option<Descriptor> {
        self.descriptors.read().get(index as usize).cloned()
    }

    /// Run `f` on the descriptor at `index` under the heap's write lock.
    pub fn write<T>(&self, index: u32, f: impl FnOnce(&mut Descriptor) -> T) -> Option<T> {
        self.descriptors.write().get_mut(index as usize).map(f)
    }

    /// Copy of every descriptor, in index order.
    pub fn snapshot(&self) -> Vec<Descriptor> {
        self.descriptors.read().clone()
    }
}

impl DeviceChild for DescriptorHeap {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn resource_type(&self) -> ResourceType {
        ResourceType::DescriptorHeap
    }

    fn descriptor_heap(&self) -> Option<&DescriptorHeap> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A descriptor write recorded while a command list was being built.
#[derive(Clone, Debug)]
pub struct DynamicDescriptorWrite {
    pub desc: Descriptor,
    pub dest: CpuDescriptorHandle,
}

/// A descriptor copy recorded while a command list was being built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DynamicDescriptorCopy {
    pub dst: CpuDescriptorHandle,
    pub src: CpuDescriptorHandle,
    pub heap_type: DescriptorHeapType,
}

#[derive(Debug, Default)]
struct Slots {
    heaps: Vec<Option<Weak<DescriptorHeap>>>,
    free: Vec<u32>,
}

/// Arena of live descriptor heaps, addressed by [`HeapSlot`].
///
/// Heaps are held weakly; the wrapper owning the heap releases its slot on destruction.
#[derive(Debug, Default)]
pub struct DescriptorHeapTable {
    slots: RwLock<Slots>,
}

impl DescriptorHeapTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_heap(&self, id: ResourceId, desc: DescriptorHeapDesc) -> Arc<DescriptorHeap> {
        let mut slots = self.slots.write();
        let slot = match slots.free.pop() {
            Some(slot) => slot,
            None => {
                slots.heaps.push(None);
                (slots.heaps.len() - 1) as u32
            }
        };

        let descriptors = (0..desc.num_descriptors)
            .map(|index| Descriptor::new(id, index))
            .collect();
        let heap = Arc::new(DescriptorHeap {
            id,
            desc,
            slot: HeapSlot(slot),
            descriptors: RwLock::new(descriptors),
        });
        slots.heaps[slot as usize] = Some(Arc::downgrade(&heap));

        debug!(%id, slot, num_descriptors = desc.num_descriptors, "created descriptor heap");
        heap
    }

    pub fn release_heap(&self, slot: HeapSlot) {
        let mut guard = self.slots.write();
        let slots = &mut *guard;
        match slots.heaps.get_mut(slot.0 as usize) {
            Some(entry) if entry.is_some() => {
                *entry = None;
                slots.free.push(slot.0);
            }
            _ => warn!(slot = slot.0, "releasing unknown descriptor heap slot"),
        }
    }

    pub fn heap(&self, slot: HeapSlot) -> Option<Arc<DescriptorHeap>> {
        self.slots
            .read()
            .heaps
            .get(slot.0 as usize)
            .and_then(|entry| entry.as_ref())
            .and_then(Weak::upgrade)
    }

    pub fn descriptor(&self, handle: DescriptorHandle) -> Option<Descriptor> {
        self.heap(handle.heap)?.descriptor(handle.index)
    }

    pub fn write_descriptor<T>(
        &self,
        handle: DescriptorHandle,
        f: impl FnOnce(&mut Descriptor) -> T,
    ) -> Option<T> {
        self.heap(handle.heap)?.write(handle.index, f)
    }

    /// Store a recorded dynamic write. Returns false if the destination no longer exists.
    pub fn apply_write(&self, write: &DynamicDescriptorWrite) -> bool {
        self.write_descriptor(write.dest.0, |d| d.copy_from(&write.desc))
            .is_some()
    }

    /// Store a recorded dynamic copy. Returns false if either end no longer exists.
    pub fn apply_copy(&self, copy: &DynamicDescriptorCopy) -> bool {
        let Some(src) = self.descriptor(copy.src.0) else {
            return false;
        };
        self.write_descriptor(copy.dst.0, |d| d.copy_from(&src))
            .is_some()
    }

    /// Null handles and handles into released heaps map to the null portable handle.
    pub fn to_portable_handle(&self, handle: Option<DescriptorHandle>) -> PortableHandle {
        handle
            .and_then(|h| {
                let heap = self.heap(h.heap)?;
                Some(PortableHandle::new(heap.id(), h.index))
            })
            .unwrap_or_default()
    }
}
