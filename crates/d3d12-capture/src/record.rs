use std::fmt;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use tracing::trace;

use crate::barrier::ResourceBarrier;
use crate::chunk::{Chunk, ChunkList};
use crate::descriptor::{CpuDescriptorHandle, DescriptorHeapTable};
use crate::error::{CaptureError, Result};
use crate::gpu_address::GpuAddressRangeTracker;
use crate::id::{ResourceId, ResourceType};
use crate::manager::FrameRefType;
use crate::map::SubresourceMaps;
use crate::tiled::ReservedResource;

pub type RecordRef = Arc<Mutex<ResourceRecord>>;

/// State accumulated while a command list is being recorded.
///
/// Owned by the recording thread until the list is baked.
#[derive(Debug, Default)]
pub struct CmdListRecordingInfo {
    pub barriers: Vec<ResourceBarrier>,
    /// Reserved resources referenced by the list; their backing heaps are referenced on submit.
    pub tiled_resources: HashSet<ResourceId>,
    /// Resources whose contents the list may write.
    pub dirtied: HashSet<ResourceId>,
    /// Descriptors bound through tables, duplicates included.
    pub bound_descs: Vec<CpuDescriptorHandle>,
    pub bundles: Vec<RecordRef>,
}

impl CmdListRecordingInfo {
    fn swap(&mut self, other: &mut CmdListRecordingInfo) {
        std::mem::swap(&mut self.barriers, &mut other.barriers);
        std::mem::swap(&mut self.tiled_resources, &mut other.tiled_resources);
        std::mem::swap(&mut self.dirtied, &mut other.dirtied);
        std::mem::swap(&mut self.bound_descs, &mut other.bound_descs);
        std::mem::swap(&mut self.bundles, &mut other.bundles);
    }

    fn clear(&mut self) {
        self.barriers.clear();
        self.tiled_resources.clear();
        self.dirtied.clear();
        self.bound_descs.clear();
        self.bundles.clear();
    }

    /// Resolve every distinct bound descriptor to the resources it references and compose
    /// those references into `refs`.
    pub fn collect_bound_descriptor_refs(
        &self,
        heaps: &DescriptorHeapTable,
        addresses: &GpuAddressRangeTracker,
        refs: &mut HashMap<ResourceId, FrameRefType>,
    ) {
        let mut seen = HashSet::with_capacity(self.bound_descs.len());
        for handle in &self.bound_descs {
            if !seen.insert(*handle) {
                continue;
            }
            let Some(desc) = heaps.descriptor(handle.0) else {
                continue;
            };

            let (id, id2, ref_type) = desc.get_ref_ids(addresses);
            for id in [id, id2] {
                if id.is_null() {
                    continue;
                }
                let entry = refs.entry(id).or_insert(FrameRefType::None);
                *entry = entry.compose(ref_type);
            }
        }
        trace!(bound = self.bound_descs.len(), distinct = seen.len(), "collected bound descriptor refs");
    }
}

/// Capture bookkeeping for one wrapped object.
pub struct ResourceRecord {
    id: ResourceId,
    pub resource_type: ResourceType,
    pub contains_execute_indirect: bool,
    chunks: ChunkList,
    parents: Vec<RecordRef>,
    data_written: bool,
    /// Present on command lists while they record.
    pub cmd_info: Option<Box<CmdListRecordingInfo>>,
    /// Frozen record a command list's state is baked into on close.
    pub baked_commands: Option<RecordRef>,
    pub maps: Option<Arc<SubresourceMaps>>,
    pub reserved: Option<ReservedResource>,
}

impl fmt::Debug for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Parents are shown by pointer; locking them here could deadlock with a caller that
        // holds one.
        f.debug_struct("ResourceRecord")
            .field("id", &self.id)
            .field("resource_type", &self.resource_type)
            .field("contains_execute_indirect", &self.contains_execute_indirect)
            .field("chunks", &self.chunks.len())
            .field("parents", &self.parents.iter().map(Arc::as_ptr).collect::<Vec<_>>())
            .field("data_written", &self.data_written)
            .field("cmd_info", &self.cmd_info.is_some())
            .field("baked_commands", &self.baked_commands.is_some())
            .finish_non_exhaustive()
    }
}

impl ResourceRecord {
    pub fn new(id: ResourceId, resource_type: ResourceType) -> Self {
        Self {
            id,
            resource_type,
            contains_execute_indirect: false,
            chunks: ChunkList::new(),
            parents: Vec::new(),
            data_written: false,
            cmd_info: None,
            baked_commands: None,
            maps: None,
            reserved: None,
        }
    }

    pub fn into_ref(self) -> RecordRef {
        Arc::new(Mutex::new(self))
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn add_chunk(&mut self, chunk: Arc<Chunk>) {
        self.chunks.push(chunk);
    }

    pub fn chunks(&self) -> &ChunkList {
        &self.chunks
    }

    pub fn has_chunks(&self) -> bool {
        !self.chunks.is_empty()
    }

    /// Add a dependency. Records are unique per id, so pointer identity deduplicates.
    pub fn add_parent(&mut self, parent: &RecordRef) {
        if !self.parents.iter().any(|p| Arc::ptr_eq(p, parent)) {
            self.parents.push(Arc::clone(parent));
        }
    }

    pub fn parents(&self) -> &[RecordRef] {
        &self.parents
    }

    pub fn data_written(&self) -> bool {
        self.data_written
    }

    /// Make the record eligible for the next dependency closure.
    pub fn mark_data_unwritten(&mut self) {
        self.data_written = false;
    }

    /// Start recording command list state, baking into `baked` on close.
    ///
    /// Lock order is always live record then baked record.
    pub fn reset_command_recording(&mut self, baked: RecordRef) {
        {
            let mut b = baked.lock();
            b.resource_type = self.resource_type;
            b.cmd_info = Some(Box::default());
        }
        self.cmd_info = Some(Box::default());
        self.baked_commands = Some(baked);
    }

    /// Move everything recorded so far into the baked record and reset this one.
    pub fn bake(&mut self) -> Result<()> {
        let baked_ref = self
            .baked_commands
            .clone()
            .ok_or(CaptureError::NotCommandList(self.id))?;
        let info = self
            .cmd_info
            .as_deref_mut()
            .ok_or(CaptureError::NotCommandList(self.id))?;

        let mut baked = baked_ref.lock();
        let baked_info = baked.cmd_info.get_or_insert_with(Box::default);
        info.swap(baked_info);
        info.clear();

        std::mem::swap(&mut self.chunks, &mut baked.chunks);
        self.chunks.clear();
        baked.contains_execute_indirect = self.contains_execute_indirect;
        self.contains_execute_indirect = false;

        trace!(id = %self.id, baked = %baked.id, chunks = baked.chunks.len(), "baked command list");
        Ok(())
    }

    /// Append the chunks of `record` and everything it transitively depends on to `into`,
    /// parents first. Every record contributes at most once until marked unwritten again.
    ///
    /// At most one record lock is held at a time.
    pub fn insert(record: &RecordRef, into: &mut ChunkList) {
        let parents = {
            let mut r = record.lock();
            if r.data_written {
                return;
            }
            r.data_written = true;
            r.parents.clone()
        };

        for parent in &parents {
            Self::insert(parent, into);
        }

        let r = record.lock();
        into.extend_from(&r.chunks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ty: ResourceType) -> RecordRef {
        ResourceRecord::new(ResourceId::new_unique(), ty).into_ref()
    }

    #[test]
    fn bake_moves_state_into_baked_record() {
        let live = record(ResourceType::GraphicsCommandList);
        let baked = record(ResourceType::Unknown);
        let mut l = live.lock();
        l.reset_command_recording(Arc::clone(&baked));

        l.add_chunk(Chunk::new(1, vec![1]));
        l.add_chunk(Chunk::new(2, vec![2]));
        l.contains_execute_indirect = true;
        let info = l.cmd_info.as_mut().unwrap();
        info.dirtied.insert(ResourceId::from_raw(9));
        info.tiled_resources.insert(ResourceId::from_raw(10));

        l.bake().unwrap();

        assert!(!l.has_chunks());
        assert!(!l.contains_execute_indirect);
        assert!(l.cmd_info.as_ref().unwrap().dirtied.is_empty());

        let b = baked.lock();
        assert_eq!(b.resource_type, ResourceType::GraphicsCommandList);
        assert_eq!(b.chunks().len(), 2);
        assert!(b.contains_execute_indirect);
        let info = b.cmd_info.as_ref().unwrap();
        assert!(info.dirtied.contains(&ResourceId::from_raw(9)));
        assert!(info.tiled_resources.contains(&ResourceId::from_raw(10)));
    }

    #[test]
    fn bake_requires_command_recording() {
        let r = record(ResourceType::Resource);
        let mut r = r.lock();
        assert!(matches!(r.bake(), Err(CaptureError::NotCommandList(_))));
    }

    #[test]
    fn parent_chunks_precede_children_even_when_recorded_later() {
        let parent = record(ResourceType::Heap);
        let child = record(ResourceType::Resource);

        // the child records first; its parent only gets a chunk afterwards
        child.lock().add_chunk(Chunk::new(2, b"create placed".to_vec()));
        parent.lock().add_chunk(Chunk::new(1, b"create heap".to_vec()));
        child.lock().add_parent(&parent);

        let mut into = ChunkList::new();
        ResourceRecord::insert(&child, &mut into);
        let kinds: Vec<u32> = into.iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec![1, 2]);
    }

    #[test]
    fn shared_parents_contribute_once() {
        let heap = record(ResourceType::Heap);
        heap.lock().add_chunk(Chunk::new(1, vec![]));
        let a = record(ResourceType::Resource);
        let b = record(ResourceType::Resource);
        for child in [&a, &b] {
            let mut c = child.lock();
            c.add_chunk(Chunk::new(2, vec![]));
            c.add_parent(&heap);
        }

        let mut into = ChunkList::new();
        ResourceRecord::insert(&a, &mut into);
        ResourceRecord::insert(&b, &mut into);
        let kinds: Vec<u32> = into.iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec![1, 2, 2]);
    }

    #[test]
    fn parents_are_deduplicated() {
        let parent = record(ResourceType::Heap);
        let child = record(ResourceType::Resource);
        let mut c = child.lock();
        c.add_parent(&parent);
        c.add_parent(&parent);
        assert_eq!(c.parents().len(), 1);
    }
}
