use std::io::{Read, Write};
use std::sync::Arc;

use hashbrown::HashMap;
use tracing::{debug, error, trace, warn};

use crate::barrier::{
    BarrierFlags, ResourceBarrier, ResourceStateTable, ResourceStates, ALL_SUBRESOURCES,
};
use crate::chunk::ChunkList;
use crate::config::CaptureOptions;
use crate::descriptor::{
    CpuDescriptorHandle, Descriptor, DescriptorHeapTable, DynamicDescriptorCopy,
    DynamicDescriptorWrite, GpuDescriptorHandle, PortableHandle, DESCRIPTOR_RECORD_SIZE,
};
use crate::device::{CaptureDevice, NativeObject, ObjectRef};
use crate::error::{CaptureError, Result};
use crate::gpu_address::{GpuAddressRange, GpuAddressRangeTracker};
use crate::id::{ResourceId, ResourceType};
use crate::initial_state::{
    read_initial_state_chunk, write_initial_state_chunk, InitialContents, InitialContentsTag,
    InitialPayload, InitialStateHandler, SerialisedInitialState, SerialisedPayload,
};
use crate::io::{ReadLeExt, WriteLeExt};
use crate::manager::{
    CaptureState, FrameRefType, ObjectKey, ResourceManager, ResourceManagerConfig,
};
use crate::map::{MapState, ShadowMapping, SubresourceMaps};
use crate::record::{RecordRef, ResourceRecord};
use crate::resource::{ClearValue, HeapType};
use crate::tiled::{ReservedResource, ResourceTiling, TileMappingUpdate};

/// Type configuration of the D3D12 resource manager.
#[derive(Debug)]
pub struct D3D12ManagerConfig;

impl ResourceManagerConfig for D3D12ManagerConfig {
    type WrappedResource = ObjectRef;
    type RealResource = NativeObject;
    type Record = RecordRef;
    type InitialContents = InitialContents;

    fn wrapped_key(res: &ObjectRef) -> ObjectKey {
        ObjectKey(Arc::as_ptr(res) as *const () as usize)
    }

    fn real_key(res: &NativeObject) -> ObjectKey {
        ObjectKey(res.0 as usize)
    }

    fn create_record(id: ResourceId) -> RecordRef {
        ResourceRecord::new(id, ResourceType::Unknown).into_ref()
    }
}

/// D3D12 layer over [`ResourceManager`]: descriptor heaps, GPU addresses, barriers and
/// initial-state policy.
pub struct D3D12ResourceManager {
    base: ResourceManager<D3D12ManagerConfig>,
    device: Arc<dyn CaptureDevice>,
    heaps: Arc<DescriptorHeapTable>,
    addresses: Arc<GpuAddressRangeTracker>,
    options: CaptureOptions,
}

impl D3D12ResourceManager {
    pub fn new(device: Arc<dyn CaptureDevice>, options: CaptureOptions, state: CaptureState) -> Self {
        Self {
            base: ResourceManager::new(state),
            device,
            heaps: Arc::new(DescriptorHeapTable::new()),
            addresses: Arc::new(GpuAddressRangeTracker::new()),
            options,
        }
    }

    pub fn resources(&self) -> &ResourceManager<D3D12ManagerConfig> {
        &self.base
    }

    pub fn heaps(&self) -> &Arc<DescriptorHeapTable> {
        &self.heaps
    }

    pub fn addresses(&self) -> &Arc<GpuAddressRangeTracker> {
        &self.addresses
    }

    pub fn device(&self) -> &Arc<dyn CaptureDevice> {
        &self.device
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    pub fn get_id(&self, obj: &ObjectRef) -> ResourceId {
        self.base.get_id(obj)
    }

    pub fn get_current_resource(&self, id: ResourceId) -> Result<ObjectRef> {
        self.base.get_current_resource(id)
    }

    pub fn get_live_resource(&self, id: ResourceId) -> Result<ObjectRef> {
        self.base.get_live_resource(id)
    }

    /// Register a newly wrapped object for capture: identity, record and GPU address range.
    pub fn track_object(&self, obj: &ObjectRef) -> RecordRef {
        let id = obj.resource_id();
        self.base.add_current_resource(id, Arc::clone(obj));
        if obj.native() != NativeObject::default() {
            self.base.add_wrapper(Arc::clone(obj), &obj.native());
        }

        let record = self.base.add_resource_record(id);
        record.lock().resource_type = obj.resource_type();

        if let Some(desc) = obj.resource_desc() {
            let base = obj.gpu_virtual_address();
            if desc.is_buffer() && base != 0 {
                self.addresses
                    .add_to(GpuAddressRange::new(base, base + desc.width, id));
            }
        }

        trace!(%id, resource_type = ?obj.resource_type(), "tracking object");
        record
    }

    /// Undo [`D3D12ResourceManager::track_object`] when the application releases `obj`.
    pub fn release_object(&self, obj: &ObjectRef) {
        let id = obj.resource_id();
        if let Some(desc) = obj.resource_desc() {
            let base = obj.gpu_virtual_address();
            if desc.is_buffer() && base != 0 {
                self.addresses.remove_from(base);
            }
        }
        if let Some(heap) = obj.descriptor_heap() {
            self.heaps.release_heap(heap.slot());
        }
        if obj.native() != NativeObject::default() {
            self.base.remove_wrapper(&obj.native());
        }
        self.base.remove_resource_record(id);
        if self.base.take_initial_contents(id).is_some() {
            trace!(%id, "dropped initial contents of released object");
        }
        self.base.release_current_resource(id);
    }

    /// Track a reserved resource and its tiling layout.
    pub fn track_reserved_resource(
        &self,
        obj: &ObjectRef,
        tiling: ResourceTiling,
        state: ResourceStates,
        clear_value: Option<ClearValue>,
    ) -> Result<RecordRef> {
        let desc = obj
            .resource_desc()
            .copied()
            .ok_or(CaptureError::UnexpectedType {
                id: obj.resource_id(),
                found: obj.resource_type(),
            })?;
        let record = self.track_object(obj);
        record.lock().reserved = Some(ReservedResource::new(desc, tiling, state, clear_value));
        Ok(record)
    }

    /// Record an `UpdateTileMappings` call on a reserved resource.
    pub fn update_tile_mappings(&self, obj: &ObjectRef, update: &TileMappingUpdate<'_>) -> Result<()> {
        let id = self.get_id(obj);
        let record = self
            .base
            .get_resource_record(id)
            .ok_or(CaptureError::NotFound(id))?;
        let mut record = record.lock();
        let found = record.resource_type;
        let reserved = record
            .reserved
            .as_mut()
            .ok_or(CaptureError::UnexpectedType { id, found })?;
        reserved.update(update)?;
        Ok(())
    }

    /// Record a CPU map of one subresource. See [`SubresourceMaps::map`].
    pub fn map(
        &self,
        obj: &ObjectRef,
        subresource: u32,
        total_size: u64,
        establish: impl FnOnce() -> ShadowMapping,
    ) -> Result<Option<MapState>> {
        let id = self.get_id(obj);
        let record = self
            .base
            .get_resource_record(id)
            .ok_or(CaptureError::NotFound(id))?;
        let maps = {
            let mut r = record.lock();
            let subresources = obj.resource_desc().map_or(1, |d| d.subresource_count());
            Arc::clone(
                r.maps
                    .get_or_insert_with(|| Arc::new(SubresourceMaps::new(id, subresources))),
            )
        };
        Ok(maps.map(subresource, total_size, establish))
    }

    /// Record a CPU unmap. The last unmap of a subresource returns its shadow mapping for
    /// flushing and marks the resource dirty.
    pub fn unmap(&self, state: &MapState) -> Result<Option<ShadowMapping>> {
        let record = self
            .base
            .get_resource_record(state.resource)
            .ok_or(CaptureError::NotFound(state.resource))?;
        let Some(maps) = record.lock().maps.clone() else {
            debug_assert!(false, "unmap of {} which was never mapped", state.resource);
            error!(resource = %state.resource, "unmap of a resource that was never mapped");
            return Ok(None);
        };

        let shadow = maps.unmap(state);
        if shadow.is_some() {
            self.base.mark_dirty_resource(state.resource);
        }
        Ok(shadow)
    }

    /// Apply the transitions in `barriers` to `states`.
    ///
    /// Resources without a state entry are ignored, as are aliasing/UAV barriers and the first
    /// half of split barriers.
    pub fn apply_barriers(&self, barriers: &[ResourceBarrier], states: &mut ResourceStateTable) {
        for barrier in barriers {
            let ResourceBarrier::Transition {
                resource,
                subresource,
                after,
                flags,
                ..
            } = barrier
            else {
                continue;
            };
            if flags.contains(BarrierFlags::BEGIN_ONLY) {
                continue;
            }

            let id = self.get_id(resource);
            let Some(subs) = states.get_mut(&id) else {
                continue;
            };

            if *subresource == ALL_SUBRESOURCES {
                subs.fill(*after);
            } else if let Some(state) = subs.get_mut(*subresource as usize) {
                *state = *after;
            } else {
                debug_assert!(false, "barrier on subresource {subresource} of {id} which has {}", subs.len());
                error!(%id, subresource, count = subs.len(), "barrier subresource out of range");
            }
        }
    }

    /// Persist `states`: `u32` count, then per resource `u64` id, `u32` n and n `u32` states.
    pub fn serialise_resource_states<W: Write + ?Sized>(
        &self,
        w: &mut W,
        states: &ResourceStateTable,
    ) -> Result<()> {
        w.write_u32_le(states.len() as u32)?;
        for (&id, subs) in states {
            w.write_resource_id(id)?;
            w.write_u32_le(subs.len() as u32)?;
            for s in subs {
                w.write_u32_le(s.bits())?;
            }
        }
        Ok(())
    }

    /// Read persisted states and append the transitions that move each live resource from its
    /// state in `states` to the persisted one, then apply them to `states`.
    ///
    /// Resources without a live replacement are skipped; missing state entries start at
    /// `COMMON`.
    pub fn read_resource_states<R: Read + ?Sized>(
        &self,
        r: &mut R,
        barriers: &mut Vec<ResourceBarrier>,
        states: &mut ResourceStateTable,
    ) -> Result<()> {
        let first_new = barriers.len();

        let count = r.read_u32_le()?;
        for _ in 0..count {
            let id = r.read_resource_id()?;
            let n = r.read_u32_le()?;
            let mut captured = Vec::with_capacity((n as usize).min(4096));
            for _ in 0..n {
                captured.push(ResourceStates::from_bits_retain(r.read_u32_le()?));
            }

            let Ok(live) = self.base.get_live_resource(id) else {
                trace!(%id, "no live resource for persisted states");
                continue;
            };

            let current = states
                .entry(id)
                .or_insert_with(|| vec![ResourceStates::COMMON; captured.len()]);
            if current.len() != captured.len() {
                current.resize(captured.len(), ResourceStates::COMMON);
            }

            for (i, (&before, &after)) in current.iter().zip(&captured).enumerate() {
                if before != after {
                    barriers.push(ResourceBarrier::transition(
                        Arc::clone(&live),
                        i as u32,
                        before,
                        after,
                    ));
                }
            }
        }

        let mut added = barriers.split_off(first_new);
        added.retain(|b| !b.is_noop_transition());
        barriers.extend(added);

        debug!(barriers = barriers.len() - first_new, "restoring resource states");
        self.apply_barriers(&barriers[first_new..], states);
        Ok(())
    }

    /// Heap for a persisted heap id: the live replacement at replay, the current object at
    /// capture.
    fn heap_object(&self, heap: ResourceId) -> Option<ObjectRef> {
        if heap.is_null() {
            return None;
        }
        self.base
            .get_live_resource(heap)
            .or_else(|_| self.base.get_current_resource(heap))
            .ok()
    }

    fn resolve_portable(&self, handle: &PortableHandle) -> Option<(ObjectRef, u32)> {
        let obj = self.heap_object(handle.heap)?;
        let num = obj.descriptor_heap()?.num_descriptors();
        if handle.index >= num {
            if self.options.verify_descriptor_handles {
                warn!(heap = %handle.heap, index = handle.index, num, "portable handle outside its heap");
            }
            return None;
        }
        Some((obj, handle.index))
    }

    pub fn cpu_handle_from_portable_handle(&self, handle: &PortableHandle) -> Option<CpuDescriptorHandle> {
        let (obj, index) = self.resolve_portable(handle)?;
        Some(obj.descriptor_heap()?.cpu_handle(index))
    }

    pub fn gpu_handle_from_portable_handle(&self, handle: &PortableHandle) -> Option<GpuDescriptorHandle> {
        let (obj, index) = self.resolve_portable(handle)?;
        obj.descriptor_heap()?.gpu_handle(index)
    }

    pub fn descriptor_from_portable_handle(&self, handle: &PortableHandle) -> Option<Descriptor> {
        let (obj, index) = self.resolve_portable(handle)?;
        obj.descriptor_heap()?.descriptor(index)
    }

    /// Portable form of `handle`, naming the heap by the id it is known under in this capture.
    pub fn to_portable_handle(&self, handle: Option<CpuDescriptorHandle>) -> PortableHandle {
        let Some(handle) = handle else {
            return PortableHandle::default();
        };
        let Some(heap) = self.heaps.heap(handle.0.heap) else {
            return PortableHandle::default();
        };

        let own_id = heap.id();
        let obj: ObjectRef = heap;
        let id = match self.get_id(&obj) {
            id if id.is_null() => own_id,
            id => id,
        };
        PortableHandle::new(id, handle.0.index)
    }

    pub fn get_ref_ids(&self, desc: &Descriptor) -> (ResourceId, ResourceId, FrameRefType) {
        desc.get_ref_ids(&self.addresses)
    }

    /// Whether a record's chunks belong in the serialized frame. Command lists and queues are
    /// serialized through their submissions instead.
    pub fn serialisable_resource(&self, record: &ResourceRecord) -> bool {
        !matches!(
            record.resource_type,
            ResourceType::GraphicsCommandList | ResourceType::CommandQueue
        )
    }

    /// Fold a submitted baked command list into the frame state: referenced resources become
    /// frame references, dirtied resources are marked dirty and bundles are followed.
    pub fn mark_submitted_command_list(&self, baked: &RecordRef) {
        let mut refs = HashMap::new();
        let (tiled, dirtied, bundles) = {
            let record = baked.lock();
            let Some(info) = record.cmd_info.as_deref() else {
                debug_assert!(false, "{} is not a baked command list", record.id());
                error!(id = %record.id(), "submitted record has no command list state");
                return;
            };

            if self.options.verify_descriptor_handles {
                let invalid = info
                    .bound_descs
                    .iter()
                    .filter(|h| self.heaps.descriptor(h.0).is_none())
                    .count();
                if invalid > 0 {
                    warn!(id = %record.id(), invalid, "command list bound descriptors outside any live heap");
                }
            }

            info.collect_bound_descriptor_refs(&self.heaps, &self.addresses, &mut refs);
            (
                info.tiled_resources.iter().copied().collect::<Vec<_>>(),
                info.dirtied.iter().copied().collect::<Vec<_>>(),
                info.bundles.clone(),
            )
        };

        for (id, ref_type) in refs {
            self.base.mark_resource_frame_referenced(id, ref_type);
        }
        for id in dirtied {
            self.base.mark_dirty_resource(id);
        }
        for id in tiled {
            let Some(record) = self.base.get_resource_record(id) else {
                continue;
            };
            let heaps: Vec<_> = record
                .lock()
                .reserved
                .as_ref()
                .map(|r| r.bound_heaps().collect())
                .unwrap_or_default();
            for heap in heaps {
                self.base.mark_resource_frame_referenced(heap, FrameRefType::Read);
            }
        }
        for bundle in &bundles {
            self.mark_submitted_command_list(bundle);
        }
    }

    /// Reset the written flag of every record ahead of a new frame's dependency closure.
    pub fn mark_unwritten_resources(&self) {
        for (_, record) in self.base.resource_records() {
            record.lock().mark_data_unwritten();
        }
    }

    /// Collect the chunks of every frame-referenced (or, with `ref_all_resources`, every)
    /// serialisable record and their dependencies into `into`.
    pub fn insert_referenced_chunks(&self, into: &mut ChunkList) {
        let ref_all = self.options.ref_all_resources;
        for (id, record) in self.base.resource_records() {
            let serialisable = self.serialisable_resource(&record.lock());
            if !serialisable {
                continue;
            }
            if ref_all || self.base.frame_reference(id) != FrameRefType::None {
                ResourceRecord::insert(&record, into);
            }
        }
        debug!(chunks = into.len(), "inserted referenced chunks");
    }

    /// Replay descriptor writes and copies recorded outside command lists, in order.
    /// Returns how many were dropped because a handle no longer resolves.
    pub fn apply_dynamic_descriptor_writes(
        &self,
        writes: &[DynamicDescriptorWrite],
        copies: &[DynamicDescriptorCopy],
    ) -> usize {
        let dropped = writes.iter().filter(|w| !self.heaps.apply_write(w)).count()
            + copies.iter().filter(|c| !self.heaps.apply_copy(c)).count();
        if dropped > 0 {
            warn!(dropped, "dynamic descriptor updates target released heaps");
        }
        dropped
    }

    /// Read one initial-state chunk at replay and keep its contents for
    /// [`InitialStateHandler::apply_initial_contents`].
    pub fn read_initial_state<R: Read + ?Sized>(&self, r: &mut R) -> Result<ResourceId> {
        let state = read_initial_state_chunk(r)?;
        let id = state.id;

        if !self.base.has_live_resource(id) {
            debug!(%id, "initial state for a resource that was not recreated");
            return Ok(id);
        }

        match state.payload {
            SerialisedPayload::Descriptors(records) => {
                let descriptors = records
                    .iter()
                    .map(|record| Descriptor::decode(record, |res| self.base.get_live_resource(res).ok()))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                self.base
                    .set_initial_contents(id, InitialContents::descriptors(descriptors));
            }
            SerialisedPayload::Bytes(bytes) => {
                if bytes.is_empty() {
                    trace!(%id, "empty initial contents");
                    return Ok(id);
                }
                let live = self.base.get_live_resource(id)?;
                let upload = self.device.create_upload(&live, &bytes)?;
                let tag = if live.resource_desc().is_some_and(|d| d.is_multisampled()) {
                    InitialContentsTag::Multisampled
                } else {
                    InitialContentsTag::Copy
                };
                self.base
                    .set_initial_contents(id, InitialContents::resource(tag, upload));
            }
            SerialisedPayload::Samples { data, .. } => {
                let live = self.base.get_live_resource(id)?;
                let upload = self.device.create_upload(&live, &data)?;
                self.base.set_initial_contents(
                    id,
                    InitialContents::resource(InitialContentsTag::Multisampled, upload),
                );
            }
        }

        Ok(id)
    }
}

impl InitialStateHandler for D3D12ResourceManager {
    type Config = D3D12ManagerConfig;

    fn resource_manager(&self) -> &ResourceManager<D3D12ManagerConfig> {
        &self.base
    }

    fn capture_options(&self) -> &CaptureOptions {
        &self.options
    }

    fn force_initial_state(&self, obj: &ObjectRef) -> bool {
        match obj.resource_type() {
            ResourceType::Resource => {
                self.options.save_all_initials
                    || obj.resource_desc().is_some_and(|d| d.is_output_target())
            }
            ResourceType::DescriptorHeap => self.options.save_all_initials,
            _ => false,
        }
    }

    fn need_initial_state_chunk(&self, obj: &ObjectRef, contents: &InitialContents) -> bool {
        match obj.resource_type() {
            ResourceType::DescriptorHeap => {
                obj.descriptor_heap().is_some_and(|h| h.num_descriptors() > 0)
                    && matches!(&contents.payload, InitialPayload::Descriptors(d) if !d.is_empty())
            }
            ResourceType::Resource => true,
            _ => false,
        }
    }

    fn prepare_initial_state(&self, obj: &ObjectRef) -> Result<Option<InitialContents>> {
        let id = obj.resource_id();
        match obj.resource_type() {
            ResourceType::DescriptorHeap => {
                let heap = obj.descriptor_heap().ok_or(CaptureError::UnexpectedType {
                    id,
                    found: ResourceType::DescriptorHeap,
                })?;
                Ok(Some(InitialContents::descriptors(heap.snapshot())))
            }
            ResourceType::Resource => {
                let Some(desc) = obj.resource_desc() else {
                    return Ok(None);
                };

                let contents = if desc.is_multisampled() {
                    let staging = self.device.copy_samples_to_readback(obj)?;
                    InitialContents::resource(InitialContentsTag::Multisampled, staging)
                } else if obj.heap_type() == Some(HeapType::Readback) {
                    InitialContents::map_direct()
                } else {
                    let staging = self.device.copy_to_readback(obj)?;
                    InitialContents::resource(InitialContentsTag::Copy, staging)
                };
                trace!(%id, tag = ?contents.tag, "prepared initial state");
                Ok(Some(contents))
            }
            other => {
                trace!(%id, resource_type = ?other, "no initial state for object type");
                Ok(None)
            }
        }
    }

    fn get_size_initial_state(&self, id: ResourceId, contents: &InitialContents) -> u64 {
        let overhead = self.options.initial_state_chunk_overhead;
        let payload = match &contents.payload {
            InitialPayload::Descriptors(d) => 4 + d.len() as u64 * DESCRIPTOR_RECORD_SIZE as u64,
            InitialPayload::Resource(staging) => {
                // sample count and per-sample length, or just the byte length
                let header = if contents.tag == InitialContentsTag::Multisampled { 12 } else { 8 };
                header + staging.resource_desc().map_or(0, |d| d.width)
            }
            InitialPayload::None => {
                let width = self
                    .base
                    .get_current_resource(id)
                    .ok()
                    .and_then(|obj| obj.resource_desc().map(|d| d.width))
                    .unwrap_or(0);
                8 + width
            }
        };
        payload + overhead
    }

    fn serialise_initial_state(
        &self,
        w: &mut dyn Write,
        id: ResourceId,
        obj: &ObjectRef,
        contents: &InitialContents,
    ) -> Result<()> {
        let payload = match (&contents.payload, contents.tag) {
            (InitialPayload::Descriptors(d), _) => {
                SerialisedPayload::Descriptors(d.iter().map(Descriptor::encode).collect())
            }
            (InitialPayload::Resource(staging), InitialContentsTag::Multisampled) => {
                let sample_count = obj.resource_desc().map_or(1, |d| d.sample_count.max(1));
                SerialisedPayload::Samples {
                    sample_count,
                    data: self.device.read_contents(staging)?,
                }
            }
            (InitialPayload::Resource(staging), _) => {
                SerialisedPayload::Bytes(self.device.read_contents(staging)?)
            }
            (InitialPayload::None, InitialContentsTag::MapDirect) => {
                SerialisedPayload::Bytes(self.device.read_contents(obj)?)
            }
            (InitialPayload::None, _) => SerialisedPayload::Bytes(Vec::new()),
        };

        write_initial_state_chunk(
            w,
            &SerialisedInitialState {
                id,
                resource_type: contents.resource_type,
                tag: contents.tag,
                payload,
            },
        )?;
        Ok(())
    }

    fn create_initial_state(&self, id: ResourceId, live: &ObjectRef) -> Result<()> {
        match live.resource_type() {
            ResourceType::DescriptorHeap => {
                error!(%id, "descriptor heap has no initial contents in the capture");
                Ok(())
            }
            ResourceType::Resource => {
                let staging = self.device.copy_to_readback(live)?;
                self.base.set_initial_contents(
                    id,
                    InitialContents::resource(InitialContentsTag::Copy, staging),
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn apply_initial_state(&self, live: &ObjectRef, contents: &InitialContents) -> Result<()> {
        match &contents.payload {
            InitialPayload::Descriptors(descriptors) => {
                let heap = live.descriptor_heap().ok_or(CaptureError::UnexpectedType {
                    id: live.resource_id(),
                    found: live.resource_type(),
                })?;
                let heap_type = heap.desc().heap_type;

                for (i, src) in descriptors.iter().enumerate().take(heap.num_descriptors() as usize) {
                    let index = i as u32;
                    let Some(dst) = heap.write(index, |dst| {
                        dst.copy_from(src);
                        dst.clone()
                    }) else {
                        continue;
                    };
                    dst.create(heap_type, self.device.as_ref(), heap.cpu_handle(index));
                }
                Ok(())
            }
            InitialPayload::Resource(upload) => {
                if contents.tag == InitialContentsTag::Multisampled {
                    self.device.copy_samples_from_array(live, upload)?;
                } else {
                    self.device.copy_resource(live, upload)?;
                }
                Ok(())
            }
            InitialPayload::None => Ok(()),
        }
    }
}
