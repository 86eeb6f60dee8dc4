//! Resource identity tracking shared by capture and replay.
//!
//! [`ResourceManager`] is generic over a [`ResourceManagerConfig`] naming the wrapped object,
//! native object, record and initial-contents types of one graphics API.

use std::fmt;

use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use crate::error::{CaptureError, Result};
use crate::id::ResourceId;

/// Identity of an object for reverse lookups (typically its address).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey(pub usize);

pub trait ResourceManagerConfig {
    /// Object handed to the application.
    type WrappedResource: Clone;
    /// Underlying driver object.
    type RealResource;
    type Record: Clone;
    type InitialContents;

    fn wrapped_key(res: &Self::WrappedResource) -> ObjectKey;
    fn real_key(res: &Self::RealResource) -> ObjectKey;
    fn create_record(id: ResourceId) -> Self::Record;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CaptureState {
    Loading,
    Replaying,
    #[default]
    BackgroundCapturing,
    ActiveCapturing,
}

impl CaptureState {
    pub fn is_replay_mode(self) -> bool {
        matches!(self, Self::Loading | Self::Replaying)
    }

    pub fn is_capture_mode(self) -> bool {
        !self.is_replay_mode()
    }

    pub fn is_active_capturing(self) -> bool {
        self == Self::ActiveCapturing
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Loading => "loading",
            Self::Replaying => "replaying",
            Self::BackgroundCapturing => "background capturing",
            Self::ActiveCapturing => "active capturing",
        };
        f.write_str(s)
    }
}

/// How a resource is referenced in the captured frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FrameRefType {
    #[default]
    None,
    Read,
    /// Completely overwritten before any read; pre-frame contents are not needed.
    Write,
    /// Read, then written; pre-frame contents are needed.
    ReadBeforeWrite,
}

impl FrameRefType {
    /// Combine an existing reference with a later one.
    pub fn compose(self, later: FrameRefType) -> FrameRefType {
        match (self, later) {
            (Self::None, later) => later,
            (earlier, Self::None) => earlier,
            (Self::Read, Self::Write | Self::ReadBeforeWrite) => Self::ReadBeforeWrite,
            (Self::Read, Self::Read) => Self::Read,
            (Self::Write, _) => Self::Write,
            (Self::ReadBeforeWrite, _) => Self::ReadBeforeWrite,
        }
    }

    /// True when the resource's contents before the frame are observable.
    pub fn needs_initial_contents(self) -> bool {
        matches!(self, Self::Read | Self::ReadBeforeWrite)
    }
}

struct IdMap<W> {
    by_id: HashMap<ResourceId, W>,
    by_key: HashMap<ObjectKey, ResourceId>,
}

impl<W> Default for IdMap<W> {
    fn default() -> Self {
        Self {
            by_id: HashMap::new(),
            by_key: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct FrameState {
    refs: HashMap<ResourceId, FrameRefType>,
    dirty: HashSet<ResourceId>,
}

/// Bidirectional id <-> object tables plus per-resource capture state.
///
/// Every table has its own lock, held only for the duration of one operation.
pub struct ResourceManager<C: ResourceManagerConfig> {
    state: RwLock<CaptureState>,
    /// Objects current during capture, keyed by their own id.
    current: Mutex<IdMap<C::WrappedResource>>,
    /// Replay-side replacements, keyed by the original id they stand in for.
    live: Mutex<IdMap<C::WrappedResource>>,
    wrappers: Mutex<HashMap<ObjectKey, C::WrappedResource>>,
    records: Mutex<HashMap<ResourceId, C::Record>>,
    initial_contents: Mutex<HashMap<ResourceId, C::InitialContents>>,
    frame: Mutex<FrameState>,
}

impl<C: ResourceManagerConfig> Default for ResourceManager<C> {
    fn default() -> Self {
        Self::new(CaptureState::default())
    }
}

impl<C: ResourceManagerConfig> ResourceManager<C> {
    pub fn new(state: CaptureState) -> Self {
        Self {
            state: RwLock::new(state),
            current: Mutex::new(IdMap::default()),
            live: Mutex::new(IdMap::default()),
            wrappers: Mutex::new(HashMap::new()),
            records: Mutex::new(HashMap::new()),
            initial_contents: Mutex::new(HashMap::new()),
            frame: Mutex::new(FrameState::default()),
        }
    }

    pub fn capture_state(&self) -> CaptureState {
        *self.state.read()
    }

    pub fn set_capture_state(&self, state: CaptureState) {
        let mut s = self.state.write();
        let from = *s;
        if from != state {
            debug!(%from, to = %state, "capture state changed");
        }
        *s = state;
    }

    /// Id of `obj`: its own id if it is a current object, or the original id a live
    /// replacement stands in for. Null when unknown.
    pub fn get_id(&self, obj: &C::WrappedResource) -> ResourceId {
        let key = C::wrapped_key(obj);
        if let Some(&id) = self.current.lock().by_key.get(&key) {
            return id;
        }
        self.live
            .lock()
            .by_key
            .get(&key)
            .copied()
            .unwrap_or(ResourceId::NULL)
    }

    pub fn add_current_resource(&self, id: ResourceId, obj: C::WrappedResource) {
        let key = C::wrapped_key(&obj);
        let mut current = self.current.lock();
        if let Some(old) = current.by_id.insert(id, obj) {
            debug_assert!(false, "{id} already has a current resource");
            error!(%id, "replacing already registered current resource");
            current.by_key.remove(&C::wrapped_key(&old));
        }
        current.by_key.insert(key, id);
    }

    pub fn has_current_resource(&self, id: ResourceId) -> bool {
        self.current.lock().by_id.contains_key(&id)
    }

    pub fn get_current_resource(&self, id: ResourceId) -> Result<C::WrappedResource> {
        self.current
            .lock()
            .by_id
            .get(&id)
            .cloned()
            .ok_or(CaptureError::NotFound(id))
    }

    /// Forget `id` as a current object. Called when the application releases it.
    pub fn release_current_resource(&self, id: ResourceId) {
        {
            let mut current = self.current.lock();
            match current.by_id.remove(&id) {
                Some(obj) => {
                    current.by_key.remove(&C::wrapped_key(&obj));
                }
                None => debug!(%id, "releasing resource that was never current"),
            }
        }

        let mut frame = self.frame.lock();
        frame.dirty.remove(&id);
        frame.refs.remove(&id);
    }

    /// All current objects, in id order.
    pub fn current_resources(&self) -> Vec<(ResourceId, C::WrappedResource)> {
        let mut all: Vec<_> = self
            .current
            .lock()
            .by_id
            .iter()
            .map(|(&id, obj)| (id, obj.clone()))
            .collect();
        all.sort_unstable_by_key(|&(id, _)| id);
        all
    }

    /// Register `obj` as the replay-side replacement for `original_id`.
    pub fn add_live_resource(&self, original_id: ResourceId, obj: C::WrappedResource) {
        let key = C::wrapped_key(&obj);
        let mut live = self.live.lock();
        if let Some(old) = live.by_id.insert(original_id, obj) {
            debug!(%original_id, "replacing live resource");
            live.by_key.remove(&C::wrapped_key(&old));
        }
        live.by_key.insert(key, original_id);
    }

    pub fn has_live_resource(&self, original_id: ResourceId) -> bool {
        self.live.lock().by_id.contains_key(&original_id)
    }

    pub fn get_live_resource(&self, original_id: ResourceId) -> Result<C::WrappedResource> {
        self.live
            .lock()
            .by_id
            .get(&original_id)
            .cloned()
            .ok_or(CaptureError::NotFound(original_id))
    }

    /// All live replacements with the original ids they stand in for, in id order.
    pub fn live_resources(&self) -> Vec<(ResourceId, C::WrappedResource)> {
        let mut all: Vec<_> = self
            .live
            .lock()
            .by_id
            .iter()
            .map(|(&id, obj)| (id, obj.clone()))
            .collect();
        all.sort_unstable_by_key(|&(id, _)| id);
        all
    }

    pub fn erase_live_resource(&self, original_id: ResourceId) {
        let mut live = self.live.lock();
        if let Some(obj) = live.by_id.remove(&original_id) {
            live.by_key.remove(&C::wrapped_key(&obj));
        }
    }

    pub fn add_wrapper(&self, wrapped: C::WrappedResource, real: &C::RealResource) {
        let key = C::real_key(real);
        if self.wrappers.lock().insert(key, wrapped).is_some() {
            debug_assert!(false, "native object {key:?} is already wrapped");
            error!(?key, "native object wrapped twice");
        }
    }

    pub fn get_wrapper(&self, real: &C::RealResource) -> Option<C::WrappedResource> {
        self.wrappers.lock().get(&C::real_key(real)).cloned()
    }

    pub fn remove_wrapper(&self, real: &C::RealResource) {
        self.wrappers.lock().remove(&C::real_key(real));
    }

    pub fn add_resource_record(&self, id: ResourceId) -> C::Record {
        let record = C::create_record(id);
        if self.records.lock().insert(id, record.clone()).is_some() {
            debug_assert!(false, "{id} already has a resource record");
            error!(%id, "replacing existing resource record");
        }
        record
    }

    pub fn get_resource_record(&self, id: ResourceId) -> Option<C::Record> {
        self.records.lock().get(&id).cloned()
    }

    pub fn has_resource_record(&self, id: ResourceId) -> bool {
        self.records.lock().contains_key(&id)
    }

    pub fn remove_resource_record(&self, id: ResourceId) -> Option<C::Record> {
        self.records.lock().remove(&id)
    }

    /// All records, in id order.
    pub fn resource_records(&self) -> Vec<(ResourceId, C::Record)> {
        let mut all: Vec<_> = self
            .records
            .lock()
            .iter()
            .map(|(&id, r)| (id, r.clone()))
            .collect();
        all.sort_unstable_by_key(|&(id, _)| id);
        all
    }

    pub fn set_initial_contents(&self, id: ResourceId, contents: C::InitialContents) {
        self.initial_contents.lock().insert(id, contents);
    }

    pub fn get_initial_contents(&self, id: ResourceId) -> Option<C::InitialContents>
    where
        C::InitialContents: Clone,
    {
        self.initial_contents.lock().get(&id).cloned()
    }

    pub fn take_initial_contents(&self, id: ResourceId) -> Option<C::InitialContents> {
        self.initial_contents.lock().remove(&id)
    }

    pub fn has_initial_contents(&self, id: ResourceId) -> bool {
        self.initial_contents.lock().contains_key(&id)
    }

    /// Ids with prepared initial contents, in id order.
    pub fn initial_contents_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<_> = self.initial_contents.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn clear_initial_contents(&self) {
        self.initial_contents.lock().clear();
    }

    pub fn mark_resource_frame_referenced(&self, id: ResourceId, ref_type: FrameRefType) {
        if id.is_null() {
            return;
        }
        let mut frame = self.frame.lock();
        let entry = frame.refs.entry(id).or_insert(FrameRefType::None);
        *entry = entry.compose(ref_type);
    }

    pub fn frame_reference(&self, id: ResourceId) -> FrameRefType {
        self.frame
            .lock()
            .refs
            .get(&id)
            .copied()
            .unwrap_or_default()
    }

    pub fn frame_references(&self) -> HashMap<ResourceId, FrameRefType> {
        self.frame.lock().refs.clone()
    }

    pub fn clear_frame_references(&self) {
        self.frame.lock().refs.clear();
    }

    /// Note that `id`'s contents changed since the last initial-state snapshot.
    pub fn mark_dirty_resource(&self, id: ResourceId) {
        if !id.is_null() {
            self.frame.lock().dirty.insert(id);
        }
    }

    pub fn mark_clean_resource(&self, id: ResourceId) {
        self.frame.lock().dirty.remove(&id);
    }

    pub fn is_resource_dirty(&self, id: ResourceId) -> bool {
        self.frame.lock().dirty.contains(&id)
    }

    /// Dirty ids, in id order.
    pub fn dirty_resources(&self) -> Vec<ResourceId> {
        let mut ids: Vec<_> = self.frame.lock().dirty.iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}
