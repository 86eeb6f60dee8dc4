//! Pre-frame resource contents: capture policy, chunk format and replay-side apply.
//!
//! Chunk layout (little-endian):
//!
//! ```text
//! u32 len         byte length of everything that follows
//! u32 type        ResourceType
//! u64 id
//! u32 tag         InitialContentsTag
//! payload         descriptor heaps: u32 count, count * 64-byte descriptor records
//!                 multisampled:     u32 sample count, u64 bytes per sample, sample bytes
//!                 otherwise:        u64 len, bytes
//! ```
//!
//! Readers stop after the payload and skip whatever trails it inside `len`.

use std::io::{Cursor, Write};

use tracing::{debug, trace, warn};

use crate::config::CaptureOptions;
use crate::descriptor::{Descriptor, DESCRIPTOR_RECORD_SIZE};
use crate::device::ObjectRef;
use crate::error::{Result, SerialiseError};
use crate::id::{ResourceId, ResourceType};
use crate::io::{ReadLeExt, WriteLeExt};
use crate::manager::{ResourceManager, ResourceManagerConfig};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum InitialContentsTag {
    /// Contents were copied to a staging object.
    #[default]
    Copy = 0,
    /// The resource is CPU-readable and is read directly when serialized.
    MapDirect = 1,
    /// Every sample was copied to consecutive slices of a staging object.
    Multisampled = 2,
}

impl InitialContentsTag {
    pub fn from_u32(v: u32) -> std::result::Result<Self, SerialiseError> {
        match v {
            0 => Ok(Self::Copy),
            1 => Ok(Self::MapDirect),
            2 => Ok(Self::Multisampled),
            other => Err(SerialiseError::UnknownTag(other)),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub enum InitialPayload {
    #[default]
    None,
    /// Snapshot of a descriptor heap.
    Descriptors(Vec<Descriptor>),
    /// Staging object (capture) or upload object (replay) holding the contents.
    Resource(ObjectRef),
}

/// Initial contents of one resource, as captured or as read back for replay.
#[derive(Clone, Debug)]
pub struct InitialContents {
    pub tag: InitialContentsTag,
    pub resource_type: ResourceType,
    pub payload: InitialPayload,
}

impl InitialContents {
    pub fn descriptors(descriptors: Vec<Descriptor>) -> Self {
        Self {
            tag: InitialContentsTag::Copy,
            resource_type: ResourceType::DescriptorHeap,
            payload: InitialPayload::Descriptors(descriptors),
        }
    }

    pub fn resource(tag: InitialContentsTag, object: ObjectRef) -> Self {
        Self {
            tag,
            resource_type: ResourceType::Resource,
            payload: InitialPayload::Resource(object),
        }
    }

    pub fn map_direct() -> Self {
        Self {
            tag: InitialContentsTag::MapDirect,
            resource_type: ResourceType::Resource,
            payload: InitialPayload::None,
        }
    }
}

/// Payload of an initial-state chunk, independent of any live object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SerialisedPayload {
    Descriptors(Vec<[u8; DESCRIPTOR_RECORD_SIZE]>),
    Bytes(Vec<u8>),
    Samples { sample_count: u32, data: Vec<u8> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerialisedInitialState {
    pub id: ResourceId,
    pub resource_type: ResourceType,
    pub tag: InitialContentsTag,
    pub payload: SerialisedPayload,
}

pub fn write_initial_state_chunk<W: Write + ?Sized>(
    w: &mut W,
    state: &SerialisedInitialState,
) -> std::result::Result<(), SerialiseError> {
    let mut body = Vec::new();
    body.write_u32_le(state.resource_type.as_u32())?;
    body.write_resource_id(state.id)?;
    body.write_u32_le(state.tag as u32)?;

    match &state.payload {
        SerialisedPayload::Descriptors(records) => {
            body.write_u32_le(records.len() as u32)?;
            for record in records {
                body.write_bytes(record)?;
            }
        }
        SerialisedPayload::Bytes(bytes) => body.write_len_prefixed_bytes_u64(bytes)?,
        SerialisedPayload::Samples { sample_count, data } => {
            if *sample_count == 0 || data.len() % *sample_count as usize != 0 {
                return Err(SerialiseError::Corrupt("sample data is not a whole number of samples"));
            }
            body.write_u32_le(*sample_count)?;
            body.write_u64_le((data.len() / *sample_count as usize) as u64)?;
            body.write_bytes(data)?;
        }
    }

    let len = u32::try_from(body.len()).map_err(|_| SerialiseError::Corrupt("chunk too large"))?;
    w.write_u32_le(len)?;
    w.write_bytes(&body)
}

pub fn read_initial_state_chunk<R: ReadLeExt + ?Sized>(
    r: &mut R,
) -> std::result::Result<SerialisedInitialState, SerialiseError> {
    let len = r.read_u32_le()?;
    let body = r.read_exact_vec(len as usize)?;
    let mut c = Cursor::new(body.as_slice());

    let raw_type = c.read_u32_le()?;
    let resource_type =
        ResourceType::from_u32(raw_type).ok_or(SerialiseError::UnknownResourceType(raw_type))?;
    let id = c.read_resource_id()?;
    let tag = InitialContentsTag::from_u32(c.read_u32_le()?)?;

    let payload = if resource_type == ResourceType::DescriptorHeap {
        let count = c.read_u32_le()? as usize;
        let remaining = body.len() - c.position() as usize;
        if count > remaining / DESCRIPTOR_RECORD_SIZE {
            return Err(SerialiseError::Corrupt("descriptor count exceeds chunk length"));
        }
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            let mut record = [0u8; DESCRIPTOR_RECORD_SIZE];
            std::io::Read::read_exact(&mut c, &mut record)?;
            records.push(record);
        }
        SerialisedPayload::Descriptors(records)
    } else if tag == InitialContentsTag::Multisampled {
        let sample_count = c.read_u32_le()?;
        let per_sample = c.read_u64_le()?;
        let total = per_sample
            .checked_mul(u64::from(sample_count))
            .and_then(|n| usize::try_from(n).ok())
            .ok_or(SerialiseError::Corrupt("sample data length overflow"))?;
        if total > body.len() - c.position() as usize {
            return Err(SerialiseError::Corrupt("sample data exceeds chunk length"));
        }
        SerialisedPayload::Samples {
            sample_count,
            data: c.read_exact_vec(total)?,
        }
    } else {
        let remaining = (body.len() as u64).saturating_sub(c.position() + 8);
        SerialisedPayload::Bytes(c.read_len_prefixed_bytes_u64(remaining)?)
    };

    let trailing = body.len() as u64 - c.position();
    if trailing > 0 {
        trace!(%id, trailing, "skipping trailing initial state bytes");
    }

    Ok(SerialisedInitialState {
        id,
        resource_type,
        tag,
        payload,
    })
}

/// Per-API initial-state policy. The provided methods drive it over every tracked resource.
pub trait InitialStateHandler {
    type Config: ResourceManagerConfig<WrappedResource = ObjectRef, InitialContents = InitialContents>;

    fn resource_manager(&self) -> &ResourceManager<Self::Config>;

    fn capture_options(&self) -> &CaptureOptions;

    /// Whether `obj` must be snapshotted regardless of whether the frame dirtied or read it.
    fn force_initial_state(&self, obj: &ObjectRef) -> bool;

    /// Whether `contents` produce a chunk at all.
    fn need_initial_state_chunk(&self, obj: &ObjectRef, contents: &InitialContents) -> bool;

    /// Snapshot the current contents of `obj`. `None` when the object has no contents to keep.
    fn prepare_initial_state(&self, obj: &ObjectRef) -> Result<Option<InitialContents>>;

    /// Serialized size estimate, chunk overhead included.
    fn get_size_initial_state(&self, id: ResourceId, contents: &InitialContents) -> u64;

    fn serialise_initial_state(
        &self,
        w: &mut dyn Write,
        id: ResourceId,
        obj: &ObjectRef,
        contents: &InitialContents,
    ) -> Result<()>;

    /// Create initial contents for a live object that has none in the capture.
    fn create_initial_state(&self, id: ResourceId, live: &ObjectRef) -> Result<()>;

    fn apply_initial_state(&self, live: &ObjectRef, contents: &InitialContents) -> Result<()>;

    /// Snapshot every dirty or forced resource. With `save_all_initials`, every resource.
    ///
    /// Snapshots are only stored once every resource succeeded; on error nothing changes.
    fn prepare_initial_contents(&self) -> Result<()> {
        let rm = self.resource_manager();
        let save_all = self.capture_options().save_all_initials;

        let mut prepared = Vec::new();
        for (id, obj) in rm.current_resources() {
            if !save_all && !rm.is_resource_dirty(id) && !self.force_initial_state(&obj) {
                continue;
            }
            match self.prepare_initial_state(&obj) {
                Ok(Some(contents)) => prepared.push((id, contents)),
                Ok(None) => {}
                Err(err) => {
                    warn!(%id, error = %err, staged = prepared.len(), "initial state capture failed");
                    return Err(err);
                }
            }
        }

        debug!(prepared = prepared.len(), "prepared initial contents");
        for (id, contents) in prepared {
            rm.set_initial_contents(id, contents);
        }
        Ok(())
    }

    /// Total serialized size of every prepared snapshot.
    fn initial_contents_size(&self) -> u64 {
        let rm = self.resource_manager();
        rm.initial_contents_ids()
            .into_iter()
            .filter_map(|id| Some(self.get_size_initial_state(id, &rm.get_initial_contents(id)?)))
            .sum()
    }

    /// Write a chunk for every prepared snapshot the frame needs. Returns the number written.
    ///
    /// Snapshots of resources the frame never referenced, or only overwrote, are skipped
    /// unless forced or `ref_all_resources` is set.
    fn insert_initial_contents_chunks(&self, w: &mut dyn Write) -> Result<usize> {
        let rm = self.resource_manager();
        let ref_all = self.capture_options().ref_all_resources;

        let mut written = 0usize;
        for id in rm.initial_contents_ids() {
            let Ok(obj) = rm.get_current_resource(id) else {
                debug!(%id, "resource released before its initial state was written");
                continue;
            };
            let Some(contents) = rm.get_initial_contents(id) else {
                continue;
            };

            let needed = ref_all
                || self.force_initial_state(&obj)
                || rm.frame_reference(id).needs_initial_contents();
            if !needed || !self.need_initial_state_chunk(&obj, &contents) {
                trace!(%id, "skipping initial state");
                continue;
            }

            self.serialise_initial_state(w, id, &obj, &contents)?;
            written += 1;
        }

        debug!(written, "inserted initial contents chunks");
        Ok(written)
    }

    /// Give every live replacement that has no snapshot in the capture the chance to create one.
    fn create_initial_contents(&self) -> Result<()> {
        let rm = self.resource_manager();
        for (id, live) in rm.live_resources() {
            if !rm.has_initial_contents(id) {
                self.create_initial_state(id, &live)?;
            }
        }
        Ok(())
    }

    /// Restore every snapshot into its live replacement.
    fn apply_initial_contents(&self) -> Result<()> {
        let rm = self.resource_manager();

        for id in rm.initial_contents_ids() {
            let Ok(live) = rm.get_live_resource(id) else {
                warn!(%id, "initial contents for a resource with no live replacement");
                continue;
            };
            let Some(contents) = rm.get_initial_contents(id) else {
                continue;
            };
            self.apply_initial_state(&live, &contents)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn chunks_round_trip_each_payload_kind() {
        let states = [
            SerialisedInitialState {
                id: ResourceId::from_raw(3),
                resource_type: ResourceType::DescriptorHeap,
                tag: InitialContentsTag::Copy,
                payload: SerialisedPayload::Descriptors(vec![[7u8; 64], [9u8; 64]]),
            },
            SerialisedInitialState {
                id: ResourceId::from_raw(4),
                resource_type: ResourceType::Resource,
                tag: InitialContentsTag::MapDirect,
                payload: SerialisedPayload::Bytes(b"bytes".to_vec()),
            },
            SerialisedInitialState {
                id: ResourceId::from_raw(5),
                resource_type: ResourceType::Resource,
                tag: InitialContentsTag::Multisampled,
                payload: SerialisedPayload::Samples {
                    sample_count: 4,
                    data: (0u8..16).collect(),
                },
            },
        ];

        let mut out = Vec::new();
        for s in &states {
            write_initial_state_chunk(&mut out, s).unwrap();
        }

        let mut r = Cursor::new(out);
        for s in &states {
            assert_eq!(&read_initial_state_chunk(&mut r).unwrap(), s);
        }
    }

    #[test]
    fn trailing_bytes_inside_a_chunk_are_skipped() {
        let state = SerialisedInitialState {
            id: ResourceId::from_raw(1),
            resource_type: ResourceType::Resource,
            tag: InitialContentsTag::Copy,
            payload: SerialisedPayload::Bytes(vec![1, 2, 3]),
        };
        let mut chunk = Vec::new();
        write_initial_state_chunk(&mut chunk, &state).unwrap();

        // grow the chunk by 5 bytes and append a second chunk after it
        let len = u32::from_le_bytes(chunk[..4].try_into().unwrap()) + 5;
        chunk[..4].copy_from_slice(&len.to_le_bytes());
        chunk.extend_from_slice(&[0xee; 5]);
        write_initial_state_chunk(&mut chunk, &state).unwrap();

        let mut r = Cursor::new(chunk);
        assert_eq!(read_initial_state_chunk(&mut r).unwrap(), state);
        assert_eq!(read_initial_state_chunk(&mut r).unwrap(), state);
    }

    #[test]
    fn corrupt_headers_are_rejected() {
        let mut chunk = Vec::new();
        chunk.write_u32_le(16).unwrap();
        chunk.write_u32_le(ResourceType::Resource.as_u32()).unwrap();
        chunk.write_u64_le(1).unwrap();
        chunk.write_u32_le(9).unwrap();
        assert!(matches!(
            read_initial_state_chunk(&mut Cursor::new(&chunk)),
            Err(SerialiseError::UnknownTag(9))
        ));

        let mut chunk = Vec::new();
        chunk.write_u32_le(20).unwrap();
        chunk.write_u32_le(ResourceType::DescriptorHeap.as_u32()).unwrap();
        chunk.write_u64_le(1).unwrap();
        chunk.write_u32_le(0).unwrap();
        chunk.write_u32_le(1000).unwrap();
        assert!(matches!(
            read_initial_state_chunk(&mut Cursor::new(&chunk)),
            Err(SerialiseError::Corrupt(_))
        ));
    }

    #[test]
    fn content_lengths_past_the_chunk_end_are_rejected() {
        let mut chunk = Vec::new();
        chunk.write_u32_le(28).unwrap();
        chunk.write_u32_le(ResourceType::Resource.as_u32()).unwrap();
        chunk.write_u64_le(1).unwrap();
        chunk.write_u32_le(InitialContentsTag::Copy as u32).unwrap();
        chunk.write_u64_le(u64::MAX / 2).unwrap();
        chunk.write_u32_le(0).unwrap();
        assert!(matches!(
            read_initial_state_chunk(&mut Cursor::new(&chunk)),
            Err(SerialiseError::Corrupt(_))
        ));
    }

    #[test]
    fn ragged_sample_data_is_rejected() {
        let state = SerialisedInitialState {
            id: ResourceId::from_raw(1),
            resource_type: ResourceType::Resource,
            tag: InitialContentsTag::Multisampled,
            payload: SerialisedPayload::Samples {
                sample_count: 4,
                data: vec![0; 6],
            },
        };
        assert!(write_initial_state_chunk(&mut Vec::new(), &state).is_err());
    }
}
