use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashSet;

static NEXT_CHUNK_ID: AtomicU64 = AtomicU64::new(1);

/// One serialized unit of recorded capture data.
///
/// Chunks are produced by the serializer and are opaque here; the sequence id is taken from a
/// process-wide counter when the chunk is created, so ordering by id is recording order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    id: u64,
    kind: u32,
    data: Vec<u8>,
}

impl Chunk {
    pub fn new(kind: u32, data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CHUNK_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            data,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> u32 {
        self.kind
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Chunks in insertion order, each sequence id at most once.
///
/// Dependency closure appends parents before children, so the list order is the order the
/// chunks must be serialized in regardless of when each chunk was created.
#[derive(Debug, Clone, Default)]
pub struct ChunkList {
    chunks: Vec<Arc<Chunk>>,
    ids: HashSet<u64>,
}

impl ChunkList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` unless a chunk with the same id is already listed.
    pub fn push(&mut self, chunk: Arc<Chunk>) -> bool {
        if !self.ids.insert(chunk.id()) {
            return false;
        }
        self.chunks.push(chunk);
        true
    }

    pub fn extend_from(&mut self, other: &ChunkList) {
        for chunk in &other.chunks {
            self.push(Arc::clone(chunk));
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.ids.clear();
    }

    pub fn iter(&self) -> slice::Iter<'_, Arc<Chunk>> {
        self.chunks.iter()
    }
}

impl<'a> IntoIterator for &'a ChunkList {
    type Item = &'a Arc<Chunk>;
    type IntoIter = slice::Iter<'a, Arc<Chunk>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_follow_creation_order() {
        let a = Chunk::new(1, vec![]);
        let b = Chunk::new(1, vec![]);
        assert!(a.id() < b.id());
    }

    #[test]
    fn list_keeps_insertion_order_and_drops_repeats() {
        let early = Chunk::new(1, vec![]);
        let late = Chunk::new(2, vec![]);

        let mut list = ChunkList::new();
        assert!(list.push(Arc::clone(&late)));
        assert!(list.push(Arc::clone(&early)));
        assert!(!list.push(Arc::clone(&late)));

        let kinds: Vec<u32> = list.iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec![2, 1]);
        assert!(list.contains(early.id()));

        list.clear();
        assert!(list.is_empty());
        assert!(!list.contains(early.id()));
    }
}
