use std::collections::HashMap;
use std::io::Read;
use std::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::path::{PathKey, PathTransform};
use crate::traits::{BlobReader, BlobStore};

/// In-memory, HashMap-based blob store.
///
/// Intended for tests and embedding. Blobs are keyed by their [`PathKey`] so
/// deletion follows the same shard semantics as the disk store.
pub struct InMemoryBlobStore {
    transform: PathTransform,
    blobs: RwLock<HashMap<PathKey, Vec<u8>>>,
}

impl InMemoryBlobStore {
    /// Create a new empty store using the content-addressed transform.
    pub fn new() -> Self {
        Self::with_transform(PathTransform::ContentAddressed)
    }

    pub fn with_transform(transform: PathTransform) -> Self {
        Self {
            transform,
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored blobs.
    pub fn total_bytes(&self) -> u64 {
        self.blobs
            .read()
            .expect("lock poisoned")
            .values()
            .map(|data| data.len() as u64)
            .sum()
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn write(&self, key: &str, reader: &mut dyn Read) -> StoreResult<u64> {
        let location = self.transform.locate(key)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        let written = data.len() as u64;
        self.blobs
            .write()
            .expect("lock poisoned")
            .insert(location, data);
        Ok(written)
    }

    fn read(&self, key: &str) -> StoreResult<BlobReader> {
        let location = self.transform.locate(key)?;
        let map = self.blobs.read().expect("lock poisoned");
        map.get(&location)
            .cloned()
            .map(BlobReader::new)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn has(&self, key: &str) -> bool {
        match self.transform.locate(key) {
            Ok(location) => self
                .blobs
                .read()
                .expect("lock poisoned")
                .contains_key(&location),
            Err(_) => false,
        }
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let location = self.transform.locate(key)?;
        let mut map = self.blobs.write().expect("lock poisoned");
        if !map.contains_key(&location) {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let shard = location.first_segment();
        map.retain(|path, _| path.first_segment() != shard);
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        self.blobs.write().expect("lock poisoned").clear();
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("transform", &self.transform)
            .field("blob_count", &self.len())
            .finish()
    }
}
