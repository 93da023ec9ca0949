use std::io::{Cursor, Read};

use crate::error::StoreResult;

/// Readable, fully buffered copy of a stored blob.
pub type BlobReader = Cursor<Vec<u8>>;

/// Key-addressed blob store.
///
/// All implementations must satisfy these invariants:
/// - A key maps to exactly one location for the lifetime of the store's
///   configuration.
/// - Callers only ever receive copies of stored bytes, never a handle into
///   the backing storage.
/// - `read` and `delete` on a missing key fail with
///   [`StoreError::NotFound`](crate::StoreError::NotFound).
/// - There is no locking: concurrent writers to the same key race.
pub trait BlobStore: Send + Sync {
    /// Copy the entire `reader` into the blob for `key`, replacing any
    /// previous content. Returns the number of bytes written.
    ///
    /// A failure part-way through the copy leaves a partially written blob.
    fn write(&self, key: &str, reader: &mut dyn Read) -> StoreResult<u64>;

    /// Read the whole blob for `key` into memory.
    fn read(&self, key: &str) -> StoreResult<BlobReader>;

    /// Whether a blob exists for `key`. Content is not validated.
    fn has(&self, key: &str) -> bool;

    /// Remove the blob for `key` together with its whole shard.
    ///
    /// Every key whose location shares the same top-level directory is
    /// removed as well; callers must not rely on single-key granularity.
    fn delete(&self, key: &str) -> StoreResult<()>;

    /// Remove everything. Succeeds on an already-empty store.
    fn clear(&self) -> StoreResult<()>;

    /// Convenience wrapper over [`write`](Self::write) for in-memory data.
    fn write_bytes(&self, key: &str, data: &[u8]) -> StoreResult<u64> {
        let mut reader = data;
        self.write(key, &mut reader)
    }

    /// Convenience wrapper over [`read`](Self::read) returning the bytes.
    fn read_bytes(&self, key: &str) -> StoreResult<Vec<u8>> {
        Ok(self.read(key)?.into_inner())
    }
}
