//! Content-addressable blob storage for the distributed file store.
//!
//! A store maps arbitrary string keys to deterministic locations under a
//! configured root directory and persists byte streams there.
//!
//! # Path Transforms
//!
//! - [`PathTransform::Identity`] -- the key is used as both directory and
//!   file name
//! - [`PathTransform::ContentAddressed`] -- the SHA-1 hex digest of the key is
//!   split into nested 5-character directories, the leaf is the full digest
//!
//! # Storage Backends
//!
//! All backends implement the [`BlobStore`] trait:
//!
//! - [`DiskStore`] -- filesystem store under a single root
//! - [`InMemoryBlobStore`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Key-to-path mapping is a pure function of the key and the transform.
//! 2. Callers receive copies of blob data, never handles into the store.
//! 3. Deleting a key removes its whole top-level shard.
//! 4. There is no locking; concurrent writers to one key race.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod disk;
pub mod error;
pub mod memory;
pub mod path;
pub mod traits;

pub use disk::{DiskStore, StoreConfig, DEFAULT_ROOT};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryBlobStore;
pub use path::{PathKey, PathTransform, CAS_BLOCK_SIZE};
pub use traits::{BlobReader, BlobStore};
