use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::path::{PathKey, PathTransform};
use crate::traits::{BlobReader, BlobStore};

/// Root directory used when none is configured.
pub const DEFAULT_ROOT: &str = "store";

/// Configuration for a [`DiskStore`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory every blob lives under.
    pub root: PathBuf,
    /// Key-to-path policy.
    pub transform: PathTransform,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            transform: PathTransform::default(),
        }
    }
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>, transform: PathTransform) -> Self {
        Self {
            root: root.into(),
            transform,
        }
    }
}

/// Filesystem-backed blob store.
///
/// Every operation touches only paths under the configured root. Reads are
/// buffered entirely in memory, which suits the small files this store is
/// meant for.
#[derive(Clone, Debug)]
pub struct DiskStore {
    config: StoreConfig,
}

impl DiskStore {
    /// Create a store. An empty root falls back to [`DEFAULT_ROOT`].
    pub fn new(mut config: StoreConfig) -> Self {
        if config.root.as_os_str().is_empty() {
            config.root = PathBuf::from(DEFAULT_ROOT);
        }
        Self { config }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Location of `key`'s blob on disk.
    pub fn path_of(&self, key: &str) -> StoreResult<PathBuf> {
        Ok(self.locate(key)?.full_path(&self.config.root))
    }

    fn locate(&self, key: &str) -> StoreResult<PathKey> {
        self.config.transform.locate(key)
    }

    fn open_existing(&self, key: &str, path: &Path) -> StoreResult<File> {
        File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(key.to_string()),
            _ => StoreError::Io(e),
        })
    }
}

impl BlobStore for DiskStore {
    fn write(&self, key: &str, reader: &mut dyn Read) -> StoreResult<u64> {
        let location = self.locate(key)?;
        fs::create_dir_all(location.dir_path(&self.config.root))?;

        let path = location.full_path(&self.config.root);
        let mut file = File::create(&path)?;
        let written = io::copy(reader, &mut file)?;

        debug!(key, bytes = written, path = %path.display(), "wrote blob");
        Ok(written)
    }

    fn read(&self, key: &str) -> StoreResult<BlobReader> {
        let path = self.locate(key)?.full_path(&self.config.root);
        let mut file = self.open_existing(key, &path)?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        drop(file);

        debug!(key, bytes = buf.len(), "read blob");
        Ok(BlobReader::new(buf))
    }

    fn has(&self, key: &str) -> bool {
        match self.locate(key) {
            Ok(location) => location.full_path(&self.config.root).exists(),
            Err(_) => false,
        }
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let location = self.locate(key)?;
        if !location.full_path(&self.config.root).exists() {
            return Err(StoreError::NotFound(key.to_string()));
        }

        let shard = location.shard(&self.config.root);
        fs::remove_dir_all(&shard)?;

        debug!(key, shard = %shard.display(), "deleted blob shard");
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        match fs::remove_dir_all(&self.config.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
