use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::{StoreError, StoreResult};

/// Width, in hex characters, of each directory segment produced by the
/// content-addressed transform.
pub const CAS_BLOCK_SIZE: usize = 5;

/// Location of a blob relative to the store root.
///
/// `dir` is a `/`-separated relative directory, `file_name` is the leaf.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PathKey {
    pub dir: String,
    pub file_name: String,
}

impl PathKey {
    /// Absolute location of the blob file under `root`.
    pub fn full_path(&self, root: &Path) -> PathBuf {
        self.dir_path(root).join(&self.file_name)
    }

    /// Directory holding the blob file under `root`.
    pub fn dir_path(&self, root: &Path) -> PathBuf {
        root.join(&self.dir)
    }

    /// The first segment of `dir`.
    ///
    /// For the content-addressed layout this is the first hash block, so
    /// every key sharing it lives in the same shard.
    pub fn first_segment(&self) -> &str {
        self.dir.split('/').next().unwrap_or(&self.dir)
    }

    /// Top-level directory of this key under `root`.
    pub fn shard(&self, root: &Path) -> PathBuf {
        root.join(self.first_segment())
    }
}

/// Policy mapping a store key to a [`PathKey`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathTransform {
    /// `dir = key`, `file_name = key`.
    Identity,
    /// SHA-1 of the key, hex-encoded, split into nested
    /// [`CAS_BLOCK_SIZE`]-character directories; the leaf is the full digest.
    #[default]
    ContentAddressed,
}

impl PathTransform {
    /// Map `key` to its location. Pure and deterministic.
    pub fn apply(&self, key: &str) -> PathKey {
        match self {
            Self::Identity => PathKey {
                dir: key.to_string(),
                file_name: key.to_string(),
            },
            Self::ContentAddressed => cas_path(key),
        }
    }

    /// Reject keys whose location would be empty or escape the store root.
    pub fn validate(&self, key: &str) -> StoreResult<()> {
        if key.is_empty() {
            return Err(invalid(key, "empty key"));
        }
        if *self == Self::Identity {
            let path = Path::new(key);
            for component in path.components() {
                match component {
                    Component::Normal(_) => {}
                    Component::CurDir | Component::ParentDir => {
                        return Err(invalid(key, "relative path components are not allowed"));
                    }
                    Component::RootDir | Component::Prefix(_) => {
                        return Err(invalid(key, "absolute paths are not allowed"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate `key` and map it to its location.
    pub fn locate(&self, key: &str) -> StoreResult<PathKey> {
        self.validate(key)?;
        Ok(self.apply(key))
    }
}

impl std::fmt::Display for PathTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identity => write!(f, "identity"),
            Self::ContentAddressed => write!(f, "content-addressed"),
        }
    }
}

fn cas_path(key: &str) -> PathKey {
    let digest = hex::encode(Sha1::digest(key.as_bytes()));
    let blocks = digest.len() / CAS_BLOCK_SIZE;
    let segments: Vec<&str> = (0..blocks)
        .map(|i| &digest[i * CAS_BLOCK_SIZE..(i + 1) * CAS_BLOCK_SIZE])
        .collect();
    PathKey {
        dir: segments.join("/"),
        file_name: digest,
    }
}

fn invalid(key: &str, reason: &str) -> StoreError {
    StoreError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cas_transform_matches_fixture() {
        let path = PathTransform::ContentAddressed.apply("SomeKey");
        assert_eq!(path.dir, "bf5cd/77691/581e6/a59f8/e3306/703cf/eccb6/e3849");
        assert_eq!(path.file_name, "bf5cd77691581e6a59f8e3306703cfeccb6e3849");
        assert_eq!(path.first_segment(), "bf5cd");
    }

    #[test]
    fn identity_transform() {
        let path = PathTransform::Identity.apply("photos");
        assert_eq!(path.dir, "photos");
        assert_eq!(path.file_name, "photos");
        assert_eq!(path.full_path(Path::new("root")), PathBuf::from("root/photos/photos"));
    }

    #[test]
    fn shard_is_first_segment_under_root() {
        let path = PathTransform::ContentAddressed.apply("SomeKey");
        assert_eq!(path.shard(Path::new("root")), PathBuf::from("root/bf5cd"));

        let nested = PathTransform::Identity.apply("a/b");
        assert_eq!(nested.first_segment(), "a");
    }

    #[test]
    fn empty_key_rejected() {
        for transform in [PathTransform::Identity, PathTransform::ContentAddressed] {
            let err = transform.locate("").unwrap_err();
            assert!(matches!(err, StoreError::InvalidKey { .. }));
        }
    }

    #[test]
    fn identity_rejects_escaping_keys() {
        assert!(PathTransform::Identity.validate("../etc").is_err());
        assert!(PathTransform::Identity.validate("/etc/passwd").is_err());
        assert!(PathTransform::Identity.validate("./a").is_err());
        assert!(PathTransform::Identity.validate("docs/readme").is_ok());
        // Hashing makes any key safe.
        assert!(PathTransform::ContentAddressed.validate("../etc").is_ok());
    }

    #[test]
    fn display_names() {
        assert_eq!(PathTransform::Identity.to_string(), "identity");
        assert_eq!(PathTransform::ContentAddressed.to_string(), "content-addressed");
    }

    proptest! {
        #[test]
        fn cas_transform_is_deterministic(key in ".{1,64}") {
            let a = PathTransform::ContentAddressed.apply(&key);
            let b = PathTransform::ContentAddressed.apply(&key);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.file_name.len(), 40);
            prop_assert_eq!(a.dir.split('/').count(), 8);
            prop_assert!(a.dir.split('/').all(|s| s.len() == CAS_BLOCK_SIZE));
        }
    }
}
