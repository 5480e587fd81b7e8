//! Blob store for raw objects.
//!
//! Datasets and rendered deliverables live in object storage. The local
//! implementation keeps blobs under a root directory; cloud-vendor backends
//! implement the same trait.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Object storage for raw bytes, keyed by path-like strings.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetches a blob's bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermanentIo`] when the key does not exist.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Stores a blob, replacing any existing object at the key.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Lists keys under a prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Filesystem-backed blob store rooted at a directory.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Creates a blob store rooted at `root`, creating the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be created.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Resolves a key to a path under the root, rejecting traversal.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let key = key.trim_start_matches('/');
        if key.is_empty() || key.split('/').any(|part| part == "..") {
            return Err(Error::permanent(format!("invalid blob key: {key}")));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        std::fs::read(&path)
            .map_err(|_| Error::permanent(format!("blob not found: {key}")))
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    let key = rel.to_string_lossy().replace('\\', "/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
