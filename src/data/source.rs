use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use crate::error::SourceError;

// ---------------------------------------------------------------------------
// Object retrieval seam
// ---------------------------------------------------------------------------

/// Something that hands back the raw bytes of an object given
/// (container, key) – a bucket/key pair in object-storage terms.
///
/// Fetches are blocking; a single call either returns the whole object or fails.
pub trait ObjectSource: Send + Sync {
    fn fetch(&self, container: &str, key: &str) -> Result<Vec<u8>, SourceError>;
}

// ---------------------------------------------------------------------------
// Filesystem-backed store
// ---------------------------------------------------------------------------

/// Object store laid out on disk as `<root>/<container>/<key>`.
#[derive(Debug, Clone)]
pub struct FsObjectSource {
    root: PathBuf,
}

impl FsObjectSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an object path, refusing keys that would leave the container.
    fn object_path(&self, container: &str, key: &str) -> Result<PathBuf, SourceError> {
        let escapes = |p: &str| {
            Path::new(p)
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        };
        if container.is_empty() || escapes(container) || escapes(key) {
            return Err(SourceError::AccessDenied {
                container: container.to_string(),
                key: key.to_string(),
            });
        }
        Ok(self.root.join(container).join(key))
    }
}

impl ObjectSource for FsObjectSource {
    fn fetch(&self, container: &str, key: &str) -> Result<Vec<u8>, SourceError> {
        let path = self.object_path(container, key)?;
        log::debug!("reading object {}", path.display());
        std::fs::read(&path).map_err(|e| SourceError::from_io(&e, container, key))
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Thread-safe in-memory object store.
#[derive(Debug, Default)]
pub struct MemoryObjectSource {
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or replace) an object.
    pub fn put(&self, container: &str, key: &str, bytes: impl Into<Vec<u8>>) {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((container.to_string(), key.to_string()), bytes.into());
    }

    /// Remove an object, returning whether it existed.
    pub fn remove(&self, container: &str, key: &str) -> bool {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(container.to_string(), key.to_string()))
            .is_some()
    }
}

impl ObjectSource for MemoryObjectSource {
    fn fetch(&self, container: &str, key: &str) -> Result<Vec<u8>, SourceError> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(container.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| SourceError::NotFound {
                container: container.to_string(),
                key: key.to_string(),
            })
    }
}
