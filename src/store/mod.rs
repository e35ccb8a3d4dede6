//! Object Store Abstraction
//!
//! Container-addressed object storage for the ingest pipeline. Source
//! objects arrive in one container (named by the trigger event), compacted
//! objects and markers land in another, so every operation takes an
//! explicit `(container, key)` pair.
//!
//! A write either succeeds or fails as a whole; no partial-object states
//! are observable through this trait.
//!
//! Implementations:
//! - `MemoryObjectStore`: for unit tests and pipeline tests
//! - `LocalFsObjectStore`: for development and local runs
//! - `S3ObjectStore`: for production (feature-gated)

use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

#[cfg(feature = "s3")]
pub mod s3;
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;

/// Object store abstraction trait
///
/// Manual `Pin<Box<dyn Future>>` signatures keep the trait object-safe
/// without pulling in an async-trait shim.
pub trait ObjectStore: Send + Sync + 'static {
    /// Put an object (create or overwrite)
    fn put<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>>;

    /// Get an object's contents
    fn get<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<u8>>> + Send + 'a>>;

    /// Check if an object exists
    fn exists<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<bool>> + Send + 'a>>;

    /// List object keys under a prefix, in lexicographic order
    fn list<'a>(
        &'a self,
        container: &'a str,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<String>>> + Send + 'a>>;
}

// ============================================================================
// MemoryObjectStore - For tests
// ============================================================================

/// In-memory object store for unit and pipeline tests
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    containers: Arc<RwLock<HashMap<String, HashMap<String, Vec<u8>>>>>,
}

impl MemoryObjectStore {
    /// Create a new in-memory object store
    pub fn new() -> Self {
        MemoryObjectStore {
            containers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of objects in a container (for tests)
    pub fn len(&self, container: &str) -> usize {
        self.containers
            .read()
            .get(container)
            .map_or(0, HashMap::len)
    }

    /// Check if a container holds no objects (for tests)
    pub fn is_empty(&self, container: &str) -> bool {
        self.len(container) == 0
    }
}

impl Clone for MemoryObjectStore {
    fn clone(&self) -> Self {
        MemoryObjectStore {
            containers: Arc::clone(&self.containers),
        }
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.containers
                .write()
                .entry(container.to_string())
                .or_default()
                .insert(key.to_string(), data.to_vec());
            Ok(())
        })
    }

    fn get<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            self.containers
                .read()
                .get(container)
                .and_then(|objects| objects.get(key))
                .cloned()
                .ok_or_else(|| {
                    IoError::new(
                        ErrorKind::NotFound,
                        format!("object not found: {}/{}", container, key),
                    )
                })
        })
    }

    fn exists<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<bool>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self
                .containers
                .read()
                .get(container)
                .is_some_and(|objects| objects.contains_key(key)))
        })
    }

    fn list<'a>(
        &'a self,
        container: &'a str,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<String>>> + Send + 'a>> {
        Box::pin(async move {
            let containers = self.containers.read();
            let mut keys: Vec<String> = containers
                .get(container)
                .map(|objects| {
                    objects
                        .keys()
                        .filter(|k| k.starts_with(prefix))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            keys.sort();
            Ok(keys)
        })
    }
}

// ============================================================================
// LocalFsObjectStore - For development
// ============================================================================

/// Local filesystem object store; containers map to directories
#[derive(Debug, Clone)]
pub struct LocalFsObjectStore {
    base_path: PathBuf,
}

impl LocalFsObjectStore {
    /// Create a new local filesystem object store rooted at `base_path`
    pub fn new(base_path: PathBuf) -> Self {
        LocalFsObjectStore { base_path }
    }

    fn full_path(&self, container: &str, key: &str) -> PathBuf {
        self.base_path.join(container).join(key)
    }

    /// Get the base path (for testing)
    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn ensure_parent(path: &PathBuf) -> IoResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl ObjectStore for LocalFsObjectStore {
    fn put<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.full_path(container, key);
            Self::ensure_parent(&path)?;
            tokio::fs::write(&path, data).await
        })
    }

    fn get<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.full_path(container, key);
            tokio::fs::read(&path).await
        })
    }

    fn exists<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<bool>> + Send + 'a>> {
        Box::pin(async move { Ok(self.full_path(container, key).exists()) })
    }

    fn list<'a>(
        &'a self,
        container: &'a str,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<String>>> + Send + 'a>> {
        Box::pin(async move {
            let root = self.base_path.join(container);
            if !root.exists() {
                return Ok(Vec::new());
            }

            fn walk(dir: &PathBuf, root: &PathBuf, prefix: &str, keys: &mut Vec<String>) -> IoResult<()> {
                for entry in std::fs::read_dir(dir)? {
                    let path = entry?.path();
                    if path.is_dir() {
                        walk(&path, root, prefix, keys)?;
                    } else if path.is_file() {
                        // path is derived from walking root, so strip_prefix cannot fail
                        let key = path
                            .strip_prefix(root)
                            .expect("path must be under the walked root")
                            .to_string_lossy()
                            .to_string();
                        if key.starts_with(prefix) {
                            keys.push(key);
                        }
                    }
                }
                Ok(())
            }

            let mut keys = Vec::new();
            walk(&root, &root, prefix, &mut keys)?;
            keys.sort();
            Ok(keys)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_put_get() {
        let store = MemoryObjectStore::new();

        store.put("train", "a/b/c", b"hello").await.unwrap();
        let data = store.get("train", "a/b/c").await.unwrap();

        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn test_memory_get_missing_is_not_found() {
        let store = MemoryObjectStore::new();

        let err = store.get("train", "missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_memory_containers_are_independent() {
        let store = MemoryObjectStore::new();

        store.put("firehose", "k", b"in").await.unwrap();
        store.put("train", "k", b"out").await.unwrap();

        assert_eq!(store.get("firehose", "k").await.unwrap(), b"in");
        assert_eq!(store.get("train", "k").await.unwrap(), b"out");
    }

    #[tokio::test]
    async fn test_memory_list_filters_by_prefix() {
        let store = MemoryObjectStore::new();

        store.put("train", "histories/p/a", b"1").await.unwrap();
        store.put("train", "histories/p/b", b"2").await.unwrap();
        store.put("train", "variants/p/c", b"3").await.unwrap();

        let keys = store.list("train", "histories/").await.unwrap();
        assert_eq!(keys, vec!["histories/p/a", "histories/p/b"]);
    }

    #[tokio::test]
    async fn test_localfs_put_get_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsObjectStore::new(dir.path().to_path_buf());

        store.put("train", "histories/p/a.gz", b"data1").await.unwrap();
        store.put("train", "incoming/p/a.json", b"data2").await.unwrap();

        assert_eq!(store.get("train", "histories/p/a.gz").await.unwrap(), b"data1");
        assert!(store.exists("train", "incoming/p/a.json").await.unwrap());

        let keys = store.list("train", "histories/").await.unwrap();
        assert_eq!(keys, vec!["histories/p/a.gz"]);
    }
}
