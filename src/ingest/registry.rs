//! Shard Registry Boundary
//!
//! The registry is an external collaborator that maps each project to its
//! ordered shard set. The pipeline only ever takes a snapshot, once per
//! trigger, so every source object in a trigger routes against the same
//! shard view. Shard creation and retirement are out of scope.
//!
//! Implementations:
//! - `StaticShardRegistry`: fixed snapshot, for tests and local runs
//! - `StoredShardRegistry`: JSON document in the object store

use crate::store::ObjectStore;
use std::collections::HashMap;
use std::future::Future;
use std::io::Result as IoResult;
use std::pin::Pin;
use std::sync::Arc;

/// Project name to ordered shard identifiers
///
/// Ordering is defined by the registry and treated as a total order usable
/// for deterministic assignment.
pub type ShardSnapshot = HashMap<String, Vec<String>>;

/// Shard registry lookup boundary
pub trait ShardRegistry: Send + Sync + 'static {
    /// Fetch the current shard view
    fn snapshot(&self) -> Pin<Box<dyn Future<Output = IoResult<ShardSnapshot>> + Send + '_>>;
}

/// Fixed in-memory registry for tests and local development
#[derive(Debug, Clone, Default)]
pub struct StaticShardRegistry {
    shards: ShardSnapshot,
}

impl StaticShardRegistry {
    /// Create a registry with a fixed snapshot
    pub fn new(shards: ShardSnapshot) -> Self {
        StaticShardRegistry { shards }
    }

    /// Convenience constructor from (project, shards) pairs
    pub fn with_projects<I, P, S>(projects: I) -> Self
    where
        I: IntoIterator<Item = (P, Vec<S>)>,
        P: Into<String>,
        S: Into<String>,
    {
        let shards = projects
            .into_iter()
            .map(|(project, shards)| {
                (
                    project.into(),
                    shards.into_iter().map(Into::into).collect(),
                )
            })
            .collect();
        StaticShardRegistry { shards }
    }
}

impl ShardRegistry for StaticShardRegistry {
    fn snapshot(&self) -> Pin<Box<dyn Future<Output = IoResult<ShardSnapshot>> + Send + '_>> {
        Box::pin(async move { Ok(self.shards.clone()) })
    }
}

/// Registry backed by a JSON document in the object store
///
/// The document is a `{"project": ["shard", ...]}` mapping maintained by
/// the (out-of-scope) shard provisioning process.
#[derive(Debug, Clone)]
pub struct StoredShardRegistry<S: ObjectStore> {
    store: Arc<S>,
    container: String,
    key: String,
}

impl<S: ObjectStore> StoredShardRegistry<S> {
    /// Create a registry reading `container`/`key`
    pub fn new(store: Arc<S>, container: String, key: String) -> Self {
        StoredShardRegistry {
            store,
            container,
            key,
        }
    }
}

impl<S: ObjectStore> ShardRegistry for StoredShardRegistry<S> {
    fn snapshot(&self) -> Pin<Box<dyn Future<Output = IoResult<ShardSnapshot>> + Send + '_>> {
        Box::pin(async move {
            let raw = self.store.get(&self.container, &self.key).await?;
            serde_json::from_slice(&raw).map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("malformed shard registry document {}: {}", self.key, e),
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;

    #[tokio::test]
    async fn test_static_registry_snapshot() {
        let registry =
            StaticShardRegistry::with_projects([("acme", vec!["shard-0", "shard-1"])]);

        let snapshot = registry.snapshot().await.unwrap();
        assert_eq!(
            snapshot["acme"],
            vec!["shard-0".to_string(), "shard-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_stored_registry_reads_document() {
        let store = Arc::new(MemoryObjectStore::new());
        store
            .put("config", "shards.json", br#"{"acme":["s0","s1","s2"]}"#)
            .await
            .unwrap();

        let registry = StoredShardRegistry::new(
            Arc::clone(&store),
            "config".to_string(),
            "shards.json".to_string(),
        );
        let snapshot = registry.snapshot().await.unwrap();
        assert_eq!(snapshot["acme"].len(), 3);
    }

    #[tokio::test]
    async fn test_stored_registry_rejects_malformed_document() {
        let store = Arc::new(MemoryObjectStore::new());
        store
            .put("config", "shards.json", b"not json")
            .await
            .unwrap();

        let registry = StoredShardRegistry::new(
            Arc::clone(&store),
            "config".to_string(),
            "shards.json".to_string(),
        );
        assert!(registry.snapshot().await.is_err());
    }
}
