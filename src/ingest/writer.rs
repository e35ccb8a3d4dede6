//! Compaction Writer
//!
//! Publishes one compressed data object per destination key, plus a marker
//! object for history-family keys. The marker is the visibility signal:
//! downstream consumers poll the `incoming/` prefix and must treat a data
//! object without a marker as not yet published.
//!
//! Per-key writes are independent. A failed key never prevents attempts on
//! sibling keys; failures are collected and the batch is reported failed
//! only after every key had its chance.
//!
//! The data-then-marker pair is not transactional: a crash between the two
//! puts leaves a markerless data object. Accepted eventual-consistency
//! gap.

use crate::ingest::assign::marker_key;
use crate::ingest::buffer::BufferMap;
use crate::ingest::codec::gzip_compress;
use crate::ingest::config::IngestConfig;
use crate::store::ObjectStore;
use bytes::Bytes;
use std::io::Error as IoError;
use std::sync::Arc;
use tracing::{debug, error};

/// Error for a single destination-key write
#[derive(Debug)]
pub enum WriterError {
    /// Compression or object store failure
    Io(IoError),
    /// Marker serialization failure
    Json(serde_json::Error),
}

impl std::fmt::Display for WriterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriterError::Io(e) => write!(f, "I/O error: {}", e),
            WriterError::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for WriterError {}

impl From<IoError> for WriterError {
    fn from(e: IoError) -> Self {
        WriterError::Io(e)
    }
}

impl From<serde_json::Error> for WriterError {
    fn from(e: serde_json::Error) -> Self {
        WriterError::Json(e)
    }
}

/// Outcome of one destination key's write
#[derive(Debug)]
pub struct WriteOutcome {
    /// Destination key of the data object
    pub key: String,
    /// Records compacted into the object
    pub record_count: usize,
    /// Marker key, when the family calls for one and the data put succeeded
    pub marker: Option<String>,
    /// Result of the data (and marker) writes
    pub result: Result<(), WriterError>,
}

impl WriteOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Serializes, compresses, and persists aggregated record groups
pub struct CompactionWriter<S: ObjectStore> {
    store: Arc<S>,
    config: IngestConfig,
}

impl<S: ObjectStore> CompactionWriter<S> {
    /// Create a writer targeting the configured destination container
    pub fn new(store: Arc<S>, config: IngestConfig) -> Self {
        CompactionWriter { store, config }
    }

    /// Write every group; collect per-key outcomes without short-circuiting
    pub async fn write_all(&self, groups: BufferMap) -> Vec<WriteOutcome> {
        let writes = groups
            .into_iter()
            .map(|(key, records)| self.write_group(key, records));
        futures::future::join_all(writes).await
    }

    /// Write one group's data object, then its marker if the key family
    /// calls for one
    async fn write_group(&self, key: String, records: Vec<Bytes>) -> WriteOutcome {
        let record_count = records.len();
        match self.put_group(&key, records).await {
            Ok(marker) => {
                debug!("wrote {} records to {}", record_count, key);
                WriteOutcome {
                    key,
                    record_count,
                    marker,
                    result: Ok(()),
                }
            }
            Err(e) => {
                error!("write failed for {}: {}", key, e);
                WriteOutcome {
                    key,
                    record_count,
                    marker: None,
                    result: Err(e),
                }
            }
        }
    }

    async fn put_group(
        &self,
        key: &str,
        records: Vec<Bytes>,
    ) -> Result<Option<String>, WriterError> {
        // one compression unit per object, not per record
        let mut concatenated = Vec::with_capacity(records.iter().map(Bytes::len).sum());
        for record in &records {
            concatenated.extend_from_slice(record);
        }
        let compressed = gzip_compress(&concatenated, self.config.gzip_level)?;

        let container = &self.config.destination_container;
        self.store.put(container, key, &compressed).await?;

        let marker = marker_key(key);
        if let Some(marker) = &marker {
            let body = serde_json::to_vec(&serde_json::json!({ "key": key }))?;
            self.store.put(container, marker, &body).await?;
        }
        Ok(marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::codec::gzip_decompress;
    use crate::store::MemoryObjectStore;
    use std::collections::HashMap;
    use std::future::Future;
    use std::io::{ErrorKind, Result as IoResult};
    use std::pin::Pin;

    fn group(records: &[&str]) -> Vec<Bytes> {
        records
            .iter()
            .map(|r| Bytes::copy_from_slice(format!("{}\n", r).as_bytes()))
            .collect()
    }

    fn writer(store: &Arc<MemoryObjectStore>) -> CompactionWriter<MemoryObjectStore> {
        CompactionWriter::new(Arc::clone(store), IngestConfig::test())
    }

    #[tokio::test]
    async fn test_history_key_gets_data_and_marker() {
        let store = Arc::new(MemoryObjectStore::new());
        let key = "histories/acme/s1/2024/01/01/s1-20240101-00aa.jsonl.gz";

        let mut groups = BufferMap::new();
        groups.insert(key.to_string(), group(&["{\"a\":1}", "{\"b\":2}"]));
        let outcomes = writer(&store).write_all(groups).await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].succeeded());
        assert_eq!(outcomes[0].record_count, 2);

        let data = store.get("train-test", key).await.unwrap();
        assert_eq!(gzip_decompress(&data).unwrap(), b"{\"a\":1}\n{\"b\":2}\n");

        let marker = store
            .get(
                "train-test",
                "incoming/acme/s1/2024/01/01/s1-20240101-00aa.json",
            )
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&marker).unwrap();
        assert_eq!(body["key"], key);
    }

    #[tokio::test]
    async fn test_variants_key_gets_no_marker() {
        let store = Arc::new(MemoryObjectStore::new());
        let key = "variants/acme/gpt-x/obj.jsonl.gz";

        let mut groups = BufferMap::new();
        groups.insert(key.to_string(), group(&["{\"v\":1}"]));
        let outcomes = writer(&store).write_all(groups).await;

        assert!(outcomes[0].succeeded());
        assert_eq!(outcomes[0].marker, None);
        assert_eq!(store.list("train-test", "incoming/").await.unwrap().len(), 0);
        assert_eq!(store.len("train-test"), 1);
    }

    /// Store that fails puts on keys containing a marker substring
    #[derive(Debug, Clone)]
    struct FailingStore {
        inner: MemoryObjectStore,
        fail_on: String,
    }

    impl ObjectStore for FailingStore {
        fn put<'a>(
            &'a self,
            container: &'a str,
            key: &'a str,
            data: &'a [u8],
        ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
            Box::pin(async move {
                if key.contains(&self.fail_on) {
                    return Err(IoError::new(ErrorKind::Other, "injected put failure"));
                }
                self.inner.put(container, key, data).await
            })
        }

        fn get<'a>(
            &'a self,
            container: &'a str,
            key: &'a str,
        ) -> Pin<Box<dyn Future<Output = IoResult<Vec<u8>>> + Send + 'a>> {
            self.inner.get(container, key)
        }

        fn exists<'a>(
            &'a self,
            container: &'a str,
            key: &'a str,
        ) -> Pin<Box<dyn Future<Output = IoResult<bool>> + Send + 'a>> {
            self.inner.exists(container, key)
        }

        fn list<'a>(
            &'a self,
            container: &'a str,
            prefix: &'a str,
        ) -> Pin<Box<dyn Future<Output = IoResult<Vec<String>>> + Send + 'a>> {
            self.inner.list(container, prefix)
        }
    }

    #[tokio::test]
    async fn test_one_failed_key_does_not_block_siblings() {
        let store = Arc::new(FailingStore {
            inner: MemoryObjectStore::new(),
            fail_on: "poison".to_string(),
        });
        let writer = CompactionWriter::new(Arc::clone(&store), IngestConfig::test());

        let mut groups = BufferMap::new();
        groups.insert(
            "histories/acme/poison/2024/01/01/x.jsonl.gz".to_string(),
            group(&["{\"a\":1}"]),
        );
        groups.insert(
            "histories/acme/ok/2024/01/01/y.jsonl.gz".to_string(),
            group(&["{\"b\":2}"]),
        );

        let outcomes = writer.write_all(groups).await;
        let by_key: HashMap<&str, &WriteOutcome> =
            outcomes.iter().map(|o| (o.key.as_str(), o)).collect();

        assert!(!by_key["histories/acme/poison/2024/01/01/x.jsonl.gz"].succeeded());
        assert!(by_key["histories/acme/ok/2024/01/01/y.jsonl.gz"].succeeded());
        assert!(store
            .inner
            .exists("train-test", "histories/acme/ok/2024/01/01/y.jsonl.gz")
            .await
            .unwrap());
    }
}
