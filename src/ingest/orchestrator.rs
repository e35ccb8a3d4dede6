//! Batch Orchestrator
//!
//! Drives one trigger event end to end: validate the trigger shape, take
//! one shard-registry snapshot, process every referenced source object
//! concurrently, compact the union of their groups, then signal the
//! downstream worker once.
//!
//! Failure policy (one rule per layer):
//! - malformed trigger: fatal, nothing is processed
//! - malformed record line: skipped with a diagnostic, batch continues
//! - source object failure (fetch, decompress, empty shard set): fails the
//!   whole trigger, since the upstream delivery mechanism retries wholesale
//! - write failure: collected per key, reported after all keys attempted

use crate::ingest::assign::{assign, AssignError, BatchContext};
use crate::ingest::buffer::{BufferAggregator, SharedBuffers};
use crate::ingest::codec::{gzip_decompress, Lines, RECORD_LINE_BYTES_MAX};
use crate::ingest::config::IngestConfig;
use crate::ingest::dispatch::JobDispatcher;
use crate::ingest::record::{validate, RoutedRecord};
use crate::ingest::registry::{ShardRegistry, ShardSnapshot};
use crate::ingest::writer::CompactionWriter;
use crate::store::ObjectStore;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Error as IoError;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reference to one source object named by a trigger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    /// Container the source object lives in
    pub container: String,
    /// Key of the gzip NDJSON object
    pub object_key: String,
}

/// One trigger event, referencing the source objects to ingest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerEvent {
    pub sources: Vec<SourceRef>,
}

impl TriggerEvent {
    /// Structural validation; the one fatal input check in the pipeline
    ///
    /// There is no record-level recovery for a trigger that does not name
    /// its sources, so this aborts instead of skipping.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.sources.is_empty() {
            return Err(OrchestratorError::MalformedTrigger(
                "trigger references no source objects".to_string(),
            ));
        }
        for source in &self.sources {
            if source.container.is_empty() || source.object_key.is_empty() {
                return Err(OrchestratorError::MalformedTrigger(format!(
                    "source reference missing container or key: '{}'/'{}'",
                    source.container, source.object_key
                )));
            }
        }
        Ok(())
    }
}

/// Fatal pipeline error; everything here fails the whole trigger
#[derive(Debug)]
pub enum OrchestratorError {
    /// Trigger failed shape validation
    MalformedTrigger(String),
    /// Shard registry lookup failed
    Registry(IoError),
    /// Source object could not be fetched
    Source {
        container: String,
        key: String,
        error: IoError,
    },
    /// Source object could not be decompressed
    Decompress {
        container: String,
        key: String,
        error: IoError,
    },
    /// Record body serialization failed
    Serialize(serde_json::Error),
    /// A validated record could not be routed
    Assign(AssignError),
    /// One or more destination keys failed to write
    WritesFailed { failed: usize, total: usize },
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestratorError::MalformedTrigger(msg) => {
                write!(f, "malformed trigger: {}", msg)
            }
            OrchestratorError::Registry(e) => write!(f, "shard registry lookup failed: {}", e),
            OrchestratorError::Source {
                container,
                key,
                error,
            } => write!(f, "failed to read source {}/{}: {}", container, key, error),
            OrchestratorError::Decompress {
                container,
                key,
                error,
            } => write!(
                f,
                "failed to decompress source {}/{}: {}",
                container, key, error
            ),
            OrchestratorError::Serialize(e) => write!(f, "record serialization failed: {}", e),
            OrchestratorError::Assign(e) => write!(f, "{}", e),
            OrchestratorError::WritesFailed { failed, total } => {
                write!(f, "{} of {} destination writes failed", failed, total)
            }
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl From<AssignError> for OrchestratorError {
    fn from(e: AssignError) -> Self {
        OrchestratorError::Assign(e)
    }
}

/// Per-trigger ingest counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerSummary {
    /// Source objects processed
    pub sources: usize,
    /// Lines read across all source objects
    pub lines_read: usize,
    /// Records validated and routed
    pub records_routed: usize,
    /// Lines dropped with a diagnostic
    pub records_skipped: usize,
    /// Accepted records whose timestamp was in the future
    pub future_timestamps: usize,
    /// Compacted data objects written
    pub objects_written: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct SourceCounts {
    lines: usize,
    routed: usize,
    skipped: usize,
    future: usize,
}

/// Drives trigger events through the ingest pipeline
pub struct BatchOrchestrator<S: ObjectStore, R: ShardRegistry, D: JobDispatcher> {
    store: Arc<S>,
    registry: R,
    dispatcher: D,
    writer: CompactionWriter<S>,
    config: IngestConfig,
}

impl<S: ObjectStore, R: ShardRegistry, D: JobDispatcher> BatchOrchestrator<S, R, D> {
    /// Create an orchestrator over the given collaborators
    pub fn new(store: Arc<S>, registry: R, dispatcher: D, config: IngestConfig) -> Self {
        let writer = CompactionWriter::new(Arc::clone(&store), config.clone());
        BatchOrchestrator {
            store,
            registry,
            dispatcher,
            writer,
            config,
        }
    }

    /// Process one trigger event end to end
    pub async fn process_trigger(
        &self,
        trigger: &TriggerEvent,
    ) -> Result<TriggerSummary, OrchestratorError> {
        trigger.validate()?;

        // one snapshot per trigger: every source object routes against the
        // same shard view
        let snapshot = self
            .registry
            .snapshot()
            .await
            .map_err(OrchestratorError::Registry)?;

        // one identifier per trigger, so concurrent source objects that
        // share a project and date converge on the same destination key
        let batch_id = BatchContext::new_batch_id();

        let shared = SharedBuffers::new();
        let counts = futures::future::try_join_all(
            trigger
                .sources
                .iter()
                .map(|source| self.process_source(source, &batch_id, &snapshot, &shared)),
        )
        .await?;

        let groups = shared.drain();
        let objects_written = groups.len();
        let outcomes = self.writer.write_all(groups).await;

        let failed = outcomes.iter().filter(|o| !o.succeeded()).count();
        if failed > 0 {
            return Err(OrchestratorError::WritesFailed {
                failed,
                total: outcomes.len(),
            });
        }

        // fire-and-forget: markers are already durable, a lost signal only
        // delays the next poll
        if let Err(e) = self.dispatcher.dispatch(&self.config.dispatch_function).await {
            warn!(
                "dispatch signal to {} failed: {}",
                self.config.dispatch_function, e
            );
        }

        let summary = TriggerSummary {
            sources: trigger.sources.len(),
            lines_read: counts.iter().map(|c| c.lines).sum(),
            records_routed: counts.iter().map(|c| c.routed).sum(),
            records_skipped: counts.iter().map(|c| c.skipped).sum(),
            future_timestamps: counts.iter().map(|c| c.future).sum(),
            objects_written,
        };
        info!(
            "trigger complete: {} sources, {} routed, {} skipped, {} objects",
            summary.sources, summary.records_routed, summary.records_skipped, summary.objects_written
        );
        Ok(summary)
    }

    /// Validate, route, and aggregate one source object, in file order
    async fn process_source(
        &self,
        source: &SourceRef,
        batch_id: &str,
        snapshot: &ShardSnapshot,
        shared: &SharedBuffers,
    ) -> Result<SourceCounts, OrchestratorError> {
        let ctx = BatchContext::for_source(batch_id, &source.object_key);

        let raw = self
            .store
            .get(&source.container, &source.object_key)
            .await
            .map_err(|error| OrchestratorError::Source {
                container: source.container.clone(),
                key: source.object_key.clone(),
                error,
            })?;

        let data = gzip_decompress(&raw).map_err(|error| OrchestratorError::Decompress {
            container: source.container.clone(),
            key: source.object_key.clone(),
            error,
        })?;

        let mut local = BufferAggregator::new();
        let mut counts = SourceCounts::default();

        for line in Lines::new(&data) {
            counts.lines += 1;

            if line.len() > RECORD_LINE_BYTES_MAX {
                counts.skipped += 1;
                warn!(
                    "skipping oversized record line ({} bytes) in {}",
                    line.len(),
                    source.object_key
                );
                continue;
            }

            let parsed: Map<String, Value> = match serde_json::from_slice(line) {
                Ok(map) => map,
                Err(e) => {
                    counts.skipped += 1;
                    debug!("skipping undecodable line in {}: {}", source.object_key, e);
                    continue;
                }
            };

            let validated = match validate(parsed) {
                Ok(validated) => validated,
                Err(reason) => {
                    counts.skipped += 1;
                    debug!("skipping record in {}: {}", source.object_key, reason);
                    continue;
                }
            };
            if validated.future_timestamp {
                counts.future += 1;
                warn!(
                    "record with future timestamp accepted in {}",
                    source.object_key
                );
            }

            let record = validated.record;
            let shards = shards_for(snapshot, &record);
            let destination = assign(shards, &record, &ctx)?;

            let mut serialized =
                serde_json::to_vec(record.body()).map_err(OrchestratorError::Serialize)?;
            serialized.push(b'\n');
            local.add(destination, Bytes::from(serialized));
            counts.routed += 1;
        }

        if counts.skipped > 0 {
            info!(
                "skipped {} invalid records in {}/{}",
                counts.skipped, source.container, source.object_key
            );
        }

        // merge only after the whole object processed cleanly
        shared.merge(local);
        Ok(counts)
    }
}

/// Shard set for a record's project; missing projects route as empty and
/// fail in assignment, per the registry contract
fn shards_for<'a>(snapshot: &'a ShardSnapshot, record: &RoutedRecord) -> &'a [String] {
    match record {
        RoutedRecord::Variants(_) => &[],
        RoutedRecord::History(r) => snapshot.get(&r.project).map_or(&[], Vec::as_slice),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::codec::gzip_compress;
    use crate::ingest::dispatch::RecordingDispatcher;
    use crate::ingest::registry::StaticShardRegistry;
    use crate::store::{MemoryObjectStore, ObjectStore};

    fn trigger(refs: &[(&str, &str)]) -> TriggerEvent {
        TriggerEvent {
            sources: refs
                .iter()
                .map(|(container, key)| SourceRef {
                    container: container.to_string(),
                    object_key: key.to_string(),
                })
                .collect(),
        }
    }

    async fn put_ndjson(store: &MemoryObjectStore, container: &str, key: &str, lines: &[&str]) {
        let joined = lines
            .iter()
            .map(|l| format!("{}\n", l))
            .collect::<String>();
        let compressed = gzip_compress(joined.as_bytes(), 1).unwrap();
        store.put(container, key, &compressed).await.unwrap();
    }

    fn orchestrator(
        store: &Arc<MemoryObjectStore>,
        dispatcher: &RecordingDispatcher,
    ) -> BatchOrchestrator<MemoryObjectStore, StaticShardRegistry, RecordingDispatcher> {
        BatchOrchestrator::new(
            Arc::clone(store),
            StaticShardRegistry::with_projects([("acme", vec!["s0", "s1"])]),
            dispatcher.clone(),
            IngestConfig::test(),
        )
    }

    #[tokio::test]
    async fn test_empty_trigger_is_fatal() {
        let store = Arc::new(MemoryObjectStore::new());
        let orch = orchestrator(&store, &RecordingDispatcher::new());

        let err = orch.process_trigger(&trigger(&[])).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::MalformedTrigger(_)));
    }

    #[tokio::test]
    async fn test_blank_source_reference_is_fatal() {
        let store = Arc::new(MemoryObjectStore::new());
        let orch = orchestrator(&store, &RecordingDispatcher::new());

        let err = orch
            .process_trigger(&trigger(&[("firehose", "")]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::MalformedTrigger(_)));
    }

    #[tokio::test]
    async fn test_missing_source_object_fails_the_trigger() {
        let store = Arc::new(MemoryObjectStore::new());
        let orch = orchestrator(&store, &RecordingDispatcher::new());

        let err = orch
            .process_trigger(&trigger(&[("firehose", "absent.jsonl.gz")]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Source { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_source_object_fails_the_trigger() {
        let store = Arc::new(MemoryObjectStore::new());
        store
            .put("firehose", "bad.jsonl.gz", b"definitely not gzip")
            .await
            .unwrap();
        let orch = orchestrator(&store, &RecordingDispatcher::new());

        let err = orch
            .process_trigger(&trigger(&[("firehose", "bad.jsonl.gz")]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Decompress { .. }));
    }

    #[tokio::test]
    async fn test_unknown_project_is_a_registry_contract_violation() {
        let store = Arc::new(MemoryObjectStore::new());
        put_ndjson(
            &store,
            "firehose",
            "obj.jsonl.gz",
            &[r#"{"project_name":"ghost","history_id":"h1","timestamp":"2024-01-01T00:00:00Z"}"#],
        )
        .await;
        let orch = orchestrator(&store, &RecordingDispatcher::new());

        let err = orch
            .process_trigger(&trigger(&[("firehose", "obj.jsonl.gz")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Assign(AssignError::EmptyShardSet { .. })
        ));
    }

    #[tokio::test]
    async fn test_skips_do_not_abort_and_are_counted() {
        let store = Arc::new(MemoryObjectStore::new());
        let dispatcher = RecordingDispatcher::new();
        put_ndjson(
            &store,
            "firehose",
            "obj.jsonl.gz",
            &[
                r#"{"record_type":"choose","project_name":"acme"}"#,
                "not json at all",
                r#"{"project_name":"acme","history_id":"h1","timestamp":"2024-01-01T00:00:00Z"}"#,
            ],
        )
        .await;
        let orch = orchestrator(&store, &dispatcher);

        let summary = orch
            .process_trigger(&trigger(&[("firehose", "obj.jsonl.gz")]))
            .await
            .unwrap();

        assert_eq!(summary.lines_read, 3);
        assert_eq!(summary.records_skipped, 2);
        assert_eq!(summary.records_routed, 1);
        assert_eq!(summary.objects_written, 1);
        assert_eq!(dispatcher.dispatched(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_fires_once_per_trigger() {
        let store = Arc::new(MemoryObjectStore::new());
        let dispatcher = RecordingDispatcher::new();
        for key in ["a.jsonl.gz", "b.jsonl.gz", "c.jsonl.gz"] {
            put_ndjson(
                &store,
                "firehose",
                key,
                &[r#"{"project_name":"acme","history_id":"h1","timestamp":"2024-01-01T00:00:00Z"}"#],
            )
            .await;
        }
        let orch = orchestrator(&store, &dispatcher);

        orch.process_trigger(&trigger(&[
            ("firehose", "a.jsonl.gz"),
            ("firehose", "b.jsonl.gz"),
            ("firehose", "c.jsonl.gz"),
        ]))
        .await
        .unwrap();

        assert_eq!(dispatcher.dispatched(), 1);
    }

    #[test]
    fn test_trigger_event_deserializes_camel_case() {
        let event: TriggerEvent = serde_json::from_str(
            r#"{"sources":[{"container":"firehose","objectKey":"2024/01/01/obj.jsonl.gz"}]}"#,
        )
        .unwrap();
        assert_eq!(event.sources[0].object_key, "2024/01/01/obj.jsonl.gz");
    }
}
