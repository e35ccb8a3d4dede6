//! Event Routing and Compaction
//!
//! Ingests batched event records delivered as gzip NDJSON objects,
//! validates and classifies each record, routes it to a pre-provisioned
//! shard per project, and compacts the routed records into new compressed
//! objects plus marker objects for downstream consumers.
//!
//! ## Data Flow
//!
//! ```text
//! source object → gunzip → line split → decode
//!       → validate (record) → assign (shard/key) → aggregate (buffer)
//!       → compact + write data object [+ marker]   → dispatch signal
//! ```
//!
//! ## Key Properties
//!
//! - **One key per record**: validation and assignment are pure; a record
//!   lands in exactly one destination key.
//! - **Deterministic routing**: shard choice is a hash of (project, event
//!   date, batch id) over the registry's ordered shard set.
//! - **Markers signal visibility**: every history-family object gets a
//!   companion marker under `incoming/`; variants objects never do.
//! - **Record failures never abort a batch**: invalid lines are skipped
//!   with diagnostics; only structural and collaborator failures are
//!   fatal.

pub mod assign;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod orchestrator;
pub mod record;
pub mod registry;
pub mod writer;

pub use assign::{assign, marker_key, AssignError, BatchContext, KeyFamily};
pub use buffer::{BufferAggregator, BufferMap, SharedBuffers};
pub use config::IngestConfig;
pub use dispatch::{JobDispatcher, LogDispatcher, RecordingDispatcher};
pub use orchestrator::{
    BatchOrchestrator, OrchestratorError, SourceRef, TriggerEvent, TriggerSummary,
};
pub use record::{validate, RoutedRecord, SkipReason, Validated};
pub use registry::{ShardRegistry, ShardSnapshot, StaticShardRegistry, StoredShardRegistry};
pub use writer::{CompactionWriter, WriteOutcome, WriterError};
