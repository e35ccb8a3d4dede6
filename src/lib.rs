pub mod ingest;
pub mod store;

pub use ingest::{BatchOrchestrator, IngestConfig, TriggerEvent, TriggerSummary};
pub use store::{LocalFsObjectStore, MemoryObjectStore, ObjectStore};
