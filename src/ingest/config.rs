//! Configuration for the Ingest Pipeline
//!
//! All formerly-implicit globals are carried here and injected into the
//! orchestrator and writer at construction time.

use serde::{Deserialize, Serialize};

const DEFAULT_DESTINATION_CONTAINER: &str = "train";
const DEFAULT_DISPATCH_FUNCTION: &str = "assign-rewards-dispatch";
const DEFAULT_DELIVERY_STREAM: &str = "ingest-delivery";
const DEFAULT_GZIP_LEVEL: u32 = 6;

/// Process-wide read-only configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Container compacted objects and markers are written to
    pub destination_container: String,
    /// Downstream function signalled once per trigger
    pub dispatch_function: String,
    /// Delivery-stream identifier; consumed by the ingestion-side sender
    /// only, carried here so one config document covers the whole service
    pub delivery_stream: String,
    /// Gzip level for compacted objects (0-9)
    pub gzip_level: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            destination_container: DEFAULT_DESTINATION_CONTAINER.to_string(),
            dispatch_function: DEFAULT_DISPATCH_FUNCTION.to_string(),
            delivery_stream: DEFAULT_DELIVERY_STREAM.to_string(),
            gzip_level: DEFAULT_GZIP_LEVEL,
        }
    }
}

impl IngestConfig {
    /// Build configuration from environment variables
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | TRAIN_CONTAINER | train |
    /// | DISPATCH_FUNCTION | assign-rewards-dispatch |
    /// | DELIVERY_STREAM | ingest-delivery |
    /// | INGEST_GZIP_LEVEL | 6 |
    pub fn from_env() -> Self {
        let defaults = IngestConfig::default();
        IngestConfig {
            destination_container: std::env::var("TRAIN_CONTAINER")
                .unwrap_or(defaults.destination_container),
            dispatch_function: std::env::var("DISPATCH_FUNCTION")
                .unwrap_or(defaults.dispatch_function),
            delivery_stream: std::env::var("DELIVERY_STREAM").unwrap_or(defaults.delivery_stream),
            gzip_level: std::env::var("INGEST_GZIP_LEVEL")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|level| *level <= 9)
                .unwrap_or(defaults.gzip_level),
        }
    }

    /// Configuration for tests
    pub fn test() -> Self {
        IngestConfig {
            destination_container: "train-test".to_string(),
            dispatch_function: "dispatch-test".to_string(),
            delivery_stream: "delivery-test".to_string(),
            gzip_level: 1,
        }
    }
}
