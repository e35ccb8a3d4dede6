//! Ingest Worker Binary
//!
//! Reads a trigger-event JSON document and drives it through the routing
//! and compaction pipeline. The trigger source (queue consumer, function
//! runtime) hands the event over as a file path or stdin.
//!
//! ## Usage
//!
//! ```text
//! shardflow <trigger.json | ->
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | STORE_TYPE | localfs | localfs, memory, or s3 (feature `s3`) |
//! | DATA_PATH | /data | LocalFs store root |
//! | TRAIN_CONTAINER | train | Destination container |
//! | REGISTRY_CONTAINER | config | Shard registry container |
//! | REGISTRY_KEY | shards.json | Shard registry document key |
//! | DISPATCH_FUNCTION | assign-rewards-dispatch | Downstream function |
//! | INGEST_GZIP_LEVEL | 6 | Output compression level |
//! | AWS_REGION | us-east-1 | S3 region (feature `s3`) |
//! | AWS_ENDPOINT | - | Custom S3 endpoint (feature `s3`) |

use shardflow::ingest::{
    BatchOrchestrator, IngestConfig, LogDispatcher, StoredShardRegistry, TriggerEvent,
};
use shardflow::store::{LocalFsObjectStore, MemoryObjectStore, ObjectStore};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_DATA_PATH: &str = "/data";
const DEFAULT_REGISTRY_CONTAINER: &str = "config";
const DEFAULT_REGISTRY_KEY: &str = "shards.json";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let trigger = match read_trigger() {
        Ok(trigger) => trigger,
        Err(e) => {
            error!("failed to read trigger event: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let store_type = std::env::var("STORE_TYPE").unwrap_or_else(|_| "localfs".to_string());
    let result = match store_type.as_str() {
        "memory" => runtime.block_on(run(Arc::new(MemoryObjectStore::new()), &trigger)),
        "localfs" => {
            let path = std::env::var("DATA_PATH").unwrap_or_else(|_| DEFAULT_DATA_PATH.to_string());
            let store = LocalFsObjectStore::new(PathBuf::from(path));
            runtime.block_on(run(Arc::new(store), &trigger))
        }
        #[cfg(feature = "s3")]
        "s3" => {
            let settings = shardflow::store::s3::S3Settings {
                region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                endpoint: std::env::var("AWS_ENDPOINT").ok(),
            };
            let store = shardflow::store::S3ObjectStore::new(settings);
            runtime.block_on(run(Arc::new(store), &trigger))
        }
        other => {
            error!("unknown STORE_TYPE '{}'", other);
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(()) => ExitCode::FAILURE,
    }
}

/// Read the trigger event from argv[1] (a path, or `-` for stdin)
fn read_trigger() -> Result<TriggerEvent, String> {
    let arg = std::env::args()
        .nth(1)
        .ok_or_else(|| "usage: shardflow <trigger.json | ->".to_string())?;

    let raw = if arg == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| e.to_string())?;
        buf
    } else {
        std::fs::read_to_string(&arg).map_err(|e| format!("{}: {}", arg, e))?
    };

    serde_json::from_str(&raw).map_err(|e| format!("invalid trigger event: {}", e))
}

async fn run<S: ObjectStore>(store: Arc<S>, trigger: &TriggerEvent) -> Result<(), ()> {
    let config = IngestConfig::from_env();
    let registry = StoredShardRegistry::new(
        Arc::clone(&store),
        std::env::var("REGISTRY_CONTAINER")
            .unwrap_or_else(|_| DEFAULT_REGISTRY_CONTAINER.to_string()),
        std::env::var("REGISTRY_KEY").unwrap_or_else(|_| DEFAULT_REGISTRY_KEY.to_string()),
    );

    let orchestrator = BatchOrchestrator::new(store, registry, LogDispatcher, config);
    match orchestrator.process_trigger(trigger).await {
        Ok(summary) => {
            info!(
                "ingested {} sources: {} routed, {} skipped, {} objects written",
                summary.sources,
                summary.records_routed,
                summary.records_skipped,
                summary.objects_written
            );
            Ok(())
        }
        Err(e) => {
            error!("trigger failed: {}", e);
            Err(())
        }
    }
}
