//! Worker Dispatch Boundary
//!
//! After a trigger's writes complete, the orchestrator pokes the
//! downstream worker exactly once. The signal is fire-and-forget: it
//! carries nothing beyond the function identity, and a failed send is
//! logged and ignored. Markers in the store remain the durable signal.

use std::future::Future;
use std::io::Result as IoResult;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

/// One-shot downstream dispatch signal
pub trait JobDispatcher: Send + Sync + 'static {
    /// Invoke the named downstream function, no payload, no response
    fn dispatch(&self, function: &str) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + '_>>;
}

/// Dispatcher that only logs the signal
///
/// The production transport (queue send, function invocation) is a
/// collaborator concern wired in at deployment time.
#[derive(Debug, Clone, Default)]
pub struct LogDispatcher;

impl JobDispatcher for LogDispatcher {
    fn dispatch(&self, function: &str) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + '_>> {
        let function = function.to_string();
        Box::pin(async move {
            info!("dispatch signal sent to {}", function);
            Ok(())
        })
    }
}

/// Dispatcher that counts invocations, for tests
#[derive(Debug, Clone, Default)]
pub struct RecordingDispatcher {
    count: Arc<AtomicUsize>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        RecordingDispatcher::default()
    }

    /// Number of dispatch signals sent so far
    pub fn dispatched(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl JobDispatcher for RecordingDispatcher {
    fn dispatch(&self, _function: &str) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}
