//! Record Aggregation Buffers
//!
//! Routed records are serialized and grouped by destination key before
//! compaction. Grouping happens in two stages:
//!
//! - `BufferAggregator` is scoped to one source object. It is merged into
//!   the trigger-wide map only after the whole object processed cleanly,
//!   so a failed source object never contaminates sibling buffers.
//! - `SharedBuffers` is the trigger-wide union. Source objects complete in
//!   any order; contributions to the same key append under a single
//!   map-wide lock, the only mutual exclusion in the pipeline.
//!
//! Append order within one source object is preserved (file order).
//! Records are never deduplicated; idempotence is an upstream delivery
//! property.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Grouped serialized records, keyed by destination key
pub type BufferMap = HashMap<String, Vec<Bytes>>;

/// Per-source-object aggregation buffer
#[derive(Debug, Default)]
pub struct BufferAggregator {
    groups: BufferMap,
    record_count: usize,
}

impl BufferAggregator {
    /// Create an empty aggregator for one source object
    pub fn new() -> Self {
        BufferAggregator::default()
    }

    /// Append one serialized record under its destination key
    pub fn add(&mut self, destination_key: String, record: Bytes) {
        self.groups.entry(destination_key).or_default().push(record);
        self.record_count += 1;
    }

    /// Total records appended
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Number of distinct destination keys
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Consume the aggregator, yielding its groups
    pub fn drain(self) -> BufferMap {
        self.groups
    }
}

/// Trigger-wide destination-key buffer map
///
/// Shared by all source objects in a trigger; merge appends whole
/// per-object groups under one lock acquisition.
#[derive(Debug, Default)]
pub struct SharedBuffers {
    inner: Mutex<BufferMap>,
}

impl SharedBuffers {
    /// Create an empty trigger-wide buffer map
    pub fn new() -> Self {
        SharedBuffers::default()
    }

    /// Merge one source object's groups into the union
    ///
    /// Appends, never overwrites: two source objects feeding the same
    /// destination key contribute the union of their records.
    pub fn merge(&self, aggregator: BufferAggregator) {
        let groups = aggregator.drain();
        let mut inner = self.inner.lock();
        for (key, mut records) in groups {
            inner.entry(key).or_default().append(&mut records);
        }
    }

    /// Take the union, leaving the map empty
    pub fn drain(&self) -> BufferMap {
        std::mem::take(&mut *self.inner.lock())
    }
}
