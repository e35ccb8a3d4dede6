//! Shard Assignment and Destination Keys
//!
//! Maps a routed record to the key of the output object it will be
//! compacted into. Two key families exist and are distinguished purely by
//! prefix, so the writer can decide marker emission from the key alone:
//!
//! ```text
//! histories/{project}/{shard}/{yyyy}/{mm}/{dd}/{shard}-{yyyymmdd}-{batch_id}.jsonl.gz
//! variants/{project}/{model}/{source-stem}.jsonl.gz
//! ```
//!
//! History shard choice hashes (project, event date, batch id) over the
//! registry's ordered shard set, so every record from one source object
//! that shares a project and date converges on the same shard, and a
//! re-run against the same snapshot reproduces the same choice.

use crate::ingest::record::RoutedRecord;
use chrono::{DateTime, Utc};
use fnv::FnvHasher;
use std::hash::Hasher;

/// Key prefix of the history family
pub const HISTORIES_PREFIX: &str = "histories/";
/// Key prefix of the variants family
pub const VARIANTS_PREFIX: &str = "variants/";
/// Key prefix markers are published under
pub const INCOMING_PREFIX: &str = "incoming/";

const DATA_EXT: &str = ".jsonl.gz";
const MARKER_EXT: &str = ".json";

/// Routing failure for a record that already passed validation
#[derive(Debug)]
pub enum AssignError {
    /// The registry returned no shards for a project. The registry
    /// contract guarantees at least one shard per known project, so this
    /// fails the batch instead of skipping the record.
    EmptyShardSet { project: String },
}

impl std::fmt::Display for AssignError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignError::EmptyShardSet { project } => {
                write!(f, "shard registry returned no shards for project '{}'", project)
            }
        }
    }
}

impl std::error::Error for AssignError {}

/// Destination-key family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    /// Gets a marker object; consumed by the worker-dispatch path
    History,
    /// Side channel; never gets a marker
    Variants,
}

impl KeyFamily {
    /// Classify a destination key by the naming predicate
    pub fn of(key: &str) -> Option<KeyFamily> {
        if key.starts_with(HISTORIES_PREFIX) {
            Some(KeyFamily::History)
        } else if key.starts_with(VARIANTS_PREFIX) {
            Some(KeyFamily::Variants)
        } else {
            None
        }
    }
}

/// Batch-scoped routing context, one per source object
///
/// The batch identifier biases shard choice so that records sharing a
/// project and date land in the same output object. It is generated once
/// per trigger and shared by every source object in it, so concurrent
/// source objects converge on the same shard. It must never vary per
/// record within one source-object pass.
#[derive(Debug, Clone)]
pub struct BatchContext {
    batch_id: String,
    source_stem: String,
}

impl BatchContext {
    /// Generate a fresh batch identifier for one trigger
    pub fn new_batch_id() -> String {
        format!("{:016x}", rand::random::<u64>())
    }

    /// Create the context for one source object processing pass
    pub fn for_source(batch_id: &str, object_key: &str) -> Self {
        BatchContext {
            batch_id: batch_id.to_string(),
            source_stem: source_stem(object_key),
        }
    }

    /// Fixed identifiers for tests
    #[cfg(test)]
    pub fn fixed(batch_id: &str, source_stem: &str) -> Self {
        BatchContext {
            batch_id: batch_id.to_string(),
            source_stem: source_stem.to_string(),
        }
    }

    /// The batch identifier, stable for the whole source object
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }
}

/// Derive the source-object identity component used in variants keys
///
/// Takes the final path component, strips the compression extensions, and
/// replaces any character outside the name charset with a dash.
fn source_stem(object_key: &str) -> String {
    let name = object_key.rsplit('/').next().unwrap_or(object_key);
    let name = name
        .strip_suffix(DATA_EXT)
        .or_else(|| name.strip_suffix(".gz"))
        .unwrap_or(name);
    let stem: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if stem.is_empty() {
        "source".to_string()
    } else {
        stem
    }
}

/// Compute the destination key for a routed record
///
/// `shards` is the registry's ordered shard set for the record's project;
/// it is only consulted on the history path.
pub fn assign(
    shards: &[String],
    record: &RoutedRecord,
    ctx: &BatchContext,
) -> Result<String, AssignError> {
    let key = match record {
        RoutedRecord::Variants(r) => {
            format!(
                "{}{}/{}/{}{}",
                VARIANTS_PREFIX, r.project, r.model, ctx.source_stem, DATA_EXT
            )
        }
        RoutedRecord::History(r) => {
            if shards.is_empty() {
                return Err(AssignError::EmptyShardSet {
                    project: r.project.clone(),
                });
            }
            let date = event_date(&r.timestamp);
            let shard = &shards[shard_index(&r.project, &date, ctx.batch_id(), shards.len())];
            format!(
                "{}{}/{}/{}/{}/{}/{}-{}-{}{}",
                HISTORIES_PREFIX,
                r.project,
                shard,
                &date[0..4],
                &date[4..6],
                &date[6..8],
                shard,
                date,
                ctx.batch_id(),
                DATA_EXT
            )
        }
    };

    debug_assert!(
        KeyFamily::of(&key).is_some(),
        "assigned key must satisfy the naming predicate"
    );
    Ok(key)
}

/// Event date as yyyymmdd
fn event_date(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y%m%d").to_string()
}

/// Stable shard choice for a (project, date, batch id) triple
fn shard_index(project: &str, date: &str, batch_id: &str, shard_count: usize) -> usize {
    let mut hasher = FnvHasher::default();
    hasher.write(project.as_bytes());
    hasher.write(b"\0");
    hasher.write(date.as_bytes());
    hasher.write(b"\0");
    hasher.write(batch_id.as_bytes());
    (hasher.finish() % shard_count as u64) as usize
}

/// Derive the marker key for a history data key
///
/// Fixed naming transform: swap the `histories/` prefix for `incoming/`
/// and the data extension for `.json`. Variants keys have no marker.
pub fn marker_key(data_key: &str) -> Option<String> {
    if KeyFamily::of(data_key) != Some(KeyFamily::History) {
        return None;
    }
    let rest = data_key.strip_prefix(HISTORIES_PREFIX)?;
    let rest = rest.strip_suffix(DATA_EXT).unwrap_or(rest);
    Some(format!("{}{}{}", INCOMING_PREFIX, rest, MARKER_EXT))
}
