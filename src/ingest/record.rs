//! Record Validation and Classification
//!
//! One decoded line from a source object is an open key-value map until it
//! passes validation; after that it is a closed `RoutedRecord` variant
//! carrying only the fields its routing path guarantees. Legacy migrations
//! (`user_id` -> `history_id`, deprecated `"choose"` records) live here so
//! routing never has to know about them.
//!
//! Validation never aborts a batch: every rejection is a `SkipReason`
//! diagnostic and the batch moves on to the next line.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

/// Field holding the project a record belongs to. Sensitive: stripped from
/// the body before the record is persisted.
pub const PROJECT_NAME_KEY: &str = "project_name";
/// Record timestamp, ISO-8601
pub const TIMESTAMP_KEY: &str = "timestamp";
/// History identity of a record
pub const HISTORY_ID_KEY: &str = "history_id";
/// Deprecated predecessor of `history_id`
pub const USER_ID_KEY: &str = "user_id";
/// Routing discriminator
pub const TYPE_KEY: &str = "type";
/// Discriminator value selecting the variants path
pub const VARIANTS_TYPE: &str = "variants";
/// Model a variants record belongs to
pub const MODEL_KEY: &str = "model";
/// Legacy discriminator field
pub const RECORD_TYPE_KEY: &str = "record_type";
/// Legacy record type that is dropped on sight
pub const CHOOSE_RECORD_TYPE: &str = "choose";

/// Why a record was dropped instead of routed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Deprecated legacy `record_type == "choose"`
    DeprecatedChooseRecord,
    /// No `project_name` field
    MissingProjectName,
    /// `timestamp` missing or not a parseable date
    InvalidTimestamp,
    /// `project_name` contains disallowed characters
    InvalidProjectName,
    /// Variants record without a `model`
    MissingModel,
    /// `model` contains disallowed characters
    InvalidModel,
    /// History record with neither `history_id` nor `user_id`
    MissingHistoryId,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::DeprecatedChooseRecord => write!(f, "deprecated 'choose' record"),
            SkipReason::MissingProjectName => write!(f, "missing project_name"),
            SkipReason::InvalidTimestamp => write!(f, "missing or invalid timestamp"),
            SkipReason::InvalidProjectName => write!(f, "invalid project_name"),
            SkipReason::MissingModel => write!(f, "variants record missing model"),
            SkipReason::InvalidModel => write!(f, "invalid model"),
            SkipReason::MissingHistoryId => write!(f, "missing history_id and user_id"),
        }
    }
}

/// A record that passed validation, classified by routing path
///
/// The body is the normalized record as it will be persisted:
/// `project_name` removed, `history_id` populated on the history path.
#[derive(Debug, Clone)]
pub enum RoutedRecord {
    History(HistoryRecord),
    Variants(VariantsRecord),
}

impl RoutedRecord {
    /// Project the record belongs to
    pub fn project(&self) -> &str {
        match self {
            RoutedRecord::History(r) => &r.project,
            RoutedRecord::Variants(r) => &r.project,
        }
    }

    /// Normalized record body
    pub fn body(&self) -> &Map<String, Value> {
        match self {
            RoutedRecord::History(r) => &r.body,
            RoutedRecord::Variants(r) => &r.body,
        }
    }
}

/// Record routed by (project, shard, event date)
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub project: String,
    pub history_id: String,
    pub timestamp: DateTime<Utc>,
    pub body: Map<String, Value>,
}

/// Record routed by (project, model, source object)
#[derive(Debug, Clone)]
pub struct VariantsRecord {
    pub project: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub body: Map<String, Value>,
}

/// Validation outcome for an accepted record
#[derive(Debug, Clone)]
pub struct Validated {
    pub record: RoutedRecord,
    /// Timestamp parses to a future instant; observational only, the
    /// caller logs it and routing proceeds unchanged.
    pub future_timestamp: bool,
}

/// Allowed-charset predicate for project and model names
///
/// Non-empty, ASCII alphanumeric plus underscore, dash, space, period.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ' ' | '.'))
}

/// Parse an ISO-8601 timestamp string
///
/// Accepts RFC 3339, a naive datetime (assumed UTC), or a bare date.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

fn str_field<'a>(record: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}

/// Validate and normalize one decoded record
///
/// Rules apply in order, first match wins; see the skip variants for the
/// rejection cases. On success the returned body has `project_name`
/// removed and, for history records, `history_id` populated (copied from
/// the deprecated `user_id` when absent).
pub fn validate(mut raw: Map<String, Value>) -> Result<Validated, SkipReason> {
    if str_field(&raw, RECORD_TYPE_KEY) == Some(CHOOSE_RECORD_TYPE) {
        return Err(SkipReason::DeprecatedChooseRecord);
    }

    let project = str_field(&raw, PROJECT_NAME_KEY)
        .ok_or(SkipReason::MissingProjectName)?
        .to_string();

    let timestamp = str_field(&raw, TIMESTAMP_KEY)
        .and_then(parse_timestamp)
        .ok_or(SkipReason::InvalidTimestamp)?;

    // Future instants are observed, not rejected; client clock skew is
    // routine at this stage of the pipeline.
    let future_timestamp = timestamp > Utc::now();

    if !is_valid_name(&project) {
        return Err(SkipReason::InvalidProjectName);
    }

    let record = if str_field(&raw, TYPE_KEY) == Some(VARIANTS_TYPE) {
        let model = str_field(&raw, MODEL_KEY)
            .ok_or(SkipReason::MissingModel)?
            .to_string();
        if !is_valid_name(&model) {
            return Err(SkipReason::InvalidModel);
        }
        raw.remove(PROJECT_NAME_KEY);
        RoutedRecord::Variants(VariantsRecord {
            project,
            model,
            timestamp,
            body: raw,
        })
    } else {
        let history_id = match str_field(&raw, HISTORY_ID_KEY) {
            Some(id) => id.to_string(),
            None => {
                // migration rule: derive history_id from the deprecated
                // user_id field
                let user_id = str_field(&raw, USER_ID_KEY)
                    .ok_or(SkipReason::MissingHistoryId)?
                    .to_string();
                raw.insert(
                    HISTORY_ID_KEY.to_string(),
                    Value::String(user_id.clone()),
                );
                user_id
            }
        };
        raw.remove(PROJECT_NAME_KEY);
        RoutedRecord::History(HistoryRecord {
            project,
            history_id,
            timestamp,
            body: raw,
        })
    };

    debug_assert!(
        !record.body().contains_key(PROJECT_NAME_KEY),
        "project_name must never reach a persisted body"
    );

    Ok(Validated {
        record,
        future_timestamp,
    })
}
