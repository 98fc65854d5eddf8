use chrono::{DateTime, Utc};

use crate::{LogRecord, SourceType, StructuredRecord, TransformConfiguration, NONE_SENTINEL};

/// Flattens a log record into one row per user action.
///
/// Absent `tti`/`ttar` values take the configured defaults here, and only here. A record without user actions still
/// yields exactly one row, with the action columns set to [`NONE_SENTINEL`]. Every row carries the same
/// `ingest_timestamp`.
pub fn to_structured(
    record: &LogRecord, source_type: SourceType, config: &TransformConfiguration, ingest_timestamp: DateTime<Utc>,
) -> Vec<StructuredRecord> {
    let tti = record.tti.unwrap_or(config.default_tti);
    let ttar = record.ttar.unwrap_or(config.default_ttar);

    let row = |action_kind: &str, action_target: &str, action_offset: Option<u64>| StructuredRecord {
        session_id: record.session_id.clone(),
        page_url: record.page_url.clone(),
        tti,
        ttar,
        event_timestamp: record.timestamp,
        action_kind: action_kind.to_string(),
        action_target: action_target.to_string(),
        action_offset,
        ingest_timestamp,
        source_type,
    };

    if record.user_actions.is_empty() {
        return vec![row(NONE_SENTINEL, NONE_SENTINEL, None)];
    }

    record
        .user_actions
        .iter()
        .map(|action| row(&action.action, &action.target, Some(action.time)))
        .collect()
}
