use chrono::{DateTime, TimeZone as _, Utc};

use crate::{LogRecord, SourceType, StructuredRecord, TransformConfiguration, UserAction};

pub fn event_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 20, 1, 0, 0).unwrap()
}

pub fn ingest_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 20, 1, 5, 0).unwrap()
}

pub fn log_record(
    session_id: &str, page_url: &str, tti: Option<u64>, ttar: Option<u64>, actions: &[(&str, &str, u64)],
) -> LogRecord {
    LogRecord {
        session_id: session_id.to_string(),
        page_url: page_url.to_string(),
        tti,
        ttar,
        timestamp: event_time(),
        user_actions: actions
            .iter()
            .map(|(action, target, time)| UserAction {
                action: action.to_string(),
                target: target.to_string(),
                time: *time,
            })
            .collect(),
    }
}

pub fn structured(record: &LogRecord) -> Vec<StructuredRecord> {
    crate::to_structured(record, SourceType::Stream, &TransformConfiguration::default(), ingest_time())
}
