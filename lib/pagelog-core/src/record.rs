use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SourceType;

/// Placeholder written to the action columns of a row produced from a record with no user actions.
pub const NONE_SENTINEL: &str = "none";

/// A single user interaction captured inside a log event.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct UserAction {
    /// Kind of action, such as `click`.
    pub action: String,

    /// Identifier of the element acted upon.
    pub target: String,

    /// Offset of the action from the start of the page view.
    pub time: u64,
}

/// A validated log event.
///
/// `tti` and `ttar` stay optional here: defaults are applied exactly once, when the record is flattened.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogRecord {
    /// Session the page view belongs to.
    pub session_id: String,

    /// Page URL, never empty.
    pub page_url: String,

    /// Time to interactive.
    pub tti: Option<u64>,

    /// Time to articulate response.
    pub ttar: Option<u64>,

    /// When the event happened.
    pub timestamp: DateTime<Utc>,

    /// User actions, in the order they were reported.
    pub user_actions: Vec<UserAction>,
}

/// One flattened row derived from a [`LogRecord`].
///
/// Stored rows are append-only: they are never rewritten in place.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StructuredRecord {
    /// Session the page view belongs to.
    pub session_id: String,

    /// Page URL.
    pub page_url: String,

    /// Time to interactive, defaulted.
    pub tti: u64,

    /// Time to articulate response, defaulted.
    pub ttar: u64,

    /// When the originating event happened.
    pub event_timestamp: DateTime<Utc>,

    /// Action kind, or [`NONE_SENTINEL`].
    pub action_kind: String,

    /// Action target, or [`NONE_SENTINEL`].
    pub action_target: String,

    /// Action time offset. Absent for sentinel rows.
    pub action_offset: Option<u64>,

    /// Wall-clock time at which the row was produced.
    pub ingest_timestamp: DateTime<Utc>,

    /// Path that produced the row.
    pub source_type: SourceType,
}

impl StructuredRecord {
    /// Returns `true` if this row stands in for a record without user actions.
    pub fn is_sentinel(&self) -> bool {
        self.action_offset.is_none() && self.action_kind == NONE_SENTINEL && self.action_target == NONE_SENTINEL
    }

    /// Returns the action carried by this row, if any.
    pub fn user_action(&self) -> Option<UserAction> {
        self.action_offset.map(|time| UserAction {
            action: self.action_kind.clone(),
            target: self.action_target.clone(),
            time,
        })
    }
}

/// Per-page aggregate metrics.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AggregateRecord {
    /// Page URL, matched exactly.
    pub page_url: String,

    /// Mean time to interactive over contributing records.
    pub avg_tti: f64,

    /// Mean time to articulate response over contributing records.
    pub avg_ttar: f64,

    /// Number of contributing log records. Always at least 1.
    pub count: u64,
}

impl AggregateRecord {
    /// Combines two aggregates for the same page into one, weighting each mean by its count.
    ///
    /// Returns `None` if the page URLs differ.
    pub fn merge(&self, other: &AggregateRecord) -> Option<AggregateRecord> {
        if self.page_url != other.page_url {
            return None;
        }

        let count = self.count + other.count;
        let weighted = |a: f64, b: f64| (a * self.count as f64 + b * other.count as f64) / count as f64;

        Some(AggregateRecord {
            page_url: self.page_url.clone(),
            avg_tti: weighted(self.avg_tti, other.avg_tti),
            avg_ttar: weighted(self.avg_ttar, other.avg_ttar),
            count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agg(url: &str, avg_tti: f64, avg_ttar: f64, count: u64) -> AggregateRecord {
        AggregateRecord {
            page_url: url.to_string(),
            avg_tti,
            avg_ttar,
            count,
        }
    }

    #[test]
    fn merge_weights_by_count() {
        let merged = agg("/p5", 1000.0, 500.0, 1).merge(&agg("/p5", 2500.0, 800.0, 3)).unwrap();

        assert_eq!(merged.count, 4);
        assert_eq!(merged.avg_tti, 2125.0);
        assert_eq!(merged.avg_ttar, 725.0);
    }

    #[test]
    fn merge_rejects_other_pages() {
        assert!(agg("/p5", 1.0, 1.0, 1).merge(&agg("/p5/", 1.0, 1.0, 1)).is_none());
    }
}
