use std::fmt;

use chrono::{DateTime, TimeZone as _, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::Snafu;

use crate::{LogRecord, UserAction};

/// Reason code attached to a [`ValidationError`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    /// A required field was absent.
    Missing,

    /// A field held a value of the wrong type.
    WrongType,

    /// A numeric field held a negative value.
    NegativeValue,

    /// The timestamp could not be parsed.
    UnparseableTimestamp,
}

impl ValidationReason {
    /// Returns the reason code as it appears in quarantine output and metrics.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ValidationReason::Missing => "missing",
            ValidationReason::WrongType => "wrong_type",
            ValidationReason::NegativeValue => "negative_value",
            ValidationReason::UnparseableTimestamp => "unparseable_timestamp",
        }
    }
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-record validation failure.
///
/// Validation failures never abort a batch: callers route the offending record elsewhere and carry on.
#[derive(Clone, Debug, Eq, PartialEq, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum ValidationError {
    /// A required field was absent.
    #[snafu(display("Field '{}' is missing.", field))]
    Missing {
        /// Path of the offending field.
        field: String,
    },

    /// A field held a value of the wrong type.
    #[snafu(display("Field '{}' has the wrong type (expected {}).", field, expected))]
    WrongType {
        /// Path of the offending field.
        field: String,

        /// Description of the expected type.
        expected: &'static str,
    },

    /// A numeric field held a negative value.
    #[snafu(display("Field '{}' must not be negative.", field))]
    NegativeValue {
        /// Path of the offending field.
        field: String,
    },

    /// The timestamp could not be parsed.
    #[snafu(display("Field '{}' is not a valid timestamp.", field))]
    UnparseableTimestamp {
        /// Path of the offending field.
        field: String,
    },
}

impl ValidationError {
    /// Returns the path of the offending field, such as `page_url` or `user_actions[1].time`.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::Missing { field }
            | ValidationError::WrongType { field, .. }
            | ValidationError::NegativeValue { field }
            | ValidationError::UnparseableTimestamp { field } => field,
        }
    }

    /// Returns the reason code.
    pub fn reason(&self) -> ValidationReason {
        match self {
            ValidationError::Missing { .. } => ValidationReason::Missing,
            ValidationError::WrongType { .. } => ValidationReason::WrongType,
            ValidationError::NegativeValue { .. } => ValidationReason::NegativeValue,
            ValidationError::UnparseableTimestamp { .. } => ValidationReason::UnparseableTimestamp,
        }
    }
}

/// Validates a decoded log event.
///
/// Fields are checked in a fixed order and the first failure wins. `null` is treated the same as an absent field.
///
/// # Errors
///
/// If the event is not structurally valid, a [`ValidationError`] naming the offending field is returned.
pub fn validate(raw: &Value) -> Result<LogRecord, ValidationError> {
    let object = raw.as_object().ok_or_else(|| {
        WrongType {
            field: "record",
            expected: "object",
        }
        .build()
    })?;

    let session_id = required_string(object, "session_id", "session_id")?;

    let page_url = required_string(object, "page_url", "page_url")?;
    if page_url.is_empty() {
        return Missing { field: "page_url" }.fail();
    }

    let tti = optional_non_negative(object, "tti", "tti")?;
    let ttar = optional_non_negative(object, "ttar", "ttar")?;

    let timestamp = match present(object, "timestamp") {
        Some(value) => parse_timestamp(value)?,
        None => return Missing { field: "timestamp" }.fail(),
    };

    let user_actions = match present(object, "user_actions") {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(idx, item)| validate_user_action(idx, item))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return WrongType {
                field: "user_actions",
                expected: "array",
            }
            .fail()
        }
    };

    Ok(LogRecord {
        session_id: session_id.to_string(),
        page_url: page_url.to_string(),
        tti,
        ttar,
        timestamp,
        user_actions,
    })
}

fn validate_user_action(idx: usize, item: &Value) -> Result<UserAction, ValidationError> {
    let path = |name: &str| format!("user_actions[{}].{}", idx, name);

    let object = item.as_object().ok_or_else(|| {
        WrongType {
            field: format!("user_actions[{}]", idx),
            expected: "object",
        }
        .build()
    })?;

    let action = required_string(object, "action", path("action"))?;
    let target = required_string(object, "target", path("target"))?;
    let time = match optional_non_negative(object, "time", path("time"))? {
        Some(time) => time,
        None => return Missing { field: path("time") }.fail(),
    };

    Ok(UserAction {
        action: action.to_string(),
        target: target.to_string(),
        time,
    })
}

fn present<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    object.get(key).filter(|value| !value.is_null())
}

fn required_string<'a>(
    object: &'a Map<String, Value>, key: &str, field: impl Into<String>,
) -> Result<&'a str, ValidationError> {
    match present(object, key) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(_) => WrongType {
            field,
            expected: "string",
        }
        .fail(),
        None => Missing { field }.fail(),
    }
}

fn optional_non_negative(
    object: &Map<String, Value>, key: &str, field: impl Into<String>,
) -> Result<Option<u64>, ValidationError> {
    let Some(value) = present(object, key) else {
        return Ok(None);
    };

    match value {
        Value::Number(n) => {
            if let Some(n) = n.as_u64() {
                Ok(Some(n))
            } else if n.as_f64().is_some_and(|f| f < 0.0) {
                NegativeValue { field }.fail()
            } else {
                WrongType {
                    field,
                    expected: "non-negative integer",
                }
                .fail()
            }
        }
        _ => WrongType {
            field,
            expected: "non-negative integer",
        }
        .fail(),
    }
}

fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, ValidationError> {
    let parsed = match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|ts| ts.with_timezone(&Utc)),
        Value::Number(n) => match n.as_u64() {
            Some(millis) => i64::try_from(millis)
                .ok()
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
            None => None,
        },
        _ => {
            return WrongType {
                field: "timestamp",
                expected: "RFC 3339 string or epoch milliseconds",
            }
            .fail()
        }
    };

    parsed.ok_or_else(|| UnparseableTimestamp { field: "timestamp" }.build())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn base() -> Value {
        json!({
            "session_id": "a",
            "page_url": "/p5",
            "tti": 1000,
            "ttar": 500,
            "timestamp": "2024-04-20T01:00:00Z",
            "user_actions": [{ "action": "click", "target": "buy", "time": 100 }],
        })
    }

    fn with(mut value: Value, key: &str, field_value: Value) -> Value {
        value.as_object_mut().unwrap().insert(key.to_string(), field_value);
        value
    }

    fn without(mut value: Value, key: &str) -> Value {
        value.as_object_mut().unwrap().remove(key);
        value
    }

    fn assert_rejected(raw: Value, field: &str, reason: ValidationReason) {
        let err = validate(&raw).unwrap_err();
        assert_eq!(err.field(), field, "unexpected field for {}", raw);
        assert_eq!(err.reason(), reason, "unexpected reason for {}", raw);
    }

    #[test]
    fn valid_record() {
        let record = validate(&base()).unwrap();

        assert_eq!(record.session_id, "a");
        assert_eq!(record.page_url, "/p5");
        assert_eq!(record.tti, Some(1000));
        assert_eq!(record.ttar, Some(500));
        assert_eq!(record.timestamp.to_rfc3339(), "2024-04-20T01:00:00+00:00");
        assert_eq!(
            record.user_actions,
            vec![UserAction {
                action: "click".to_string(),
                target: "buy".to_string(),
                time: 100,
            }]
        );
    }

    #[test]
    fn optional_fields_absent_or_null() {
        let raw = without(without(without(base(), "tti"), "user_actions"), "ttar");
        let record = validate(&raw).unwrap();
        assert_eq!(record.tti, None);
        assert_eq!(record.ttar, None);
        assert!(record.user_actions.is_empty());

        let raw = with(with(base(), "tti", Value::Null), "user_actions", Value::Null);
        let record = validate(&raw).unwrap();
        assert_eq!(record.tti, None);
        assert!(record.user_actions.is_empty());
    }

    #[test]
    fn missing_page_url() {
        assert_rejected(without(base(), "page_url"), "page_url", ValidationReason::Missing);
        assert_rejected(with(base(), "page_url", json!("")), "page_url", ValidationReason::Missing);
        assert_rejected(with(base(), "page_url", json!(5)), "page_url", ValidationReason::WrongType);
    }

    #[test]
    fn session_id_checks() {
        assert_rejected(without(base(), "session_id"), "session_id", ValidationReason::Missing);
        assert_rejected(with(base(), "session_id", json!(12)), "session_id", ValidationReason::WrongType);
    }

    #[test]
    fn negative_metrics_are_rejected_not_defaulted() {
        assert_rejected(with(base(), "tti", json!(-1)), "tti", ValidationReason::NegativeValue);
        assert_rejected(with(base(), "ttar", json!(-0.5)), "ttar", ValidationReason::NegativeValue);
        assert_rejected(with(base(), "tti", json!(1.5)), "tti", ValidationReason::WrongType);
        assert_rejected(with(base(), "tti", json!("1000")), "tti", ValidationReason::WrongType);
    }

    #[test]
    fn timestamp_checks() {
        assert_rejected(without(base(), "timestamp"), "timestamp", ValidationReason::Missing);
        assert_rejected(
            with(base(), "timestamp", json!("yesterday")),
            "timestamp",
            ValidationReason::UnparseableTimestamp,
        );
        assert_rejected(
            with(base(), "timestamp", json!(-5)),
            "timestamp",
            ValidationReason::UnparseableTimestamp,
        );
        assert_rejected(with(base(), "timestamp", json!(true)), "timestamp", ValidationReason::WrongType);

        let record = validate(&with(base(), "timestamp", json!(1_713_574_800_000u64))).unwrap();
        assert_eq!(record.timestamp.to_rfc3339(), "2024-04-20T01:00:00+00:00");

        let record = validate(&with(base(), "timestamp", json!("2024-04-20T03:00:00+02:00"))).unwrap();
        assert_eq!(record.timestamp.to_rfc3339(), "2024-04-20T01:00:00+00:00");
    }

    #[test]
    fn user_action_checks() {
        assert_rejected(
            with(base(), "user_actions", json!({ "action": "click" })),
            "user_actions",
            ValidationReason::WrongType,
        );
        assert_rejected(
            with(base(), "user_actions", json!([{ "action": "a", "target": "b", "time": 1 }, "click"])),
            "user_actions[1]",
            ValidationReason::WrongType,
        );
        assert_rejected(
            with(base(), "user_actions", json!([{ "target": "b", "time": 1 }])),
            "user_actions[0].action",
            ValidationReason::Missing,
        );
        assert_rejected(
            with(base(), "user_actions", json!([{ "action": "a", "target": 3, "time": 1 }])),
            "user_actions[0].target",
            ValidationReason::WrongType,
        );
        assert_rejected(
            with(base(), "user_actions", json!([{ "action": "a", "target": "b" }])),
            "user_actions[0].time",
            ValidationReason::Missing,
        );
        assert_rejected(
            with(base(), "user_actions", json!([{ "action": "a", "target": "b", "time": -3 }])),
            "user_actions[0].time",
            ValidationReason::NegativeValue,
        );
    }

    #[test]
    fn non_object_record() {
        assert_rejected(json!("{not json"), "record", ValidationReason::WrongType);
        assert_rejected(json!([1, 2, 3]), "record", ValidationReason::WrongType);
    }

    #[test]
    fn reason_codes() {
        let codes = [
            ValidationReason::Missing,
            ValidationReason::WrongType,
            ValidationReason::NegativeValue,
            ValidationReason::UnparseableTimestamp,
        ]
        .map(|reason| serde_json::to_value(reason).unwrap());

        assert_eq!(
            codes,
            [
                json!("missing"),
                json!("wrong_type"),
                json!("negative_value"),
                json!("unparseable_timestamp")
            ]
        );
    }
}
