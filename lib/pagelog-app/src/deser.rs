use std::fmt;

use serde::{
    de::{Error, Unexpected, Visitor},
    Deserializer,
};
use serde_with::DeserializeAs;

/// Deserializes a `bool` from a native boolean, a string, or the integers 0 and 1.
///
/// Values set through environment variables arrive as strings, so `PAGELOG_LOG_FORMAT_JSON=yes` needs to work just as
/// well as `log_format_json: true` in a file. Accepted strings are `true`/`false`, `yes`/`no`, `on`/`off` and `1`/`0`,
/// compared case-insensitively.
pub(crate) struct LenientBool;

impl<'de> DeserializeAs<'de, bool> for LenientBool {
    fn deserialize_as<D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(LenientBoolVisitor)
    }
}

struct LenientBoolVisitor;

impl Visitor<'_> for LenientBoolVisitor {
    type Value = bool;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a boolean, a boolean-like string, or 0/1")
    }

    fn visit_bool<E: Error>(self, value: bool) -> Result<bool, E> {
        Ok(value)
    }

    fn visit_str<E: Error>(self, value: &str) -> Result<bool, E> {
        match value.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(E::invalid_value(Unexpected::Str(value), &self)),
        }
    }

    fn visit_i64<E: Error>(self, value: i64) -> Result<bool, E> {
        match value {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(E::invalid_value(Unexpected::Signed(value), &self)),
        }
    }

    fn visit_u64<E: Error>(self, value: u64) -> Result<bool, E> {
        match value {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(E::invalid_value(Unexpected::Unsigned(value), &self)),
        }
    }
}
