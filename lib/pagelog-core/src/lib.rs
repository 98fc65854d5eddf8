//! The shared transform engine.
//!
//! Raw log events are validated into [`LogRecord`]s, flattened into [`StructuredRecord`]s (one row per user action)
//! and later folded into per-page [`AggregateRecord`]s. The same engine backs both the streaming and the batch path,
//! so both paths derive identical data from identical input.
//!
//! Everything in this crate is pure: no I/O, no shared mutable state, and the only ambient input is the wall clock
//! read for `ingest_timestamp`.
#![deny(warnings)]
#![deny(missing_docs)]

mod aggregate;
pub use self::aggregate::aggregate;

mod config;
pub use self::config::{PartitionGranularity, SourceType, TransformConfiguration};

mod engine;
pub use self::engine::{RecordOutcome, TransformEngine};

mod partition;
pub use self::partition::{partition_key_of, AggregationWindow, PartitionKey, PartitionKeyParseError};

mod record;
pub use self::record::{AggregateRecord, LogRecord, StructuredRecord, UserAction, NONE_SENTINEL};

mod structured;
pub use self::structured::to_structured;

mod validate;
pub use self::validate::{validate, ValidationError, ValidationReason};

#[cfg(test)]
pub(crate) mod test_util;
