use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{
    aggregate, partition_key_of, to_structured, validate, AggregateRecord, LogRecord, PartitionKey, SourceType,
    StructuredRecord, TransformConfiguration, ValidationError,
};

/// Result of running a single raw record through validation and flattening.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordOutcome {
    /// The record was valid.
    Accepted {
        /// Partition the rows belong in, derived from the event timestamp.
        partition: PartitionKey,

        /// Flattened rows. Never empty.
        records: Vec<StructuredRecord>,
    },

    /// The record was rejected and should be quarantined.
    Rejected(ValidationError),
}

/// The transform engine.
///
/// Holds nothing but its configuration, so it is cheap to clone and safe to share across threads and tasks. Both the
/// streaming and batch adapters drive the same engine.
#[derive(Clone, Debug, Default)]
pub struct TransformEngine {
    config: TransformConfiguration,
}

impl TransformEngine {
    /// Creates a new `TransformEngine` from the given configuration.
    pub fn new(config: TransformConfiguration) -> Self {
        Self { config }
    }

    /// Returns the engine configuration.
    pub const fn config(&self) -> &TransformConfiguration {
        &self.config
    }

    /// Validates a decoded raw record.
    ///
    /// # Errors
    ///
    /// If the record is malformed, a [`ValidationError`] is returned.
    pub fn validate(&self, raw: &Value) -> Result<LogRecord, ValidationError> {
        validate(raw)
    }

    /// Flattens a validated record, stamping the current wall-clock time as the ingest timestamp.
    pub fn to_structured(&self, record: &LogRecord, source_type: SourceType) -> Vec<StructuredRecord> {
        self.to_structured_at(record, source_type, Utc::now())
    }

    /// Flattens a validated record using an explicit ingest timestamp.
    pub fn to_structured_at(
        &self, record: &LogRecord, source_type: SourceType, ingest_timestamp: DateTime<Utc>,
    ) -> Vec<StructuredRecord> {
        to_structured(record, source_type, &self.config, ingest_timestamp)
    }

    /// Validates and flattens a raw record using the configured source type.
    pub fn process(&self, raw: &Value) -> RecordOutcome {
        self.process_at(raw, Utc::now())
    }

    /// Validates and flattens a raw record using the configured source type and an explicit ingest timestamp.
    pub fn process_at(&self, raw: &Value, ingest_timestamp: DateTime<Utc>) -> RecordOutcome {
        match self.validate(raw) {
            Ok(record) => RecordOutcome::Accepted {
                partition: self.partition_key_of(&record.timestamp),
                records: self.to_structured_at(&record, self.config.source_type, ingest_timestamp),
            },
            Err(e) => RecordOutcome::Rejected(e),
        }
    }

    /// Aggregates structured rows into per-page means.
    pub fn aggregate(&self, records: &[StructuredRecord]) -> Vec<AggregateRecord> {
        aggregate(records)
    }

    /// Derives the partition key for a timestamp at the configured granularity.
    pub fn partition_key_of(&self, timestamp: &DateTime<Utc>) -> PartitionKey {
        partition_key_of(timestamp, self.config.partition_granularity)
    }
}
