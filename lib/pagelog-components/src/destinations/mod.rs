//! Destination implementations.
//!
//! Three kinds of storage sit behind the adapters: a partitioned store for structured rows, an analytical sink for
//! aggregate output, and a quarantine sink for rejected records. Each has a filesystem implementation and an
//! in-memory one.

use std::{collections::BTreeMap, path::PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pagelog_core::{
    AggregateRecord, AggregationWindow, PartitionKey, StructuredRecord, ValidationError, ValidationReason,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::Snafu;

mod filesystem;
pub use self::filesystem::{FilesystemAnalyticalSink, FilesystemPartitionStore, FilesystemQuarantineSink};

mod memory;
pub use self::memory::{MemoryAnalyticalSink, MemoryPartitionStore, MemoryQuarantineSink};

/// Storage error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum StoreError {
    /// An I/O operation failed.
    #[snafu(display("I/O error at '{}': {}", path.display(), source))]
    Io {
        /// Path being operated on.
        path: PathBuf,

        /// Underlying error.
        source: std::io::Error,
    },

    /// A value could not be serialized.
    #[snafu(display("Failed to encode {}: {}", what, source))]
    Encode {
        /// What was being encoded.
        what: &'static str,

        /// Underlying error.
        source: serde_json::Error,
    },

    /// Stored data could not be deserialized.
    #[snafu(display("Failed to decode '{}' at line {}: {}", path.display(), line, source))]
    Decode {
        /// File holding the bad data.
        path: PathBuf,

        /// Line number within the file, starting at 1.
        line: usize,

        /// Underlying error.
        source: serde_json::Error,
    },

    /// The store is temporarily unable to accept writes.
    #[snafu(display("Store unavailable: {}", reason))]
    Unavailable {
        /// Why the store refused the operation.
        reason: String,
    },
}

/// Structured rows from one source batch, grouped by partition.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartitionedBatch {
    partitions: BTreeMap<PartitionKey, Vec<StructuredRecord>>,
}

impl PartitionedBatch {
    /// Adds rows to the given partition.
    pub fn push(&mut self, partition: PartitionKey, records: impl IntoIterator<Item = StructuredRecord>) {
        self.partitions.entry(partition).or_default().extend(records);
    }

    /// Returns `true` if the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.partitions.values().all(Vec::is_empty)
    }

    /// Returns the number of partitions touched by the batch.
    pub fn partition_count(&self) -> usize {
        self.iter().count()
    }

    /// Returns the total number of rows across all partitions.
    pub fn record_count(&self) -> usize {
        self.partitions.values().map(Vec::len).sum()
    }

    /// Iterates over partitions in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&PartitionKey, &[StructuredRecord])> {
        self.partitions
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(key, records)| (key, records.as_slice()))
    }
}

/// A rejected raw record, along with why it was rejected.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct QuarantineEntry {
    /// Source batch the record arrived in.
    pub batch_id: String,

    /// Path of the offending field.
    pub field: String,

    /// Reason code.
    pub reason: ValidationReason,

    /// Human-readable description of the failure.
    pub message: String,

    /// The record exactly as it was received.
    pub raw: Value,

    /// When the record was quarantined.
    pub quarantined_at: DateTime<Utc>,
}

impl QuarantineEntry {
    /// Creates a new `QuarantineEntry`.
    pub fn new(
        batch_id: impl Into<String>, raw: Value, error: &ValidationError, quarantined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            field: error.field().to_string(),
            reason: error.reason(),
            message: error.to_string(),
            raw,
            quarantined_at,
        }
    }
}

/// Partitioned storage for structured rows.
#[async_trait]
pub trait PartitionStore: Send + Sync {
    /// Appends a batch of rows.
    ///
    /// The write is atomic across every partition in the batch: either all rows become visible or none do. Writing the
    /// same `batch_id` again replaces the earlier copy rather than duplicating it.
    ///
    /// # Errors
    ///
    /// If the batch cannot be written, an error is returned and no rows from it are visible.
    async fn append_batch(&self, batch_id: &str, batch: &PartitionedBatch) -> Result<(), StoreError>;

    /// Reads every row in a partition.
    ///
    /// A partition that does not exist reads as empty.
    ///
    /// # Errors
    ///
    /// If the partition cannot be read, an error is returned.
    async fn read_partition(&self, key: &PartitionKey) -> Result<Vec<StructuredRecord>, StoreError>;

    /// Lists every partition holding at least one committed batch, in key order.
    ///
    /// # Errors
    ///
    /// If the store cannot be listed, an error is returned.
    async fn list_partitions(&self) -> Result<Vec<PartitionKey>, StoreError>;
}

/// Storage for aggregate output, keyed by window.
#[async_trait]
pub trait AnalyticalSink: Send + Sync {
    /// Replaces the aggregates stored for `window`.
    ///
    /// Re-running an aggregation for the same window overwrites rather than appends.
    ///
    /// # Errors
    ///
    /// If the aggregates cannot be written, an error is returned and the previous contents are left in place.
    async fn replace(&self, window: &AggregationWindow, records: &[AggregateRecord]) -> Result<(), StoreError>;

    /// Reads the aggregates stored for `window`, if any.
    ///
    /// # Errors
    ///
    /// If the stored aggregates cannot be read, an error is returned.
    async fn read(&self, window: &AggregationWindow) -> Result<Option<Vec<AggregateRecord>>, StoreError>;
}

/// Storage for rejected records.
#[async_trait]
pub trait QuarantineSink: Send + Sync {
    /// Stores the rejected records of a batch.
    ///
    /// Storing the same `batch_id` again replaces the earlier entries.
    ///
    /// # Errors
    ///
    /// If the entries cannot be written, an error is returned.
    async fn quarantine(&self, batch_id: &str, entries: &[QuarantineEntry]) -> Result<(), StoreError>;
}

/// Maps a batch identifier onto a string that is safe to use as a file name.
fn sanitize_batch_id(batch_id: &str) -> String {
    batch_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_ids_are_sanitized() {
        assert_eq!(sanitize_batch_id("app.log-0000000001"), "app.log-0000000001");
        assert_eq!(sanitize_batch_id("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_batch_id("a b:c"), "a_b_c");
    }

    #[test]
    fn empty_partitions_are_skipped() {
        let key: PartitionKey = "2024-04-20".parse().unwrap();

        let mut batch = PartitionedBatch::default();
        batch.push(key, Vec::new());
        assert!(batch.is_empty());
        assert_eq!(batch.iter().count(), 0);
        assert_eq!(batch.record_count(), 0);
    }
}
