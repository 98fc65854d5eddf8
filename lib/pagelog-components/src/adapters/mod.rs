//! Adapters that drive the transform engine.
//!
//! The streaming adapter turns raw event batches into committed partitions, and the batch adapter turns committed
//! partitions into per-window aggregates. Both share a single [`TransformEngine`][pagelog_core::TransformEngine], so
//! the two paths derive identical rows from identical input.

use pagelog_error::GenericError;
use snafu::Snafu;

use crate::destinations::StoreError;

mod batch;
pub use self::batch::{BatchAdapter, BatchSummary};

mod monitor;
pub use self::monitor::{ErrorRateAlert, ErrorRateMonitor};

mod streaming;
pub use self::streaming::{BatchOutcome, StreamSummary, StreamingAdapter, StreamingConfiguration};

mod telemetry;
pub use self::telemetry::Telemetry;

/// Adapter error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum AdapterError {
    /// The source failed to produce a batch.
    #[snafu(display("Failed to read from source '{}': {}", source_name, source))]
    Source {
        /// Name of the source.
        source_name: String,

        /// Underlying error.
        source: GenericError,
    },

    /// A batch could not be committed to the partition store, even after retrying.
    #[snafu(display("Failed to commit batch '{}' after {} attempt(s): {}", batch_id, attempts, source))]
    Commit {
        /// Identifier of the failed batch.
        batch_id: String,

        /// Number of attempts made.
        attempts: usize,

        /// Error from the final attempt.
        source: StoreError,
    },

    /// Rejected records of a batch could not be quarantined, even after retrying.
    #[snafu(display("Failed to quarantine rejected records of batch '{}': {}", batch_id, source))]
    Quarantine {
        /// Identifier of the failed batch.
        batch_id: String,

        /// Error from the final attempt.
        source: StoreError,
    },

    /// Partitions for an aggregation window could not be listed or read.
    #[snafu(display("Failed to read partitions for window '{}': {}", window, source))]
    ReadPartitions {
        /// Identifier of the window.
        window: String,

        /// Underlying error.
        source: StoreError,
    },

    /// Aggregates for a window could not be written.
    #[snafu(display("Failed to write aggregates for window '{}': {}", window, source))]
    WriteAggregates {
        /// Identifier of the window.
        window: String,

        /// Underlying error.
        source: StoreError,
    },
}
