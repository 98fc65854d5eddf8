//! Source implementations.

use async_trait::async_trait;
use pagelog_error::GenericError;
use serde_json::Value;

mod memory;
pub use self::memory::MemorySource;

mod ndjson;
pub use self::ndjson::NdjsonSource;

/// A batch of raw, decoded events pulled from a source.
#[derive(Clone, Debug, PartialEq)]
pub struct RawBatch {
    /// Identifier of the batch.
    ///
    /// Identifiers are stable for a given position and content in the source, so a batch that is redelivered after a
    /// failure maps onto the same identifier and downstream writes stay idempotent, while different content never
    /// reuses an identifier.
    pub id: String,

    /// Raw events in the order they were read.
    ///
    /// Lines that could not be decoded as JSON are carried as [`Value::String`] holding the original text (lossily
    /// converted when it is not UTF-8), so they fail validation and get quarantined rather than vanishing.
    pub records: Vec<Value>,
}

/// A source of raw event batches.
#[async_trait]
pub trait RecordSource: Send {
    /// Returns the name of the source, for logging.
    fn name(&self) -> &str;

    /// Pulls the next batch.
    ///
    /// Returns `Ok(None)` once the source is exhausted.
    ///
    /// # Errors
    ///
    /// If the underlying input cannot be read, an error is returned.
    async fn next_batch(&mut self) -> Result<Option<RawBatch>, GenericError>;
}
