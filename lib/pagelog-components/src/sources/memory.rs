use std::collections::VecDeque;

use async_trait::async_trait;
use pagelog_error::GenericError;
use serde_json::Value;

use super::{RawBatch, RecordSource};

/// A source that replays batches held in memory.
#[derive(Debug, Default)]
pub struct MemorySource {
    batches: VecDeque<RawBatch>,
}

impl MemorySource {
    /// Creates a new `MemorySource` from a list of batches.
    pub fn new(batches: impl IntoIterator<Item = RawBatch>) -> Self {
        Self {
            batches: batches.into_iter().collect(),
        }
    }

    /// Creates a new `MemorySource` from plain event lists, numbering batches `memory-0`, `memory-1` and so on.
    pub fn from_records(batches: impl IntoIterator<Item = Vec<Value>>) -> Self {
        Self::new(batches.into_iter().enumerate().map(|(idx, records)| RawBatch {
            id: format!("memory-{}", idx),
            records,
        }))
    }

    /// Returns the number of batches not yet pulled.
    pub fn remaining(&self) -> usize {
        self.batches.len()
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn next_batch(&mut self) -> Result<Option<RawBatch>, GenericError> {
        Ok(self.batches.pop_front())
    }
}
