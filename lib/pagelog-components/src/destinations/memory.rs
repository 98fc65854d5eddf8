use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use pagelog_core::{AggregateRecord, AggregationWindow, PartitionKey, StructuredRecord};
use tokio::sync::Mutex;

use super::{
    AnalyticalSink, PartitionStore, PartitionedBatch, QuarantineEntry, QuarantineSink, StoreError, Unavailable,
};

/// An in-memory [`PartitionStore`].
///
/// Can be told to reject a number of upcoming writes, which makes it useful for exercising retry behavior.
#[derive(Debug, Default)]
pub struct MemoryPartitionStore {
    partitions: Mutex<BTreeMap<PartitionKey, BTreeMap<String, Vec<StructuredRecord>>>>,
    failures_remaining: AtomicUsize,
    append_attempts: AtomicUsize,
}

impl MemoryPartitionStore {
    /// Makes the next `count` calls to `append_batch` fail without writing anything.
    pub fn fail_next_appends(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Returns how many times `append_batch` has been called, including failed calls.
    pub fn append_attempts(&self) -> usize {
        self.append_attempts.load(Ordering::SeqCst)
    }

    /// Returns the number of rows held across all partitions.
    pub async fn record_count(&self) -> usize {
        self.partitions
            .lock()
            .await
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| remaining.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PartitionStore for MemoryPartitionStore {
    async fn append_batch(&self, batch_id: &str, batch: &PartitionedBatch) -> Result<(), StoreError> {
        self.append_attempts.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            return Unavailable {
                reason: format!("injected failure for batch '{}'", batch_id),
            }
            .fail();
        }

        let mut partitions = self.partitions.lock().await;
        for (key, records) in batch.iter() {
            partitions
                .entry(*key)
                .or_default()
                .insert(batch_id.to_string(), records.to_vec());
        }

        Ok(())
    }

    async fn read_partition(&self, key: &PartitionKey) -> Result<Vec<StructuredRecord>, StoreError> {
        let partitions = self.partitions.lock().await;
        Ok(partitions
            .get(key)
            .map(|batches| batches.values().flatten().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_partitions(&self) -> Result<Vec<PartitionKey>, StoreError> {
        Ok(self.partitions.lock().await.keys().copied().collect())
    }
}

/// An in-memory [`AnalyticalSink`].
#[derive(Debug, Default)]
pub struct MemoryAnalyticalSink {
    windows: Mutex<HashMap<AggregationWindow, Vec<AggregateRecord>>>,
}

#[async_trait]
impl AnalyticalSink for MemoryAnalyticalSink {
    async fn replace(&self, window: &AggregationWindow, records: &[AggregateRecord]) -> Result<(), StoreError> {
        self.windows.lock().await.insert(*window, records.to_vec());
        Ok(())
    }

    async fn read(&self, window: &AggregationWindow) -> Result<Option<Vec<AggregateRecord>>, StoreError> {
        Ok(self.windows.lock().await.get(window).cloned())
    }
}

/// An in-memory [`QuarantineSink`].
#[derive(Debug, Default)]
pub struct MemoryQuarantineSink {
    batches: Mutex<BTreeMap<String, Vec<QuarantineEntry>>>,
}

impl MemoryQuarantineSink {
    /// Returns every stored entry, ordered by batch identifier.
    pub async fn entries(&self) -> Vec<QuarantineEntry> {
        self.batches.lock().await.values().flatten().cloned().collect()
    }
}

#[async_trait]
impl QuarantineSink for MemoryQuarantineSink {
    async fn quarantine(&self, batch_id: &str, entries: &[QuarantineEntry]) -> Result<(), StoreError> {
        self.batches
            .lock()
            .await
            .insert(batch_id.to_string(), entries.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_failures_write_nothing() {
        let store = MemoryPartitionStore::default();
        store.fail_next_appends(2);

        let batch = PartitionedBatch::default();
        assert!(store.append_batch("b-1", &batch).await.is_err());
        assert!(store.append_batch("b-1", &batch).await.is_err());
        assert!(store.append_batch("b-1", &batch).await.is_ok());
        assert_eq!(store.append_attempts(), 3);
        assert_eq!(store.record_count().await, 0);
    }
}
