use std::sync::Arc;

use futures::future::try_join_all;
use pagelog_core::{AggregationWindow, TransformEngine};
use snafu::ResultExt as _;
use tracing::{debug, info};

use super::{AdapterError, ReadPartitions, Telemetry, WriteAggregates};
use crate::destinations::{AnalyticalSink, PartitionStore};

/// Totals for a single aggregation run.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchSummary {
    /// Window that was aggregated.
    pub window: AggregationWindow,

    /// Partitions read.
    pub partitions_read: usize,

    /// Structured rows read across those partitions.
    pub records_read: usize,

    /// Aggregate records written.
    pub aggregates_written: usize,
}

/// Aggregates committed partitions into per-window output.
///
/// Each run reads every partition inside the window, aggregates the rows with the shared engine, and replaces the
/// sink contents for that window, so repeated runs over the same window converge on the same output.
pub struct BatchAdapter {
    engine: TransformEngine,
    store: Arc<dyn PartitionStore>,
    sink: Arc<dyn AnalyticalSink>,
    telemetry: Telemetry,
}

impl BatchAdapter {
    /// Creates a new `BatchAdapter`.
    pub fn new(engine: TransformEngine, store: Arc<dyn PartitionStore>, sink: Arc<dyn AnalyticalSink>) -> Self {
        Self {
            engine,
            store,
            sink,
            telemetry: Telemetry::new(),
        }
    }

    /// Sets the telemetry handles used by the adapter.
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Aggregates every partition inside `window`.
    ///
    /// A window with no committed partitions replaces the sink contents with an empty result.
    ///
    /// # Errors
    ///
    /// If partitions cannot be listed or read, or the aggregates cannot be written, an error is returned and the sink
    /// contents for the window are left untouched.
    pub async fn run(&self, window: &AggregationWindow) -> Result<BatchSummary, AdapterError> {
        let window_id = window.id();

        let partitions = self
            .store
            .list_partitions()
            .await
            .context(ReadPartitions { window: &window_id })?
            .into_iter()
            .filter(|key| window.contains(key))
            .collect::<Vec<_>>();
        debug!(window = %window_id, partitions = partitions.len(), "Reading partitions.");

        let rows = try_join_all(partitions.iter().map(|key| self.store.read_partition(key)))
            .await
            .context(ReadPartitions { window: &window_id })?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();

        let aggregates = self.engine.aggregate(&rows);
        self.sink
            .replace(window, &aggregates)
            .await
            .context(WriteAggregates { window: &window_id })?;
        self.telemetry.increment_aggregate_records_written(aggregates.len());

        info!(
            window = %window_id,
            partitions = partitions.len(),
            records = rows.len(),
            pages = aggregates.len(),
            "Aggregated window."
        );

        Ok(BatchSummary {
            window: *window,
            partitions_read: partitions.len(),
            records_read: rows.len(),
            aggregates_written: aggregates.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use pagelog_core::{AggregateRecord, PartitionKey, RecordOutcome};
    use serde_json::json;

    use super::*;
    use crate::destinations::{MemoryAnalyticalSink, MemoryPartitionStore, PartitionedBatch};

    fn key(s: &str) -> PartitionKey {
        s.parse().unwrap()
    }

    async fn seed(store: &MemoryPartitionStore, engine: &TransformEngine, batch_id: &str, raw: Vec<serde_json::Value>) {
        let mut batch = PartitionedBatch::default();
        for value in raw {
            match engine.process(&value) {
                RecordOutcome::Accepted { partition, records } => batch.push(partition, records),
                RecordOutcome::Rejected(e) => panic!("unexpected rejection: {}", e),
            }
        }
        store.append_batch(batch_id, &batch).await.unwrap();
    }

    fn adapter(
        engine: &TransformEngine, store: &Arc<MemoryPartitionStore>, sink: &Arc<MemoryAnalyticalSink>,
    ) -> BatchAdapter {
        BatchAdapter::new(engine.clone(), store.clone(), sink.clone()).with_telemetry(Telemetry::noop())
    }

    #[tokio::test]
    async fn aggregates_only_partitions_in_window() {
        let engine = TransformEngine::default();
        let store = Arc::new(MemoryPartitionStore::default());
        let sink = Arc::new(MemoryAnalyticalSink::default());

        seed(
            &store,
            &engine,
            "b-1",
            vec![
                json!({
                    "session_id": "a", "page_url": "/p5", "tti": 1000, "ttar": 500,
                    "timestamp": "2024-04-20T01:00:00Z",
                    "user_actions": [{ "action": "click", "target": "buy", "time": 100 }],
                }),
                json!({
                    "session_id": "b", "page_url": "/p5", "tti": 2000, "ttar": 700,
                    "timestamp": "2024-04-20T23:00:00Z",
                }),
                json!({
                    "session_id": "c", "page_url": "/p5", "tti": 9000, "ttar": 9000,
                    "timestamp": "2024-04-21T00:00:00Z",
                }),
            ],
        )
        .await;

        let window = AggregationWindow::single(key("2024-04-20"));
        let summary = adapter(&engine, &store, &sink).run(&window).await.unwrap();
        assert_eq!(summary.partitions_read, 1);
        assert_eq!(summary.records_read, 2);
        assert_eq!(summary.aggregates_written, 1);

        similar_asserts::assert_eq!(
            sink.read(&window).await.unwrap(),
            Some(vec![AggregateRecord {
                page_url: "/p5".to_string(),
                avg_tti: 1500.0,
                avg_ttar: 600.0,
                count: 2,
            }])
        );
    }

    #[tokio::test]
    async fn reruns_replace_rather_than_append() {
        let engine = TransformEngine::default();
        let store = Arc::new(MemoryPartitionStore::default());
        let sink = Arc::new(MemoryAnalyticalSink::default());
        let window = AggregationWindow::new(key("2024-04-20"), key("2024-04-21"));

        seed(
            &store,
            &engine,
            "b-1",
            vec![json!({ "session_id": "a", "page_url": "/x", "tti": 10, "timestamp": "2024-04-20T05:00:00Z" })],
        )
        .await;

        let adapter = adapter(&engine, &store, &sink);
        adapter.run(&window).await.unwrap();
        let first = sink.read(&window).await.unwrap();
        adapter.run(&window).await.unwrap();
        assert_eq!(sink.read(&window).await.unwrap(), first);

        seed(
            &store,
            &engine,
            "b-2",
            vec![json!({ "session_id": "b", "page_url": "/x", "tti": 30, "timestamp": "2024-04-21T05:00:00Z" })],
        )
        .await;
        adapter.run(&window).await.unwrap();

        let aggregates = sink.read(&window).await.unwrap().unwrap();
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].count, 2);
        assert_eq!(aggregates[0].avg_tti, 20.0);
    }

    #[tokio::test]
    async fn empty_window_writes_empty_result() {
        let engine = TransformEngine::default();
        let store = Arc::new(MemoryPartitionStore::default());
        let sink = Arc::new(MemoryAnalyticalSink::default());
        let window = AggregationWindow::single(key("2024-04-20"));

        let summary = adapter(&engine, &store, &sink).run(&window).await.unwrap();
        assert_eq!(summary.partitions_read, 0);
        assert_eq!(sink.read(&window).await.unwrap(), Some(Vec::new()));
    }
}
