use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use backon::{BackoffBuilder, ExponentialBuilder, Retryable as _};
use chrono::Utc;
use pagelog_config::{ConfigurationError, GenericConfiguration};
use pagelog_core::{RecordOutcome, TransformEngine};
use serde::{Deserialize, Serialize};
use snafu::ResultExt as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AdapterError, Commit, ErrorRateAlert, ErrorRateMonitor, Quarantine, Source, Telemetry};
use crate::{
    destinations::{PartitionStore, PartitionedBatch, QuarantineEntry, QuarantineSink},
    sources::{RawBatch, RecordSource},
};

const fn default_batch_size() -> usize {
    500
}

const fn default_write_attempts() -> usize {
    3
}

const fn default_min_backoff_ms() -> u64 {
    100
}

const fn default_max_backoff_ms() -> u64 {
    5000
}

const fn default_alert_threshold() -> f64 {
    0.1
}

const fn default_alert_window_batches() -> usize {
    10
}

const fn default_alert_min_records() -> u64 {
    20
}

/// Streaming adapter configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StreamingConfiguration {
    /// Maximum number of raw events pulled from the source per batch.
    ///
    /// Defaults to 500.
    #[serde(rename = "stream_batch_size", default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of attempts made to commit a batch before giving up.
    ///
    /// Defaults to 3.
    #[serde(rename = "store_write_attempts", default = "default_write_attempts")]
    pub write_attempts: usize,

    /// Delay before the first retry, in milliseconds. Later retries back off exponentially.
    ///
    /// Defaults to 100ms.
    #[serde(rename = "store_write_min_backoff_ms", default = "default_min_backoff_ms")]
    pub min_backoff_ms: u64,

    /// Upper bound on the delay between retries, in milliseconds.
    ///
    /// Defaults to 5000ms.
    #[serde(rename = "store_write_max_backoff_ms", default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Quarantine rate above which an alert is raised, as a fraction between 0 and 1.
    ///
    /// Defaults to 0.1.
    #[serde(rename = "quarantine_alert_threshold", default = "default_alert_threshold")]
    pub alert_threshold: f64,

    /// Number of recent batches the quarantine rate is computed over.
    ///
    /// Defaults to 10.
    #[serde(rename = "quarantine_alert_window_batches", default = "default_alert_window_batches")]
    pub alert_window_batches: usize,

    /// Minimum number of records the window must hold before an alert can fire.
    ///
    /// Defaults to 20.
    #[serde(rename = "quarantine_alert_min_records", default = "default_alert_min_records")]
    pub alert_min_records: u64,
}

impl StreamingConfiguration {
    /// Creates a new `StreamingConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If any option holds an invalid value, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, ConfigurationError> {
        let streaming: Self = config.as_typed()?;
        streaming.validate()?;
        Ok(streaming)
    }

    /// Creates a new `StreamingConfiguration` with default values.
    pub fn with_defaults() -> Self {
        Self {
            batch_size: default_batch_size(),
            write_attempts: default_write_attempts(),
            min_backoff_ms: default_min_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            alert_threshold: default_alert_threshold(),
            alert_window_batches: default_alert_window_batches(),
            alert_min_records: default_alert_min_records(),
        }
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.batch_size == 0 {
            return Err(ConfigurationError::invalid_value("stream_batch_size", "must be at least 1"));
        }
        if self.write_attempts == 0 {
            return Err(ConfigurationError::invalid_value("store_write_attempts", "must be at least 1"));
        }
        if self.min_backoff_ms > self.max_backoff_ms {
            return Err(ConfigurationError::invalid_value(
                "store_write_min_backoff_ms",
                "must not exceed store_write_max_backoff_ms",
            ));
        }
        let threshold_in_range = self.alert_threshold > 0.0 && self.alert_threshold <= 1.0;
        if !threshold_in_range {
            return Err(ConfigurationError::invalid_value(
                "quarantine_alert_threshold",
                "must be greater than 0 and at most 1",
            ));
        }
        if self.alert_window_batches == 0 {
            return Err(ConfigurationError::invalid_value(
                "quarantine_alert_window_batches",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for StreamingConfiguration {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl BackoffBuilder for &StreamingConfiguration {
    type Backoff = <ExponentialBuilder as BackoffBuilder>::Backoff;

    fn build(self) -> Self::Backoff {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_backoff_ms))
            .with_max_delay(Duration::from_millis(self.max_backoff_ms))
            .with_max_times(self.write_attempts.saturating_sub(1))
            .build()
    }
}

/// Result of committing a single batch.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchOutcome {
    /// Identifier of the batch.
    pub batch_id: String,

    /// Raw records in the batch.
    pub received: usize,

    /// Raw records that passed validation.
    pub accepted: usize,

    /// Raw records that were quarantined.
    pub quarantined: usize,

    /// Structured rows written to the partition store.
    pub structured_records: usize,

    /// Partitions the batch touched.
    pub partitions: usize,

    /// Alert raised by this batch, if it pushed the quarantine rate over the threshold.
    pub alert: Option<ErrorRateAlert>,
}

/// Totals for a streaming run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamSummary {
    /// Batches committed.
    pub batches_committed: usize,

    /// Raw records received across committed batches.
    pub records_received: usize,

    /// Raw records that passed validation.
    pub records_accepted: usize,

    /// Raw records that were quarantined.
    pub records_quarantined: usize,

    /// Structured rows written.
    pub structured_records_written: usize,

    /// Quarantine rate alerts raised.
    pub alerts_raised: usize,

    /// Whether the run stopped because it was cancelled rather than because the source ran dry.
    pub cancelled: bool,
}

impl StreamSummary {
    fn add(&mut self, outcome: &BatchOutcome) {
        self.batches_committed += 1;
        self.records_received += outcome.received;
        self.records_accepted += outcome.accepted;
        self.records_quarantined += outcome.quarantined;
        self.structured_records_written += outcome.structured_records;
        if outcome.alert.is_some() {
            self.alerts_raised += 1;
        }
    }
}

struct PreparedBatch {
    id: String,
    received: usize,
    accepted: usize,
    partitioned: PartitionedBatch,
    rejected: Vec<QuarantineEntry>,
}

/// Drives raw event batches through the transform engine into the partition store.
///
/// Each batch is validated and flattened record by record. Accepted rows are grouped by partition and committed with a
/// single `append_batch` call, retried with exponential backoff. Rejected records go to the quarantine sink. Delivery
/// is at-least-once: a batch that fails is reported as failed and can be redelivered under the same identifier without
/// duplicating rows.
pub struct StreamingAdapter {
    engine: TransformEngine,
    config: StreamingConfiguration,
    store: Arc<dyn PartitionStore>,
    quarantine: Arc<dyn QuarantineSink>,
    monitor: ErrorRateMonitor,
    telemetry: Telemetry,
}

impl StreamingAdapter {
    /// Creates a new `StreamingAdapter`.
    pub fn new(
        engine: TransformEngine, config: StreamingConfiguration, store: Arc<dyn PartitionStore>,
        quarantine: Arc<dyn QuarantineSink>,
    ) -> Self {
        let monitor = ErrorRateMonitor::new(
            config.alert_threshold,
            config.alert_window_batches,
            config.alert_min_records,
        );

        Self {
            engine,
            config,
            store,
            quarantine,
            monitor,
            telemetry: Telemetry::new(),
        }
    }

    /// Sets the telemetry handles used by the adapter.
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Pulls batches from `source` until it is exhausted or `shutdown` is cancelled.
    ///
    /// Cancellation is honored while waiting on the source and between batches. A batch that has been pulled but not
    /// yet committed when cancellation is observed is abandoned without writing anything.
    ///
    /// # Errors
    ///
    /// If the source fails, or a batch cannot be committed after exhausting its retries, an error is returned.
    /// Batches committed before the failure stay committed.
    pub async fn run<S>(&mut self, source: &mut S, shutdown: CancellationToken) -> Result<StreamSummary, AdapterError>
    where
        S: RecordSource + ?Sized,
    {
        let source_name = source.name().to_string();
        info!(source = %source_name, source_type = %self.engine.config().source_type, "Streaming adapter started.");

        let mut summary = StreamSummary::default();
        loop {
            let next = tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                next = source.next_batch() => next.context(Source { source_name: &source_name })?,
            };

            let Some(batch) = next else {
                break;
            };

            let prepared = self.prepare(batch);
            if shutdown.is_cancelled() {
                info!(batch_id = %prepared.id, "Abandoning in-flight batch due to shutdown.");
                summary.cancelled = true;
                break;
            }

            let outcome = self.commit(prepared).await?;
            summary.add(&outcome);
        }

        info!(
            source = %source_name,
            batches = summary.batches_committed,
            received = summary.records_received,
            quarantined = summary.records_quarantined,
            written = summary.structured_records_written,
            cancelled = summary.cancelled,
            "Streaming adapter stopped."
        );

        Ok(summary)
    }

    /// Validates, flattens and commits a single batch.
    ///
    /// # Errors
    ///
    /// If the batch cannot be committed after exhausting its retries, an error is returned and none of its rows are
    /// visible in the partition store.
    pub async fn process_batch(&mut self, batch: RawBatch) -> Result<BatchOutcome, AdapterError> {
        let prepared = self.prepare(batch);
        self.commit(prepared).await
    }

    fn prepare(&self, batch: RawBatch) -> PreparedBatch {
        let received = batch.records.len();
        self.telemetry.increment_records_received(received);

        let mut prepared = PreparedBatch {
            id: batch.id,
            received,
            accepted: 0,
            partitioned: PartitionedBatch::default(),
            rejected: Vec::new(),
        };

        for raw in batch.records {
            match self.engine.process(&raw) {
                RecordOutcome::Accepted { partition, records } => {
                    prepared.accepted += 1;
                    prepared.partitioned.push(partition, records);
                }
                RecordOutcome::Rejected(e) => {
                    debug!(batch_id = %prepared.id, field = e.field(), reason = %e.reason(), "Rejected record.");
                    prepared
                        .rejected
                        .push(QuarantineEntry::new(prepared.id.as_str(), raw, &e, Utc::now()));
                }
            }
        }

        prepared
    }

    async fn commit(&mut self, prepared: PreparedBatch) -> Result<BatchOutcome, AdapterError> {
        let started = Instant::now();
        let batch_id = prepared.id.as_str();

        if !prepared.partitioned.is_empty() {
            let store = &self.store;
            let partitioned = &prepared.partitioned;
            let result = (|| async move { store.append_batch(batch_id, partitioned).await })
                .retry(&self.config)
                .notify(|e, delay| {
                    warn!(batch_id, error = %e, "Failed to commit batch. Retrying in {:?}...", delay);
                })
                .await;

            if let Err(e) = result {
                self.telemetry.increment_batches_failed();
                return Err(e).context(Commit {
                    batch_id,
                    attempts: self.config.write_attempts,
                });
            }
        }

        if !prepared.rejected.is_empty() {
            let quarantine = &self.quarantine;
            let rejected = prepared.rejected.as_slice();
            let result = (|| async move { quarantine.quarantine(batch_id, rejected).await })
                .retry(&self.config)
                .notify(|e, delay| {
                    warn!(batch_id, error = %e, "Failed to quarantine rejected records. Retrying in {:?}...", delay);
                })
                .await;

            if let Err(e) = result {
                self.telemetry.increment_batches_failed();
                return Err(e).context(Quarantine { batch_id });
            }

            for entry in &prepared.rejected {
                self.telemetry.increment_records_quarantined(entry.reason);
            }
        }

        let structured_records = prepared.partitioned.record_count();
        self.telemetry.increment_structured_records_written(structured_records);
        self.telemetry.increment_batches_committed();
        self.telemetry.record_batch_duration(started.elapsed());

        let alert = self
            .monitor
            .observe(prepared.received as u64, prepared.rejected.len() as u64);
        if let Some(alert) = alert {
            self.telemetry.increment_quarantine_alerts();
            warn!(
                rate = alert.rate,
                received = alert.received,
                rejected = alert.rejected,
                threshold = self.config.alert_threshold,
                "Quarantine rate is above threshold."
            );
        }

        debug!(
            batch_id,
            received = prepared.received,
            quarantined = prepared.rejected.len(),
            partitions = prepared.partitioned.partition_count(),
            "Committed batch."
        );

        Ok(BatchOutcome {
            batch_id: prepared.id.clone(),
            received: prepared.received,
            accepted: prepared.accepted,
            quarantined: prepared.rejected.len(),
            structured_records,
            partitions: prepared.partitioned.partition_count(),
            alert,
        })
    }
}
