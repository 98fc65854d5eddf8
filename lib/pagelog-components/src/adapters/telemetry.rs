use std::time::Duration;

use metrics::{counter, histogram, Counter, Histogram};
use pagelog_core::ValidationReason;

#[derive(Clone)]
struct ReasonCounters {
    missing: Counter,
    wrong_type: Counter,
    negative_value: Counter,
    unparseable_timestamp: Counter,
}

impl ReasonCounters {
    fn new(name: &'static str) -> Self {
        Self {
            missing: counter!(name, "reason" => ValidationReason::Missing.as_str()),
            wrong_type: counter!(name, "reason" => ValidationReason::WrongType.as_str()),
            negative_value: counter!(name, "reason" => ValidationReason::NegativeValue.as_str()),
            unparseable_timestamp: counter!(name, "reason" => ValidationReason::UnparseableTimestamp.as_str()),
        }
    }

    fn noop() -> Self {
        Self {
            missing: Counter::noop(),
            wrong_type: Counter::noop(),
            negative_value: Counter::noop(),
            unparseable_timestamp: Counter::noop(),
        }
    }

    fn for_reason(&self, reason: ValidationReason) -> &Counter {
        match reason {
            ValidationReason::Missing => &self.missing,
            ValidationReason::WrongType => &self.wrong_type,
            ValidationReason::NegativeValue => &self.negative_value,
            ValidationReason::UnparseableTimestamp => &self.unparseable_timestamp,
        }
    }
}

/// Pipeline telemetry.
///
/// Handles are registered against the globally installed `metrics` recorder when created. With no recorder installed,
/// every update is a no-op.
#[derive(Clone)]
pub struct Telemetry {
    records_received: Counter,
    records_quarantined: ReasonCounters,
    structured_records_written: Counter,
    batches_committed: Counter,
    batches_failed: Counter,
    quarantine_alerts: Counter,
    aggregate_records_written: Counter,
    batch_duration: Histogram,
}

impl Telemetry {
    /// Creates a new `Telemetry`, registering every metric with the global recorder.
    pub fn new() -> Self {
        Self {
            records_received: counter!("pagelog_records_received_total"),
            records_quarantined: ReasonCounters::new("pagelog_records_quarantined_total"),
            structured_records_written: counter!("pagelog_structured_records_written_total"),
            batches_committed: counter!("pagelog_batches_committed_total"),
            batches_failed: counter!("pagelog_batches_failed_total"),
            quarantine_alerts: counter!("pagelog_quarantine_alerts_total"),
            aggregate_records_written: counter!("pagelog_aggregate_records_written_total"),
            batch_duration: histogram!("pagelog_batch_duration_secs"),
        }
    }

    /// Creates a `Telemetry` whose updates go nowhere.
    pub fn noop() -> Self {
        Self {
            records_received: Counter::noop(),
            records_quarantined: ReasonCounters::noop(),
            structured_records_written: Counter::noop(),
            batches_committed: Counter::noop(),
            batches_failed: Counter::noop(),
            quarantine_alerts: Counter::noop(),
            aggregate_records_written: Counter::noop(),
            batch_duration: Histogram::noop(),
        }
    }

    pub(super) fn increment_records_received(&self, count: usize) {
        self.records_received.increment(count as u64);
    }

    pub(super) fn increment_records_quarantined(&self, reason: ValidationReason) {
        self.records_quarantined.for_reason(reason).increment(1);
    }

    pub(super) fn increment_structured_records_written(&self, count: usize) {
        self.structured_records_written.increment(count as u64);
    }

    pub(super) fn increment_batches_committed(&self) {
        self.batches_committed.increment(1);
    }

    pub(super) fn increment_batches_failed(&self) {
        self.batches_failed.increment(1);
    }

    pub(super) fn increment_quarantine_alerts(&self) {
        self.quarantine_alerts.increment(1);
    }

    pub(super) fn increment_aggregate_records_written(&self, count: usize) {
        self.aggregate_records_written.increment(count as u64);
    }

    pub(super) fn record_batch_duration(&self, duration: Duration) {
        self.batch_duration.record(duration.as_secs_f64());
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}
