//! Metrics.
//!
//! Pipeline components emit through the `metrics` facade. This module installs an in-process recorder so the totals
//! can be inspected and logged when a command finishes.

use std::fmt;

use metrics_util::{
    debugging::{DebugValue, DebuggingRecorder, Snapshotter},
    CompositeKey,
};
use pagelog_error::{generic_error, GenericError};
use tracing::info;

/// Handle to the installed metrics recorder.
pub struct MetricsHandle {
    snapshotter: Snapshotter,
}

/// Current value of a single metric series.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSummary {
    /// Metric name.
    pub name: String,

    /// Labels, as `key=value` pairs sorted by key.
    pub labels: Vec<(String, String)>,

    /// Current value.
    pub value: SummaryValue,
}

/// Value of a metric series.
#[derive(Clone, Debug, PartialEq)]
pub enum SummaryValue {
    /// Counter total.
    Counter(u64),

    /// Last gauge value.
    Gauge(f64),

    /// Histogram samples recorded since the previous snapshot.
    Histogram {
        /// Number of samples.
        count: usize,

        /// Sum of all samples.
        sum: f64,
    },
}

impl fmt::Display for SummaryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummaryValue::Counter(value) => write!(f, "{}", value),
            SummaryValue::Gauge(value) => write!(f, "{}", value),
            SummaryValue::Histogram { count, sum } => write!(f, "count={} sum={}", count, sum),
        }
    }
}

/// Installs an in-process recorder as the global `metrics` recorder.
///
/// # Errors
///
/// If a global recorder was already installed, an error is returned.
pub fn initialize_metrics() -> Result<MetricsHandle, GenericError> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    metrics::set_global_recorder(recorder)
        .map_err(|_| generic_error!("A global metrics recorder has already been installed."))?;

    Ok(MetricsHandle { snapshotter })
}

impl MetricsHandle {
    /// Returns the current value of every registered metric series, sorted by name and labels.
    pub fn summary(&self) -> Vec<MetricSummary> {
        let mut summaries = self
            .snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, value)| summarize(&key, value))
            .collect::<Vec<_>>();
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.labels.cmp(&b.labels)));
        summaries
    }

    /// Logs every metric series at `INFO`.
    pub fn log_summary(&self) {
        for metric in self.summary() {
            let labels = metric
                .labels
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect::<Vec<_>>()
                .join(",");
            info!(metric = %metric.name, labels = %labels, value = %metric.value, "Metric total.");
        }
    }
}

fn summarize(key: &CompositeKey, value: DebugValue) -> MetricSummary {
    let key = key.key();
    let mut labels = key
        .labels()
        .map(|label| (label.key().to_string(), label.value().to_string()))
        .collect::<Vec<_>>();
    labels.sort();

    let value = match value {
        DebugValue::Counter(value) => SummaryValue::Counter(value),
        DebugValue::Gauge(value) => SummaryValue::Gauge(value.0),
        DebugValue::Histogram(samples) => SummaryValue::Histogram {
            count: samples.len(),
            sum: samples.iter().map(|sample| sample.0).sum(),
        },
    };

    MetricSummary {
        name: key.name().to_string(),
        labels,
        value,
    }
}
