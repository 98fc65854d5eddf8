use std::collections::VecDeque;

/// An alert raised when the quarantine rate crosses its threshold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ErrorRateAlert {
    /// Fraction of records rejected across the window.
    pub rate: f64,

    /// Records received across the window.
    pub received: u64,

    /// Records rejected across the window.
    pub rejected: u64,
}

/// Tracks the fraction of rejected records over a rolling window of batches.
///
/// An alert fires when the rate first rises above the threshold. It does not fire again until the rate has dropped
/// back to or below the threshold, so a sustained bad stream produces one alert rather than one per batch. Windows
/// holding fewer than `min_records` records never alert.
#[derive(Debug)]
pub struct ErrorRateMonitor {
    threshold: f64,
    window_batches: usize,
    min_records: u64,
    window: VecDeque<(u64, u64)>,
    received: u64,
    rejected: u64,
    alerting: bool,
}

impl ErrorRateMonitor {
    /// Creates a new `ErrorRateMonitor`.
    pub fn new(threshold: f64, window_batches: usize, min_records: u64) -> Self {
        let window_batches = window_batches.max(1);
        Self {
            threshold,
            window_batches,
            min_records,
            window: VecDeque::with_capacity(window_batches),
            received: 0,
            rejected: 0,
            alerting: false,
        }
    }

    /// Records the outcome of a batch, returning an alert if the rate just crossed the threshold.
    pub fn observe(&mut self, received: u64, rejected: u64) -> Option<ErrorRateAlert> {
        if self.window.len() == self.window_batches {
            if let Some((old_received, old_rejected)) = self.window.pop_front() {
                self.received -= old_received;
                self.rejected -= old_rejected;
            }
        }
        self.window.push_back((received, rejected));
        self.received += received;
        self.rejected += rejected;

        let rate = self.rate();
        let above = self.received >= self.min_records && rate > self.threshold;
        let crossed = above && !self.alerting;
        self.alerting = above;

        crossed.then_some(ErrorRateAlert {
            rate,
            received: self.received,
            rejected: self.rejected,
        })
    }

    /// Returns the rejection rate across the current window.
    pub fn rate(&self) -> f64 {
        if self.received == 0 {
            0.0
        } else {
            self.rejected as f64 / self.received as f64
        }
    }

    /// Returns `true` while the rate is above the threshold.
    pub fn is_alerting(&self) -> bool {
        self.alerting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alerts_once_per_crossing() {
        let mut monitor = ErrorRateMonitor::new(0.1, 3, 10);

        assert_eq!(monitor.observe(100, 1), None);

        let alert = monitor.observe(100, 60).expect("should alert on crossing");
        assert_eq!(alert.received, 200);
        assert_eq!(alert.rejected, 61);
        assert!(monitor.is_alerting());

        // Still above the threshold: no repeat alert.
        assert_eq!(monitor.observe(100, 50), None);

        // Rolls the bad batches out of the window.
        assert_eq!(monitor.observe(100, 0), None);
        assert_eq!(monitor.observe(100, 0), None);
        assert_eq!(monitor.observe(100, 0), None);
        assert!(!monitor.is_alerting());

        assert!(monitor.observe(100, 100).is_some());
    }

    #[test]
    fn small_windows_never_alert() {
        let mut monitor = ErrorRateMonitor::new(0.1, 5, 20);
        assert_eq!(monitor.observe(5, 5), None);
        assert_eq!(monitor.observe(5, 5), None);
        assert_eq!(monitor.observe(5, 5), None);
        assert!(monitor.observe(5, 5).is_some());
    }

    #[test]
    fn empty_batches() {
        let mut monitor = ErrorRateMonitor::new(0.0, 2, 0);
        assert_eq!(monitor.observe(0, 0), None);
        assert_eq!(monitor.rate(), 0.0);
    }
}
