//! Per-instance performance metrics: a bounded rolling average of
//! remote-sync round-trip time, plus an operations-per-second limiter
//! for outbound transport throttling.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: usize = 50;

/// Snapshot of the observable `multiplayer.performanceMetrics` field.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct PerformanceMetrics {
    #[serde(rename = "averageSyncTime")]
    pub average_sync_time: f64,
}

/// Rolling window of sync round-trip-time samples.
#[derive(Debug, Clone)]
pub struct PerformanceMonitor {
    window: usize,
    samples: VecDeque<f64>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        assert!(window > 0, "window must be non-zero");
        Self {
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    /// Record one sync round-trip duration.
    pub fn record(&mut self, elapsed: Duration) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed.as_secs_f64() * 1000.0);
    }

    /// Current average sync time in milliseconds, or `0.0` with no samples yet.
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        PerformanceMetrics {
            average_sync_time: self.average(),
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Paces calls to an interval of `1 / opsPerSecond`, scheduling each
/// `acquire()` into the next free slot rather than admitting bursts.
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(ops_per_second: u32) -> Self {
        let interval = if ops_per_second == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / ops_per_second as f64)
        };
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Wait until this call's scheduled slot, advancing the schedule by
    /// one interval. A zero-rate limiter never waits.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }
        let scheduled = {
            let mut next = self.next_slot.lock().unwrap();
            let scheduled = (*next).max(Instant::now());
            *next = scheduled + self.interval;
            scheduled
        };
        let now = Instant::now();
        if scheduled > now {
            tokio::time::sleep(scheduled - now).await;
        }
    }
}
