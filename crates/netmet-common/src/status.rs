//! Uptime and per-response stats tracker behind `GET /status` (spec §6).
//!
//! The Python original (`netmet/utils/status.py`) only tracked `started_at`
//! and elapsed runtime; per-code request counters lived in Flask middleware
//! elsewhere in the app. Both are folded into one tracker here so every role
//! wires it in identically.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use crate::clock::ClockSource;

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    success: u64,
    total_duration_ms: u64,
    per_code: HashMap<u16, u64>,
}

/// Shared by every HTTP handler in a role; cheap to clone (an `Arc` wrapper
/// is expected at the call site) and safe to update from multiple worker
/// threads.
pub struct StatusTracker {
    started_at_ms: u64,
    clock: ClockSource,
    counters: Mutex<Counters>,
}

impl StatusTracker {
    pub fn new(clock: ClockSource) -> StatusTracker {
        StatusTracker {
            started_at_ms: clock.now_ms(),
            clock,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Records one completed HTTP response. `status_code` 2xx/3xx count as
    /// success; everything else does not.
    pub fn record(&self, status_code: u16, duration_ms: u64) {
        let mut c = self.counters.lock().unwrap();
        c.total += 1;
        c.total_duration_ms += duration_ms;
        if status_code < 400 {
            c.success += 1;
        }
        *c.per_code.entry(status_code).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> StatusReport {
        let c = self.counters.lock().unwrap();
        let success_rate = if c.total == 0 {
            1.0
        } else {
            c.success as f64 / c.total as f64
        };
        let avg_duration = if c.total == 0 {
            0.0
        } else {
            c.total_duration_ms as f64 / c.total as f64
        };

        StatusReport {
            started_at: self.clock.format_ms(self.started_at_ms),
            runtime_s: (self.clock.now_ms() - self.started_at_ms) / 1000,
            stats: Stats {
                requests: RequestStats {
                    total: c.total,
                    success: c.success,
                    success_rate,
                    avg_duration,
                    per_code: c.per_code.clone(),
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub started_at: String,
    pub runtime_s: u64,
    pub stats: Stats,
}

#[derive(Debug, Serialize)]
pub struct Stats {
    pub requests: RequestStats,
}

#[derive(Debug, Serialize)]
pub struct RequestStats {
    pub total: u64,
    pub success: u64,
    pub success_rate: f64,
    pub avg_duration: f64,
    pub per_code: HashMap<u16, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_zero_stats_before_any_request() {
        let tracker = StatusTracker::new(ClockSource::new_mock(0));
        let report = tracker.snapshot();
        assert_eq!(report.stats.requests.total, 0);
        assert_eq!(report.stats.requests.success_rate, 1.0);
    }

    #[test]
    fn tracks_success_rate_and_per_code_counts() {
        let tracker = StatusTracker::new(ClockSource::new_mock(0));
        tracker.record(200, 10);
        tracker.record(200, 20);
        tracker.record(500, 30);

        let report = tracker.snapshot();
        assert_eq!(report.stats.requests.total, 3);
        assert_eq!(report.stats.requests.success, 2);
        assert!((report.stats.requests.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.stats.requests.per_code.get(&200), Some(&2));
        assert_eq!(report.stats.requests.per_code.get(&500), Some(&1));
    }

    #[test]
    fn runtime_reflects_elapsed_clock_time() {
        let mut clock = ClockSource::new_mock(1_000_000);
        let tracker = StatusTracker::new(clock.clone());
        clock.advance_ms(5_000);
        assert_eq!(tracker.snapshot().runtime_s, 5);
    }
}
