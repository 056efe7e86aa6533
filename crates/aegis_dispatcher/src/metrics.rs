//! Process-wide dispatch counters.
//!
//! Lock-free atomics, written by the coordinator and route provider, read by
//! the per-cycle log line and `snapshot()`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    pub cycles_completed: AtomicU64,
    pub cycles_failed: AtomicU64,
    pub missions_created: AtomicU64,
    pub missions_deduplicated: AtomicU64,
    pub claims_lost: AtomicU64,
    pub items_skipped: AtomicU64,
    pub items_failed: AtomicU64,
    pub permanent_errors: AtomicU64,
    pub station_fallbacks: AtomicU64,
    pub depot_dispatches: AtomicU64,
    pub route_fallbacks: AtomicU64,

    // Cumulative microseconds, for averaging
    pub cycle_time_us: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            cycles_completed: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            missions_created: AtomicU64::new(0),
            missions_deduplicated: AtomicU64::new(0),
            claims_lost: AtomicU64::new(0),
            items_skipped: AtomicU64::new(0),
            items_failed: AtomicU64::new(0),
            permanent_errors: AtomicU64::new(0),
            station_fallbacks: AtomicU64::new(0),
            depot_dispatches: AtomicU64::new(0),
            route_fallbacks: AtomicU64::new(0),
            cycle_time_us: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cycle_time(&self, start: Instant) {
        let elapsed_us = start.elapsed().as_micros() as u64;
        self.cycle_time_us.fetch_add(elapsed_us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            missions_created: self.missions_created.load(Ordering::Relaxed),
            missions_deduplicated: self.missions_deduplicated.load(Ordering::Relaxed),
            claims_lost: self.claims_lost.load(Ordering::Relaxed),
            items_skipped: self.items_skipped.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            permanent_errors: self.permanent_errors.load(Ordering::Relaxed),
            station_fallbacks: self.station_fallbacks.load(Ordering::Relaxed),
            depot_dispatches: self.depot_dispatches.load(Ordering::Relaxed),
            route_fallbacks: self.route_fallbacks.load(Ordering::Relaxed),
            cycle_time_us: self.cycle_time_us.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub missions_created: u64,
    pub missions_deduplicated: u64,
    pub claims_lost: u64,
    pub items_skipped: u64,
    pub items_failed: u64,
    pub permanent_errors: u64,
    pub station_fallbacks: u64,
    pub depot_dispatches: u64,
    pub route_fallbacks: u64,
    pub cycle_time_us: u64,
}

impl MetricsSnapshot {
    pub fn avg_cycle_time_ms(&self) -> f64 {
        let cycles = self.cycles_completed + self.cycles_failed;
        if cycles == 0 {
            0.0
        } else {
            self.cycle_time_us as f64 / cycles as f64 / 1000.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        Metrics::inc(&metrics.missions_created);
        Metrics::inc(&metrics.missions_created);
        Metrics::inc(&metrics.route_fallbacks);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.missions_created, 2);
        assert_eq!(snapshot.route_fallbacks, 1);
        assert_eq!(snapshot.claims_lost, 0);
    }

    #[test]
    fn test_avg_cycle_time() {
        let snapshot = MetricsSnapshot {
            cycles_completed: 3,
            cycles_failed: 1,
            cycle_time_us: 8_000,
            ..Default::default()
        };
        assert!((snapshot.avg_cycle_time_ms() - 2.0).abs() < f64::EPSILON);
        assert_eq!(MetricsSnapshot::default().avg_cycle_time_ms(), 0.0);
    }
}
