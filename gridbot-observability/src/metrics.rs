//! In-process counters and a latency histogram. No external sink is wired
//! here (spec.md §1 places Prometheus export out of scope) — this is the
//! seam a production deployment reads from to feed one.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A fixed-capacity ring of the most recent observed durations, for cheap
/// p50/p99-ish inspection without pulling in a full histogram crate.
#[derive(Debug)]
pub struct Histogram {
    samples: Mutex<Vec<f64>>,
    capacity: usize,
}

/// Samples kept per histogram — enough for a stable p99 over a few minutes
/// of one-second ticks without unbounded growth.
const DEFAULT_CAPACITY: usize = 256;

impl Default for Histogram {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Histogram {
    pub fn new(capacity: usize) -> Self {
        Self { samples: Mutex::new(Vec::with_capacity(capacity)), capacity }
    }

    pub fn observe(&self, value_ms: f64) {
        let mut samples = self.samples.lock();
        if samples.len() == self.capacity {
            samples.remove(0);
        }
        samples.push(value_ms);
    }

    pub fn count(&self) -> usize {
        self.samples.lock().len()
    }

    /// Linear-interpolation-free nearest-rank percentile over the current
    /// window. Returns `None` when no samples have been observed yet.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let mut samples = self.samples.lock().clone();
        if samples.is_empty() {
            return None;
        }
        samples.sort_by(|a, b| a.partial_cmp(b).expect("non-NaN duration"));
        let rank = ((p / 100.0) * (samples.len() - 1) as f64).round() as usize;
        Some(samples[rank.min(samples.len() - 1)])
    }
}

/// Per-pipeline-step counters for one worker process (spec.md §4.1/§4.4-§4.7:
/// reconcile, risk, trigger/order, stopping each tick independently).
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub reconcile_ticks: Counter,
    pub reconcile_failures: Counter,
    pub autoclose_triggers: Counter,
    pub kill_switch_sweeps: Counter,
    pub orders_submitted: Counter,
    pub orders_retried: Counter,
    pub bots_errored: Counter,
    pub stopping_completed: Counter,
    pub stopping_escalated: Counter,
    /// Wall-clock duration of each full `Pipeline::tick` pass, in
    /// milliseconds.
    pub tick_latency_ms: Histogram,
}
