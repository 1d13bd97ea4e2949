//! Prometheus metrics for `/add`
//!
//! A request counter and a latency histogram, both lock-free so concurrent
//! handlers can record without contention. Rendered on demand in the text
//! exposition format.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

const REQUESTS_NAME: &str = "gpu_service_requests_total";
const REQUESTS_HELP: &str = "Total requests to /add";
const LATENCY_NAME: &str = "gpu_service_add_latency_seconds";
const LATENCY_HELP: &str = "Latency for /add";

/// Upper bounds (seconds) of the finite latency buckets; `+Inf` is implicit.
pub const LATENCY_BUCKETS: [f64; 14] = [
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

#[derive(Debug)]
pub struct AddMetrics {
    requests: AtomicU64,
    /// Per-bucket (non-cumulative) counts, last slot is `+Inf`.
    buckets: [AtomicU64; LATENCY_BUCKETS.len() + 1],
    count: AtomicU64,
    /// f64 bits of the running sum in seconds.
    sum_bits: AtomicU64,
}

impl Default for AddMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AddMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// Counts one `/add` call whose form carried both operands.
    pub fn inc_requests(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one compute-phase duration.
    pub fn observe_latency(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let slot = LATENCY_BUCKETS
            .iter()
            .position(|&bound| secs <= bound)
            .unwrap_or(LATENCY_BUCKETS.len());

        self.buckets[slot].fetch_add(1, Ordering::Relaxed);
        // the closure always returns Some, so this cannot fail
        let _ = self
            .sum_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + secs).to_bits())
            });
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn latency_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn latency_sum(&self) -> f64 {
        f64::from_bits(self.sum_bits.load(Ordering::Relaxed))
    }

    /// Text exposition of every metric.
    #[must_use]
    pub fn render(&self) -> String {
        let mut output = String::new();

        let _ = writeln!(output, "# HELP {REQUESTS_NAME} {REQUESTS_HELP}");
        let _ = writeln!(output, "# TYPE {REQUESTS_NAME} counter");
        let _ = writeln!(output, "{REQUESTS_NAME} {}", self.requests_total());

        let _ = writeln!(output, "# HELP {LATENCY_NAME} {LATENCY_HELP}");
        let _ = writeln!(output, "# TYPE {LATENCY_NAME} histogram");
        let mut cumulative = 0u64;
        for (i, bound) in LATENCY_BUCKETS.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            let _ = writeln!(output, "{LATENCY_NAME}_bucket{{le=\"{bound:?}\"}} {cumulative}");
        }
        cumulative += self.buckets[LATENCY_BUCKETS.len()].load(Ordering::Relaxed);
        let _ = writeln!(output, "{LATENCY_NAME}_bucket{{le=\"+Inf\"}} {cumulative}");
        let _ = writeln!(output, "{LATENCY_NAME}_sum {:?}", self.latency_sum());
        let _ = writeln!(output, "{LATENCY_NAME}_count {}", self.latency_count());

        output
    }
}
