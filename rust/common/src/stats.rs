use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Distribution, Max, Min, OrderStatistics};
use std::time::Duration;

/// Latency summary, in milliseconds when built from durations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub p999: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
}

impl Statistics {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::zeros();
        }

        let mut data = Data::new(samples.to_vec());

        Self {
            count: samples.len(),
            mean: data.mean().unwrap_or(0.0),
            median: data.median(),
            p90: data.quantile(0.90),
            p95: data.quantile(0.95),
            p99: data.quantile(0.99),
            p999: data.quantile(0.999),
            min: data.min(),
            max: data.max(),
            // undefined for a single sample
            stddev: data.std_dev().filter(|s| s.is_finite()).unwrap_or(0.0),
        }
    }

    pub fn from_durations(samples: &[Duration]) -> Self {
        let millis: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        Self::from_samples(&millis)
    }

    pub fn zeros() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            median: 0.0,
            p90: 0.0,
            p95: 0.0,
            p99: 0.0,
            p999: 0.0,
            min: 0.0,
            max: 0.0,
            stddev: 0.0,
        }
    }
}
