use anyhow::{Context, Result};
use common::{AddResponse, BenchmarkConfig, GpuInfoResponse, ScenarioConfig, Statistics};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const REQUESTS_METRIC: &str = "gpu_service_requests_total";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScenarioReport {
    concurrency: usize,
    num_requests: usize,
    succeeded: usize,
    failed: usize,
    /// Growth of the server's request counter over the scenario
    server_counted: Option<u64>,
    wall_seconds: f64,
    throughput_qps: f64,
    latency_ms: Statistics,
    compute_ms: Statistics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Report {
    server_url: String,
    device: String,
    matrix_shape: Vec<usize>,
    gpu_info: GpuInfoResponse,
    scenarios: BTreeMap<String, ScenarioReport>,
    timestamp: String,
}

/// Outcome of one `/add` round trip.
enum Outcome {
    Ok { latency_ms: f64, compute_ms: f64 },
    Failed,
}

fn progress_bar(len: usize, message: &'static str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("=>-"),
    );
    pb.set_message(message);
    Ok(pb)
}

fn file_part(path: &str) -> Result<Part> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path))?;
    let name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "matrix.npz".to_string());
    Ok(Part::bytes(bytes)
        .file_name(name)
        .mime_str("application/octet-stream")?)
}

/// Reads an unlabeled counter out of Prometheus text exposition.
fn counter_value(text: &str, name: &str) -> Option<u64> {
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let (metric, value) = line.split_once(' ')?;
            (metric == name).then(|| value.trim().parse::<f64>().ok())?
        })
        .map(|v| v as u64)
}

struct AddClient {
    base: String,
    http: Client,
    matrix_a: String,
    matrix_b: String,
}

impl AddClient {
    fn new(config: &BenchmarkConfig) -> Result<Self> {
        // fail early on unreadable inputs rather than once per request
        file_part(&config.matrix_a)?;
        file_part(&config.matrix_b)?;

        Ok(Self {
            base: config.server_url.trim_end_matches('/').to_string(),
            http: Client::builder().timeout(Duration::from_secs(60)).build()?,
            matrix_a: config.matrix_a.clone(),
            matrix_b: config.matrix_b.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn is_healthy(&self) -> bool {
        self.http
            .get(self.url("/health"))
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn wait_until_healthy(&self, timeout: Duration) -> Result<()> {
        println!("Waiting for {} ...", self.base);
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.is_healthy() {
                println!("✓ Server is ready!");
                return Ok(());
            }
            std::thread::sleep(Duration::from_secs(2));
        }
        anyhow::bail!("✗ {} not healthy after {:?}", self.base, timeout)
    }

    fn gpu_info(&self) -> Result<GpuInfoResponse> {
        let response = self
            .http
            .get(self.url("/gpu-info"))
            .send()
            .context("Failed to query /gpu-info")?;
        Ok(response.json()?)
    }

    fn requests_counted(&self) -> Option<u64> {
        let text = self.http.get(self.url("/metrics")).send().ok()?.text().ok()?;
        counter_value(&text, REQUESTS_METRIC)
    }

    fn add(&self) -> Result<AddResponse> {
        let form = Form::new()
            .part("file_a", file_part(&self.matrix_a)?)
            .part("file_b", file_part(&self.matrix_b)?);
        let response = self
            .http
            .post(self.url("/add"))
            .multipart(form)
            .send()
            .context("Failed to send /add")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("/add returned {}: {}", status, response.text().unwrap_or_default());
        }
        Ok(response.json()?)
    }

    fn timed_add(&self) -> Outcome {
        let started = Instant::now();
        match self.add() {
            Ok(response) => Outcome::Ok {
                latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                compute_ms: response.elapsed_time * 1000.0,
            },
            Err(_) => Outcome::Failed,
        }
    }

    fn warmup(&self, iterations: usize) -> Result<()> {
        let pb = progress_bar(iterations, "Warmup")?;
        let failed = (0..iterations)
            .filter(|_| {
                pb.inc(1);
                self.add().is_err()
            })
            .count();
        pb.finish_with_message("✓ Warmup complete");
        if failed > 0 {
            println!("⚠ {}/{} warmup requests failed", failed, iterations);
        }
        Ok(())
    }

    fn run_scenario(&self, scenario: &ScenarioConfig) -> Result<ScenarioReport> {
        println!("\n{} (concurrency {}, {} requests)", scenario.name, scenario.concurrency, scenario.num_requests);
        println!("  {}", scenario.description);

        let counted_before = self.requests_counted();
        let pb = progress_bar(scenario.num_requests, "Running")?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(scenario.concurrency.max(1))
            .build()?;

        let started = Instant::now();
        let outcomes: Vec<Outcome> = pool.install(|| {
            (0..scenario.num_requests)
                .into_par_iter()
                .map(|_| {
                    let outcome = self.timed_add();
                    pb.inc(1);
                    outcome
                })
                .collect()
        });
        let wall_seconds = started.elapsed().as_secs_f64();
        pb.finish_with_message("✓ Complete");

        let counted_after = self.requests_counted();
        let report = summarize(scenario, &outcomes, wall_seconds, counted_before, counted_after);

        println!(
            "  {:.1} req/s, latency p50 {:.2}ms p95 {:.2}ms p99 {:.2}ms, compute mean {:.3}ms, {} failed",
            report.throughput_qps,
            report.latency_ms.median,
            report.latency_ms.p95,
            report.latency_ms.p99,
            report.compute_ms.mean,
            report.failed
        );
        Ok(report)
    }
}

fn summarize(
    scenario: &ScenarioConfig,
    outcomes: &[Outcome],
    wall_seconds: f64,
    counted_before: Option<u64>,
    counted_after: Option<u64>,
) -> ScenarioReport {
    let (latencies, compute): (Vec<f64>, Vec<f64>) = outcomes
        .iter()
        .filter_map(|o| match o {
            Outcome::Ok { latency_ms, compute_ms } => Some((*latency_ms, *compute_ms)),
            Outcome::Failed => None,
        })
        .unzip();
    let succeeded = latencies.len();

    ScenarioReport {
        concurrency: scenario.concurrency,
        num_requests: scenario.num_requests,
        succeeded,
        failed: outcomes.len() - succeeded,
        server_counted: counted_before
            .zip(counted_after)
            .map(|(before, after)| after.saturating_sub(before)),
        wall_seconds,
        throughput_qps: if wall_seconds > 0.0 {
            succeeded as f64 / wall_seconds
        } else {
            0.0
        },
        latency_ms: Statistics::from_samples(&latencies),
        compute_ms: Statistics::from_samples(&compute),
    }
}

fn main() -> Result<()> {
    let config_path =
        env::var("BENCHMARK_CONFIG").unwrap_or_else(|_| "/config/benchmark.yaml".to_string());
    let mut config = BenchmarkConfig::load(&config_path)
        .with_context(|| format!("Failed to load benchmark configuration from {}", config_path))?;
    if let Ok(url) = env::var("SERVER_URL") {
        config.server_url = url;
    }
    let results_dir = PathBuf::from(env::var("RESULTS_DIR").unwrap_or_else(|_| "/results".to_string()));

    println!("GPU add benchmark: {} + {} -> {}", config.matrix_a, config.matrix_b, config.server_url);

    let client = AddClient::new(&config)?;
    client.wait_until_healthy(Duration::from_secs(120))?;

    let gpu_info = client.gpu_info()?;
    println!("GPU info: {}", serde_json::to_string(&gpu_info)?);

    if config.warmup.enabled {
        client.warmup(config.warmup.num_requests)?;
    }
    let sample = client.add().context("Initial /add failed")?;

    let mut scenarios = BTreeMap::new();
    for scenario in &config.scenarios {
        scenarios.insert(scenario.name.clone(), client.run_scenario(scenario)?);
    }

    let report = Report {
        server_url: client.base.clone(),
        device: sample.device,
        matrix_shape: sample.matrix_shape,
        gpu_info,
        scenarios,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    fs::create_dir_all(&results_dir)?;
    let output_path = results_dir.join(format!("add_{}.json", chrono::Utc::now().format("%Y%m%dT%H%M%SZ")));
    fs::write(&output_path, serde_json::to_string_pretty(&report)?)?;
    println!("\nResults saved to {}", output_path.display());

    Ok(())
}
