use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Which compute backend the server should run `/add` on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// CUDA when compiled in and a device initialises, otherwise CPU.
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl FromStr for DeviceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(DeviceKind::Auto),
            "cpu" => Ok(DeviceKind::Cpu),
            "cuda" | "gpu" => Ok(DeviceKind::Cuda),
            other => anyhow::bail!("unknown device '{}' (expected auto, cpu or cuda)", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub device: DeviceKind,
    pub cuda_ordinal: usize,
    pub nvidia_smi: String,
    pub max_upload_mb: usize,
    /// Upper bound on one decoded operand, in MiB of f32 data.
    pub max_array_mb: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            device: DeviceKind::Auto,
            cuda_ordinal: 0,
            nvidia_smi: "nvidia-smi".to_string(),
            max_upload_mb: 64,
            max_array_mb: 1024,
        }
    }
}

impl ServiceConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ServiceConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Reads `GPU_SERVICE_CONFIG` (if set) and then applies `GPU_SERVICE_*` overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("GPU_SERVICE_CONFIG") {
            Ok(path) => Self::load(&path)
                .with_context(|| format!("Failed to load service config from {}", path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("GPU_SERVICE_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("GPU_SERVICE_PORT") {
            self.port = port
                .parse()
                .with_context(|| format!("GPU_SERVICE_PORT is not a port: {}", port))?;
        }
        if let Some(device) = lookup("GPU_SERVICE_DEVICE") {
            self.device = device.parse()?;
        }
        if let Some(ordinal) = lookup("GPU_SERVICE_CUDA_ORDINAL") {
            self.cuda_ordinal = ordinal
                .parse()
                .with_context(|| format!("GPU_SERVICE_CUDA_ORDINAL is not an index: {}", ordinal))?;
        }
        if let Some(program) = lookup("GPU_SERVICE_NVIDIA_SMI") {
            self.nvidia_smi = program;
        }
        if let Some(limit) = lookup("GPU_SERVICE_MAX_UPLOAD_MB") {
            self.max_upload_mb = limit
                .parse()
                .with_context(|| format!("GPU_SERVICE_MAX_UPLOAD_MB is not a size: {}", limit))?;
        }
        if let Some(limit) = lookup("GPU_SERVICE_MAX_ARRAY_MB") {
            self.max_array_mb = limit
                .parse()
                .with_context(|| format!("GPU_SERVICE_MAX_ARRAY_MB is not a size: {}", limit))?;
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn max_array_bytes(&self) -> usize {
        self.max_array_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    pub server_url: String,
    pub matrix_a: String,
    pub matrix_b: String,
    pub warmup: WarmupConfig,
    pub scenarios: Vec<ScenarioConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupConfig {
    pub enabled: bool,
    pub num_requests: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    pub concurrency: usize,
    pub num_requests: usize,
    pub description: String,
}

impl BenchmarkConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: BenchmarkConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}
