use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// Result of `POST /add`. Both times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddResponse {
    pub matrix_shape: Vec<usize>,
    pub elapsed_time: f64,
    pub device: String,
    pub total_time: f64,
}

/// One line of `nvidia-smi` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct GpuRecord {
    pub gpu: String,
    pub memory_used_MB: i64,
    pub memory_total_MB: i64,
}

/// `GET /gpu-info` always answers 200; probe failures travel in the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GpuInfoResponse {
    Gpus { gpus: Vec<GpuRecord> },
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
