//! Element-wise addition backends
//!
//! Every backend partitions `n` elements into groups of [`GROUP_SIZE`] logical
//! units; unit `i` writes `c[i] = a[i] + b[i]` only when `i < n`, which covers the
//! padding in the last partial group. The reported `elapsed` spans the
//! launch and the synchronisation barrier only, never the host/device copies.

mod cpu;
#[cfg(feature = "cuda")]
mod cuda;

use std::sync::Arc;
use std::time::Duration;

use common::{DeviceKind, ServiceConfig};

use crate::error::DeviceError;

pub use cpu::CpuBackend;
#[cfg(feature = "cuda")]
pub use cuda::CudaBackend;

/// Logical units per group (threads per block on CUDA).
pub const GROUP_SIZE: usize = 256;

/// `ceil(n / GROUP_SIZE)`
pub fn group_count(n: usize) -> usize {
    n.div_ceil(GROUP_SIZE)
}

/// Sum of two equal-length operands plus the compute-phase duration.
#[derive(Debug, Clone, PartialEq)]
pub struct AddOutput {
    pub values: Vec<f32>,
    pub elapsed: Duration,
}

impl AddOutput {
    pub fn empty() -> Self {
        Self {
            values: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }
}

pub trait AddBackend: Send + Sync {
    /// Device label reported in `/add` responses.
    fn label(&self) -> &'static str;

    /// Adds `a` and `b` element-wise. Callers guarantee `a.len() == b.len()`.
    fn add(&self, a: &[f32], b: &[f32]) -> Result<AddOutput, DeviceError>;
}

/// Picks the backend named by the configuration.
pub fn select_backend(config: &ServiceConfig) -> Result<Arc<dyn AddBackend>, DeviceError> {
    match config.device {
        DeviceKind::Cpu => Ok(Arc::new(CpuBackend::new())),
        DeviceKind::Cuda => cuda_backend(config.cuda_ordinal),
        DeviceKind::Auto => match cuda_backend(config.cuda_ordinal) {
            Ok(backend) => Ok(backend),
            Err(e) => {
                tracing::warn!("CUDA unavailable ({}), falling back to CPU", e);
                Ok(Arc::new(CpuBackend::new()))
            }
        },
    }
}

#[cfg(feature = "cuda")]
fn cuda_backend(ordinal: usize) -> Result<Arc<dyn AddBackend>, DeviceError> {
    Ok(Arc::new(CudaBackend::new(ordinal)?))
}

#[cfg(not(feature = "cuda"))]
fn cuda_backend(_ordinal: usize) -> Result<Arc<dyn AddBackend>, DeviceError> {
    Err(DeviceError::Unavailable(
        "built without the `cuda` feature".to_string(),
    ))
}
