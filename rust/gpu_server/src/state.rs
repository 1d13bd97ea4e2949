//! Shared handler state

use std::sync::Arc;

use common::ServiceConfig;

use crate::compute::{select_backend, AddBackend};
use crate::error::DeviceError;
use crate::metrics::AddMetrics;
use crate::probe::{GpuProbe, NvidiaSmiProbe};

/// Everything a handler needs. Cloning is cheap; all members are shared.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn AddBackend>,
    pub metrics: Arc<AddMetrics>,
    pub probe: Arc<dyn GpuProbe>,
    /// Decode limit for a single uploaded operand.
    pub max_array_bytes: usize,
}

impl AppState {
    pub fn new(backend: Arc<dyn AddBackend>, probe: Arc<dyn GpuProbe>) -> Self {
        Self {
            backend,
            metrics: Arc::new(AddMetrics::new()),
            probe,
            max_array_bytes: ServiceConfig::default().max_array_bytes(),
        }
    }

    pub fn with_max_array_bytes(mut self, max_array_bytes: usize) -> Self {
        self.max_array_bytes = max_array_bytes;
        self
    }

    /// Selects the compute backend and wires the `nvidia-smi` probe.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, DeviceError> {
        let backend = select_backend(config)?;
        let probe = Arc::new(NvidiaSmiProbe::new(config.nvidia_smi.clone()));
        Ok(Self::new(backend, probe).with_max_array_bytes(config.max_array_bytes()))
    }

    pub fn device_label(&self) -> &'static str {
        self.backend.label()
    }
}
