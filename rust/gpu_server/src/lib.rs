//! GPU matrix addition service
//!
//! Accepts two `.npz` uploads, adds their first arrays element-wise on the
//! configured compute backend and reports shape and timing. Also serves
//! health, Prometheus metrics and an `nvidia-smi` memory inventory.

pub mod compute;
pub mod error;
pub mod metrics;
pub mod npz;
pub mod probe;
pub mod routes;
pub mod state;

pub use compute::{AddBackend, AddOutput, CpuBackend};
pub use error::{BadInputError, DeviceError, ProbeError, ServiceError};
pub use metrics::AddMetrics;
pub use probe::{GpuProbe, NvidiaSmiProbe};
pub use routes::create_router;
pub use state::AppState;
