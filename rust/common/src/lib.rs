pub mod http;
pub mod config;
pub mod stats;

pub use http::{AddResponse, ErrorResponse, GpuInfoResponse, GpuRecord, HealthResponse};
pub use config::{BenchmarkConfig, DeviceKind, ScenarioConfig, ServiceConfig};
pub use stats::Statistics;
