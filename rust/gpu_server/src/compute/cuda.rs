//! CUDA backend: NVRTC-compiled add kernel driven through cudarc.

use std::sync::Arc;
use std::time::Instant;

use cudarc::driver::{CudaDevice, LaunchAsync, LaunchConfig};
use cudarc::nvrtc::compile_ptx;

use super::{group_count, AddBackend, AddOutput, GROUP_SIZE};
use crate::error::DeviceError;

const MODULE: &str = "gpu_service";
const ADD_KERNEL: &str = "add_kernel";

const KERNEL_SRC: &str = r#"
extern "C" __global__ void add_kernel(const float* __restrict__ a,
                                      const float* __restrict__ b,
                                      float* __restrict__ c,
                                      unsigned int n) {
    unsigned int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        c[i] = a[i] + b[i];
    }
}
"#;

pub struct CudaBackend {
    device: Arc<CudaDevice>,
}

impl CudaBackend {
    /// Opens device `ordinal` and loads the add kernel.
    pub fn new(ordinal: usize) -> Result<Self, DeviceError> {
        let device = CudaDevice::new(ordinal).map_err(|e| {
            DeviceError::Unavailable(format!("Failed to create CUDA device {}: {:?}", ordinal, e))
        })?;

        tracing::info!("Compiling CUDA add kernel for GPU {}...", ordinal);
        let ptx = compile_ptx(KERNEL_SRC)
            .map_err(|e| DeviceError::Unavailable(format!("NVRTC compilation failed: {:?}", e)))?;
        device
            .load_ptx(ptx, MODULE, &[ADD_KERNEL])
            .map_err(|e| DeviceError::Unavailable(format!("Failed to load PTX: {:?}", e)))?;

        Ok(Self { device })
    }
}

impl AddBackend for CudaBackend {
    fn label(&self) -> &'static str {
        "GPU"
    }

    fn add(&self, a: &[f32], b: &[f32]) -> Result<AddOutput, DeviceError> {
        debug_assert_eq!(a.len(), b.len());
        let len = a.len();
        if len == 0 {
            return Ok(AddOutput::empty());
        }
        let n = u32::try_from(len).map_err(|_| DeviceError::TooLarge(len))?;
        let groups = u32::try_from(group_count(len)).map_err(|_| DeviceError::TooLarge(len))?;

        // handler threads come from the blocking pool; the context must be current here
        self.device
            .bind_to_thread()
            .map_err(|e| DeviceError::Unavailable(format!("Failed to bind device: {:?}", e)))?;

        let d_a = self
            .device
            .htod_sync_copy(a)
            .map_err(|e| DeviceError::Transfer(format!("{:?}", e)))?;
        let d_b = self
            .device
            .htod_sync_copy(b)
            .map_err(|e| DeviceError::Transfer(format!("{:?}", e)))?;
        let mut d_c = self
            .device
            .alloc_zeros::<f32>(len)
            .map_err(|e| DeviceError::Transfer(format!("Failed to allocate output: {:?}", e)))?;

        let kernel = self
            .device
            .get_func(MODULE, ADD_KERNEL)
            .ok_or_else(|| DeviceError::Launch(format!("{} not found", ADD_KERNEL)))?;

        let cfg = LaunchConfig {
            grid_dim: (groups, 1, 1),
            block_dim: (GROUP_SIZE as u32, 1, 1),
            shared_mem_bytes: 0,
        };

        let start = Instant::now();
        unsafe {
            kernel
                .launch(cfg, (&d_a, &d_b, &mut d_c, n))
                .map_err(|e| DeviceError::Launch(format!("{:?}", e)))?;
        }
        self.device
            .synchronize()
            .map_err(|e| DeviceError::Launch(format!("Failed to synchronize: {:?}", e)))?;
        let elapsed = start.elapsed();

        let values = self
            .device
            .dtoh_sync_copy(&d_c)
            .map_err(|e| DeviceError::Transfer(format!("{:?}", e)))?;

        Ok(AddOutput { values, elapsed })
    }
}
