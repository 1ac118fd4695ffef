//! Safe Rust wrapper for the CUDA Tensor Core GEMM.
//!
//! [`CudaWmmaEngine`] owns the CUDA context for its lifetime and hands out
//! RAII [`DeviceBuffer`]s. Timing comes from a cudaEvent pair recorded
//! around the kernel launch, so it excludes host transfers.
//!
//! # Example
//!
//! ```no_run
//! use alice_mlp::cuda::CudaWmmaEngine;
//! use alice_mlp::{WmmaConfig, WmmaInputs};
//! use rand::SeedableRng;
//!
//! let engine = CudaWmmaEngine::init(0).unwrap();
//! let cfg = WmmaConfig::new(256, 256, 256).unwrap();
//! let inputs = WmmaInputs::random(cfg, &mut rand::rngs::StdRng::seed_from_u64(0)).unwrap();
//! let (report, d) = engine.run(&inputs).unwrap();
//! println!("{report}, {} outputs", d.len());
//! ```

use super::ffi;
use crate::config::WmmaConfig;
use crate::wmma::{WmmaInputs, WmmaReport};
use half::f16;
use std::ffi::{c_void, CStr};
use std::fmt;
use std::ptr;

/// CUDA operation error.
#[derive(Debug, Clone)]
pub struct CudaError {
    pub code: i32,
    pub operation: &'static str,
}

impl fmt::Display for CudaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CUDA error {} in {}", self.code, self.operation)
    }
}

impl std::error::Error for CudaError {}

pub type CudaResult<T> = Result<T, CudaError>;

fn check(code: i32, op: &'static str) -> CudaResult<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(CudaError { code, operation: op })
    }
}

/// RAII device allocation. Freed on drop.
pub struct DeviceBuffer {
    ptr: *mut c_void,
    bytes: usize,
}

impl DeviceBuffer {
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                ffi::alice_mlp_cuda_free(self.ptr);
            }
        }
    }
}

// The allocation is a plain device pointer; the CUDA context is process-global.
unsafe impl Send for DeviceBuffer {}

/// Tensor Core GEMM engine bound to one CUDA device.
pub struct CudaWmmaEngine {
    device_info: ffi::AliceMlpDeviceInfo,
}

impl CudaWmmaEngine {
    /// Initialize CUDA on `device_id` (0-indexed).
    ///
    /// Fails with `cudaErrorInvalidDevice`-style codes if the device is
    /// missing, and with code -1 if it predates Tensor Cores.
    pub fn init(device_id: i32) -> CudaResult<Self> {
        unsafe {
            check(ffi::alice_mlp_cuda_init(device_id), "alice_mlp_cuda_init")?;
        }

        let mut info: ffi::AliceMlpDeviceInfo = unsafe { std::mem::zeroed() };
        unsafe {
            check(
                ffi::alice_mlp_cuda_get_device_info(&mut info),
                "alice_mlp_cuda_get_device_info",
            )?;
        }

        let engine = Self { device_info: info };
        if !engine.has_tensor_cores() {
            return Err(CudaError {
                code: -1,
                operation: "tensor core check",
            });
        }
        log::debug!("{engine}");
        Ok(engine)
    }

    pub fn device_name(&self) -> &str {
        let cstr = unsafe { CStr::from_ptr(self.device_info.name.as_ptr()) };
        cstr.to_str().unwrap_or("unknown")
    }

    pub fn compute_capability(&self) -> (i32, i32) {
        (self.device_info.compute_major, self.device_info.compute_minor)
    }

    pub fn sm_count(&self) -> i32 {
        self.device_info.sm_count
    }

    pub fn global_mem_bytes(&self) -> i64 {
        self.device_info.global_mem_bytes
    }

    /// Compute capability 7.0 or newer
    pub fn has_tensor_cores(&self) -> bool {
        self.device_info.has_tensor_cores != 0
    }

    // ---- Memory management ----

    pub fn alloc(&self, bytes: usize) -> CudaResult<DeviceBuffer> {
        let mut ptr: *mut c_void = ptr::null_mut();
        unsafe {
            check(ffi::alice_mlp_cuda_alloc(&mut ptr, bytes), "alice_mlp_cuda_alloc")?;
        }
        Ok(DeviceBuffer { ptr, bytes })
    }

    fn upload_bytes(&self, data: &[u8]) -> CudaResult<DeviceBuffer> {
        let buf = self.alloc(data.len())?;
        unsafe {
            check(
                ffi::alice_mlp_cuda_memcpy_h2d(buf.ptr, data.as_ptr() as *const c_void, buf.bytes),
                "alice_mlp_cuda_memcpy_h2d",
            )?;
        }
        Ok(buf)
    }

    pub fn upload_f16(&self, data: &[f16]) -> CudaResult<DeviceBuffer> {
        self.upload_bytes(bytemuck::cast_slice(data))
    }

    pub fn upload_f32(&self, data: &[f32]) -> CudaResult<DeviceBuffer> {
        self.upload_bytes(bytemuck::cast_slice(data))
    }

    pub fn download_f32(&self, buf: &DeviceBuffer, count: usize) -> CudaResult<Vec<f32>> {
        let mut result = vec![0.0f32; count];
        let bytes = (count * std::mem::size_of::<f32>()).min(buf.bytes);
        unsafe {
            check(
                ffi::alice_mlp_cuda_memcpy_d2h(
                    result.as_mut_ptr() as *mut c_void,
                    buf.ptr as *const c_void,
                    bytes,
                ),
                "alice_mlp_cuda_memcpy_d2h",
            )?;
        }
        Ok(result)
    }

    // ---- Compute ----

    /// D = A·B + C over device buffers. Returns kernel time in milliseconds.
    pub fn gemm(
        &self,
        a: &DeviceBuffer,
        b: &DeviceBuffer,
        c: &DeviceBuffer,
        d: &DeviceBuffer,
        cfg: &WmmaConfig,
    ) -> CudaResult<f32> {
        let mut elapsed_ms = 0.0f32;
        unsafe {
            check(
                ffi::alice_mlp_cuda_wmma_gemm(
                    a.ptr as *const u16,
                    b.ptr as *const u16,
                    c.ptr as *const f32,
                    d.ptr as *mut f32,
                    cfg.m as i32,
                    cfg.n as i32,
                    cfg.k as i32,
                    &mut elapsed_ms,
                ),
                "alice_mlp_cuda_wmma_gemm",
            )?;
        }
        Ok(elapsed_ms)
    }

    /// Upload, launch once, download D.
    pub fn run(&self, inputs: &WmmaInputs) -> crate::Result<(WmmaReport, Vec<f32>)> {
        let cfg = inputs.cfg;
        let a = self.upload_f16(&inputs.a)?;
        let b = self.upload_f16(&inputs.b)?;
        let c = self.upload_f32(&inputs.c)?;
        let d = self.alloc(cfg.m * cfg.n * std::mem::size_of::<f32>())?;

        let elapsed_ms = self.gemm(&a, &b, &c, &d, &cfg)?;
        let report = WmmaReport::new(cfg, elapsed_ms as f64, true);
        log::info!("{report} [cuda]");

        Ok((report, self.download_f32(&d, cfg.m * cfg.n)?))
    }
}

impl Drop for CudaWmmaEngine {
    fn drop(&mut self) {
        unsafe {
            ffi::alice_mlp_cuda_shutdown();
        }
    }
}

impl fmt::Display for CudaWmmaEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor) = self.compute_capability();
        write!(
            f,
            "CudaWmmaEngine({}, sm{}.{}, {}SM, {:.1}GB)",
            self.device_name(),
            major,
            minor,
            self.sm_count(),
            self.global_mem_bytes() as f64 / (1024.0 * 1024.0 * 1024.0),
        )
    }
}
