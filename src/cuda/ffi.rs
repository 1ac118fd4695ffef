//! Raw FFI bindings to `csrc/alice_mlp_c_api.h`
//!
//! These are unsafe `extern "C"` declarations that match the C header exactly.
//! Use [`super::engine::CudaWmmaEngine`] for safe wrappers.

use std::ffi::c_void;
use std::os::raw::c_char;

/// Device information.
///
/// Mirrors `AliceMlpDeviceInfo` from `alice_mlp_c_api.h`.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct AliceMlpDeviceInfo {
    pub name: [c_char; 256],
    pub compute_major: i32,
    pub compute_minor: i32,
    pub sm_count: i32,
    pub global_mem_bytes: i64,
    /// 1 if compute >= 7.0
    pub has_tensor_cores: i32,
}

extern "C" {
    /// Select the device and create its context. Returns 0 on success.
    pub fn alice_mlp_cuda_init(device_id: i32) -> i32;

    /// Query the current device. Returns 0 on success.
    pub fn alice_mlp_cuda_get_device_info(info: *mut AliceMlpDeviceInfo) -> i32;

    pub fn alice_mlp_cuda_shutdown();

    pub fn alice_mlp_cuda_alloc(out_ptr: *mut *mut c_void, bytes: usize) -> i32;

    pub fn alice_mlp_cuda_free(ptr: *mut c_void);

    pub fn alice_mlp_cuda_memcpy_h2d(
        dst_device: *mut c_void,
        src_host: *const c_void,
        bytes: usize,
    ) -> i32;

    pub fn alice_mlp_cuda_memcpy_d2h(
        dst_host: *mut c_void,
        src_device: *const c_void,
        bytes: usize,
    ) -> i32;

    /// D = A·B + C, half inputs as raw `u16` bits, f32 accumulate.
    /// Kernel time in milliseconds is written to `elapsed_ms`.
    /// Returns 0 on success.
    pub fn alice_mlp_cuda_wmma_gemm(
        a: *const u16,
        b: *const u16,
        c: *const f32,
        d: *mut f32,
        m: i32,
        n: i32,
        k: i32,
        elapsed_ms: *mut f32,
    ) -> i32;
}
