//! CUDA backend: native Tensor Core GEMM via `nvcuda::wmma`.
//!
//! Rust bindings to the kernel in `csrc/`. Only available when compiled
//! with `--features cuda`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │  Rust: src/cuda/engine.rs                       │
//! │  CudaWmmaEngine (safe API, RAII)                │
//! ├─────────────────────────────────────────────────┤
//! │  Rust: src/cuda/ffi.rs                          │
//! │  extern "C" { alice_mlp_cuda_* }                │
//! ├─────────────────────────────────────────────────┤
//! │  C/CUDA: csrc/wmma_gemm.cu                      │
//! │  one warp per 16×16 tile, mma_sync over K       │
//! │  cudaEvent timing around the launch             │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod ffi;

pub use engine::{CudaError, CudaResult, CudaWmmaEngine, DeviceBuffer};
