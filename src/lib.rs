//! ALICE-MLP: GPU Multilayer Perceptron Trainer
//!
//! > "Upload once. Train in VRAM. Read back only the probabilities."
//!
//! A from-scratch MLP trainer for fixed-size image classification
//! (784 → 4096 → 10 by default) where every numeric step runs as a WGSL
//! compute kernel:
//! - **Forward**: GEMM → bias → GELU → GEMM → bias → softmax, one queue, one wait
//! - **Backward**: chain rule through the same kernels (GEMM NT/TN, GELU')
//! - **Update**: plain SGD, in place on the parameter buffers
//! - **Benchmark**: a 16×16×16 fragment-tiled half×half→f32 GEMM, timed with
//!   GPU timestamps (plus an optional native CUDA `wmma` path)
//!
//! # Example
//!
//! ```no_run
//! use alice_mlp::prelude::*;
//!
//! // 1. Initialize GPU
//! let device = GpuDevice::new().unwrap();
//!
//! // 2. Load data (raw f32 images, i32 labels)
//! let cfg = MlpConfig::default();
//! let train = Dataset::load("train_images.bin", "train_labels.bin",
//!     cfg.train_size, cfg.input_size, cfg.output_size).unwrap();
//! let test = Dataset::load("test_images.bin", "test_labels.bin",
//!     cfg.test_size, cfg.input_size, cfg.output_size).unwrap();
//!
//! // 3. Train (parameters never leave VRAM)
//! let mut trainer = Trainer::new(&device, &cfg).unwrap();
//! for report in trainer.fit(&device, &train, &test).unwrap() {
//!     println!("{report}");
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           ALICE-MLP                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  ┌──────────┐    ┌──────────────────┐    ┌──────────────┐          │
//! │  │ GpuDevice│───▶│ MlpCompute       │───▶│ GpuTensor    │          │
//! │  │ (wgpu)   │    │ (11 pipelines)   │    │ GpuLabels    │          │
//! │  └──────────┘    └──────────────────┘    └──────────────┘          │
//! │       │                   │                    │                    │
//! │       ▼                   ▼                    ▼                    │
//! │  ┌───────────────────────────────────────────────────────────┐     │
//! │  │  MlpForward: input·W1 +b1 → gelu → ·W2 +b2 → softmax      │     │
//! │  │  single queue, single poll_wait at the end                 │     │
//! │  └───────────────────────────────────────────────────────────┘     │
//! │                          │                                         │
//! │                          ▼                                         │
//! │  ┌───────────────────────────────────────────────────────────┐     │
//! │  │  Trainer: loss (host) → backward kernels → SGD kernels     │     │
//! │  │  MlpParams / MlpGradients / BatchBuffers stay in VRAM      │     │
//! │  └───────────────────────────────────────────────────────────┘     │
//! │                                                                     │
//! │  ┌───────────────────────────────────────────────────────────┐     │
//! │  │  WmmaBenchmark: 16×16 fragments in workgroup memory        │     │
//! │  │  f16 A,B (packed u32) · f32 C → f32 D, timestamp queries   │     │
//! │  └───────────────────────────────────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod forward;
pub mod kernel;
pub mod loss;
pub mod params;
pub mod pipeline;
pub mod reference;
pub mod tensor;
pub mod train;
pub mod wmma;

#[cfg(feature = "cuda")]
pub mod cuda;

// ============================================================================
// Core Re-exports
// ============================================================================

pub use config::{MlpConfig, WmmaConfig};
pub use data::Dataset;
pub use device::GpuDevice;
pub use error::{Error, Result};
pub use forward::{BatchBuffers, MlpForward};
pub use kernel::{ElemParams, GemmParams};
pub use params::{HostParams, MlpGradients, MlpParams};
pub use pipeline::MlpCompute;
pub use tensor::{GpuLabels, GpuTensor};
pub use train::{BatchStats, EpochReport, EvalReport, Trainer};
pub use wmma::{fragment_gemm_reference, WmmaBenchmark, WmmaBuffers, WmmaInputs, WmmaReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Prelude
// ============================================================================

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::Dataset;
    pub use crate::GpuDevice;
    pub use crate::GpuTensor;
    pub use crate::MlpCompute;
    pub use crate::MlpConfig;
    pub use crate::MlpParams;
    pub use crate::Trainer;
    pub use crate::{WmmaBenchmark, WmmaConfig, WmmaInputs};
}

// ============================================================================
// Tests
// ============================================================================
