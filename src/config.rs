//! Run Configuration
//!
//! One validated record per run, built at startup and passed by
//! reference to every component. Buffer sizes and dispatch grids are
//! all derived from it.

use crate::device::GpuDevice;
use crate::error::{Error, Result};
use crate::kernel::{MAX_GEMM_EXTENT, MAX_KERNEL_ELEMENTS, MAX_WORKGROUPS_PER_DIM};

/// Fragment edge used by the tiled GEMM benchmark.
pub const FRAGMENT: usize = 16;

/// Network and training hyperparameters
#[derive(Debug, Clone, PartialEq)]
pub struct MlpConfig {
    pub input_size: usize,
    pub hidden_size: usize,
    pub output_size: usize,
    pub train_size: usize,
    pub test_size: usize,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f32,
    /// Reorder the training set between epochs. Off by default.
    pub shuffle: bool,
    /// Seed for weight initialization and shuffling
    pub seed: u64,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            input_size: 784,
            hidden_size: 4096,
            output_size: 10,
            train_size: 10_000,
            test_size: 1_000,
            batch_size: 32,
            epochs: 20,
            learning_rate: 0.05,
            shuffle: false,
            seed: 42,
        }
    }
}

impl MlpConfig {
    /// Reject zero dimensions, a batch larger than either split,
    /// non-finite or non-positive learning rates, and tensors the
    /// kernels cannot address.
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("input_size", self.input_size),
            ("hidden_size", self.hidden_size),
            ("output_size", self.output_size),
            ("train_size", self.train_size),
            ("test_size", self.test_size),
            ("batch_size", self.batch_size),
            ("epochs", self.epochs),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be > 0")));
            }
        }
        if self.batch_size > self.train_size {
            return Err(Error::InvalidConfig(format!(
                "batch_size {} exceeds train_size {}",
                self.batch_size, self.train_size
            )));
        }
        if self.batch_size > self.test_size {
            return Err(Error::InvalidConfig(format!(
                "batch_size {} exceeds test_size {}",
                self.batch_size, self.test_size
            )));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning_rate must be finite and > 0, got {}",
                self.learning_rate
            )));
        }
        if self.batch_size > MAX_WORKGROUPS_PER_DIM as usize {
            return Err(Error::InvalidConfig(format!(
                "batch_size {} exceeds {MAX_WORKGROUPS_PER_DIM} softmax workgroups",
                self.batch_size
            )));
        }
        for (name, rows, cols) in self.tensor_shapes() {
            check_extent(name, rows, cols)?;
        }
        Ok(())
    }

    /// Device-resident matrices as (name, rows, cols). Biases are
    /// bounded by the weight they belong to.
    pub fn tensor_shapes(&self) -> [(&'static str, usize, usize); 5] {
        let (b, i, h, o) = (
            self.batch_size,
            self.input_size,
            self.hidden_size,
            self.output_size,
        );
        [
            ("input", b, i),
            ("w1", i, h),
            ("hidden", b, h),
            ("w2", h, o),
            ("output", b, o),
        ]
    }

    /// Check every f32 tensor against the device's storage binding limit.
    pub fn check_device(&self, device: &GpuDevice) -> Result<()> {
        for (name, rows, cols) in self.tensor_shapes() {
            device.check_storage_size(name, f32_bytes(rows, cols))?;
        }
        Ok(())
    }

    /// Total trainable scalars across the four parameter tensors
    pub fn parameter_count(&self) -> usize {
        self.input_size * self.hidden_size
            + self.hidden_size
            + self.hidden_size * self.output_size
            + self.output_size
    }
}

/// Problem size for the fragment-tiled GEMM benchmark
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WmmaConfig {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl Default for WmmaConfig {
    fn default() -> Self {
        Self {
            m: 4096,
            n: 4096,
            k: 4096,
        }
    }
}

impl WmmaConfig {
    pub fn new(m: usize, n: usize, k: usize) -> Result<Self> {
        let cfg = Self { m, n, k };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Every dimension must be a positive multiple of the fragment edge.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("m", self.m), ("n", self.n), ("k", self.k)] {
            if value == 0 || value % FRAGMENT != 0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} = {value} must be a positive multiple of {FRAGMENT}"
                )));
            }
        }
        for (name, rows, cols, _) in self.operand_shapes() {
            check_extent(name, rows, cols)?;
        }
        Ok(())
    }

    /// Operands as (name, rows, cols, bytes per element)
    pub fn operand_shapes(&self) -> [(&'static str, usize, usize, usize); 4] {
        [
            ("A", self.m, self.k, 2),
            ("B", self.k, self.n, 2),
            ("C", self.m, self.n, 4),
            ("D", self.m, self.n, 4),
        ]
    }

    /// Check every operand against the device's storage binding limit.
    pub fn check_device(&self, device: &GpuDevice) -> Result<()> {
        for (name, rows, cols, width) in self.operand_shapes() {
            let bytes = (rows as u64)
                .saturating_mul(cols as u64)
                .saturating_mul(width as u64);
            device.check_storage_size(name, bytes)?;
        }
        Ok(())
    }

    /// Floating point operations for one D = A×B + C
    #[inline]
    pub fn flops(&self) -> f64 {
        2.0 * self.m as f64 * self.n as f64 * self.k as f64
    }
}

fn f32_bytes(rows: usize, cols: usize) -> u64 {
    (rows as u64)
        .saturating_mul(cols as u64)
        .saturating_mul(std::mem::size_of::<f32>() as u64)
}

/// Element count within u32 indexing and both dimensions within the
/// 2D dispatch grid.
fn check_extent(name: &str, rows: usize, cols: usize) -> Result<()> {
    let fits = rows
        .checked_mul(cols)
        .is_some_and(|len| len <= MAX_KERNEL_ELEMENTS);
    if !fits {
        return Err(Error::InvalidConfig(format!(
            "{name} is {rows}x{cols}, more than {MAX_KERNEL_ELEMENTS} elements"
        )));
    }
    if rows > MAX_GEMM_EXTENT || cols > MAX_GEMM_EXTENT {
        return Err(Error::InvalidConfig(format!(
            "{name} is {rows}x{cols}, wider than the dispatch limit {MAX_GEMM_EXTENT}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = MlpConfig::default();
        cfg.validate().unwrap();
    }

    #[test]
    fn test_rejects_zero_hidden() {
        let cfg = MlpConfig {
            hidden_size: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_bad_learning_rate() {
        for lr in [0.0, -0.1, f32::NAN, f32::INFINITY] {
            let cfg = MlpConfig {
                learning_rate: lr,
                ..Default::default()
            };
            assert!(cfg.validate().is_err(), "lr = {lr}");
        }
    }

    #[test]
    fn test_rejects_oversized_batch() {
        let cfg = MlpConfig {
            batch_size: 2_000,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_parameter_count() {
        let cfg = MlpConfig::default();
        assert_eq!(cfg.parameter_count(), 784 * 4096 + 4096 + 4096 * 10 + 10);
    }

    #[test]
    fn test_wmma_default() {
        let cfg = WmmaConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.flops(), 2.0 * 4096f64.powi(3));
    }

    #[test]
    fn test_rejects_u32_overflowing_tensor() {
        // w1 would hold 2^32 elements, which wraps to 0 in shader indexing
        let cfg = MlpConfig {
            input_size: 1 << 19,
            hidden_size: 1 << 13,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));

        let cfg = MlpConfig {
            input_size: (1 << 19) - 1,
            hidden_size: 1 << 13,
            ..Default::default()
        };
        cfg.validate().unwrap();
    }

    #[test]
    fn test_rejects_dimension_past_dispatch_grid() {
        let cfg = MlpConfig {
            hidden_size: MAX_GEMM_EXTENT + 1,
            output_size: 1,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_tensor_shapes() {
        let shapes = MlpConfig::default().tensor_shapes();
        assert!(shapes.contains(&("w1", 784, 4096)));
        assert!(shapes.contains(&("hidden", 32, 4096)));
    }

    #[test]
    fn test_wmma_rejects_unaligned() {
        assert!(WmmaConfig::new(4096, 4008, 4096).is_err());
        assert!(WmmaConfig::new(4001, 4096, 4096).is_err());
        assert!(WmmaConfig::new(4096, 4096, 4100).is_err());
        assert!(WmmaConfig::new(0, 16, 16).is_err());
        assert!(WmmaConfig::new(4096, 4000, 4096).is_ok());
        assert!(WmmaConfig::new(32, 16, 48).is_ok());
    }

    #[test]
    fn test_wmma_rejects_u32_overflow() {
        // 65536 × 65536 = 2^32 f32 elements in C
        assert!(matches!(
            WmmaConfig::new(65_536, 65_536, 16),
            Err(Error::InvalidConfig(_))
        ));
    }
}
