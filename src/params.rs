//! Network Parameters: Weights, Biases and Their Gradients in VRAM
//!
//! Four parameter tensors (w1 I×H, b1 1×H, w2 H×O, b2 1×O) and four
//! gradient tensors of exactly the same shapes. Gradients are fully
//! overwritten by every backward pass, so nothing carries over between
//! batches.

use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use crate::config::MlpConfig;
use crate::device::GpuDevice;
use crate::error::{Error, Result};
use crate::tensor::GpuTensor;

/// Host copy of the four parameter tensors (row-major)
#[derive(Debug, Clone, PartialEq)]
pub struct HostParams {
    pub w1: Vec<f32>,
    pub b1: Vec<f32>,
    pub w2: Vec<f32>,
    pub b2: Vec<f32>,
}

impl HostParams {
    /// All-zero parameters sized for `cfg`
    pub fn zeros(cfg: &MlpConfig) -> Self {
        Self {
            w1: vec![0.0; cfg.input_size * cfg.hidden_size],
            b1: vec![0.0; cfg.hidden_size],
            w2: vec![0.0; cfg.hidden_size * cfg.output_size],
            b2: vec![0.0; cfg.output_size],
        }
    }

    /// Uniform ±√(6 / (fan_in + fan_out)) weights, zero biases.
    ///
    /// Any `Rng` works; the trainer passes a seeded `StdRng`.
    pub fn init<R: Rng + ?Sized>(cfg: &MlpConfig, rng: &mut R) -> Self {
        let mut params = Self::zeros(cfg);
        fill_uniform(&mut params.w1, cfg.input_size, cfg.hidden_size, rng);
        fill_uniform(&mut params.w2, cfg.hidden_size, cfg.output_size, rng);
        params
    }

    /// Check every tensor length against `cfg`
    pub fn validate(&self, cfg: &MlpConfig) -> Result<()> {
        let expected = Self::zeros(cfg);
        let pairs = [
            ("w1", self.w1.len(), expected.w1.len()),
            ("b1", self.b1.len(), expected.b1.len()),
            ("w2", self.w2.len(), expected.w2.len()),
            ("b2", self.b2.len(), expected.b2.len()),
        ];
        for (name, got, want) in pairs {
            if got != want {
                return Err(Error::Shape(format!(
                    "{name}: expected {want} elements, got {got}"
                )));
            }
        }
        Ok(())
    }
}

fn fill_uniform<R: Rng + ?Sized>(w: &mut [f32], fan_in: usize, fan_out: usize, rng: &mut R) {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    let dist = Uniform::new_inclusive(-limit, limit);
    for v in w.iter_mut() {
        *v = dist.sample(rng);
    }
}

/// Parameter set resident on the GPU
pub struct MlpParams {
    pub w1: GpuTensor,
    pub b1: GpuTensor,
    pub w2: GpuTensor,
    pub b2: GpuTensor,
}

impl MlpParams {
    /// Randomly initialize on host, then upload
    pub fn init<R: Rng + ?Sized>(device: &GpuDevice, cfg: &MlpConfig, rng: &mut R) -> Result<Self> {
        Self::from_host(device, cfg, &HostParams::init(cfg, rng))
    }

    /// Upload explicit parameters
    pub fn from_host(device: &GpuDevice, cfg: &MlpConfig, host: &HostParams) -> Result<Self> {
        host.validate(cfg)?;
        let (i, h, o) = (cfg.input_size, cfg.hidden_size, cfg.output_size);
        Ok(Self {
            w1: GpuTensor::from_f32(device, &host.w1, i, h)?,
            b1: GpuTensor::from_f32(device, &host.b1, 1, h)?,
            w2: GpuTensor::from_f32(device, &host.w2, h, o)?,
            b2: GpuTensor::from_f32(device, &host.b2, 1, o)?,
        })
    }

    /// Read all four tensors back to host
    pub fn download(&self, device: &GpuDevice) -> Result<HostParams> {
        Ok(HostParams {
            w1: self.w1.download(device)?,
            b1: self.b1.download(device)?,
            w2: self.w2.download(device)?,
            b2: self.b2.download(device)?,
        })
    }

    /// VRAM usage in bytes
    pub fn memory_bytes(&self) -> usize {
        self.w1.memory_bytes()
            + self.b1.memory_bytes()
            + self.w2.memory_bytes()
            + self.b2.memory_bytes()
    }
}

impl std::fmt::Display for MlpParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MlpParams[{}x{} -> {}x{}, {} bytes VRAM]",
            self.w1.rows(),
            self.w1.cols(),
            self.w2.rows(),
            self.w2.cols(),
            self.memory_bytes(),
        )
    }
}

/// Gradient buffers, one per parameter tensor, same shapes
pub struct MlpGradients {
    pub w1: GpuTensor,
    pub b1: GpuTensor,
    pub w2: GpuTensor,
    pub b2: GpuTensor,
}

impl MlpGradients {
    /// Allocate gradients shaped like `params`
    pub fn like(device: &GpuDevice, params: &MlpParams) -> Self {
        let grads = Self {
            w1: GpuTensor::zeros(device, params.w1.rows(), params.w1.cols()),
            b1: GpuTensor::zeros(device, params.b1.rows(), params.b1.cols()),
            w2: GpuTensor::zeros(device, params.w2.rows(), params.w2.cols()),
            b2: GpuTensor::zeros(device, params.b2.rows(), params.b2.cols()),
        };
        debug_assert_eq!(grads.w1.shape(), params.w1.shape());
        debug_assert_eq!(grads.w2.shape(), params.w2.shape());
        grads
    }

    /// Read all four gradients back to host
    pub fn download(&self, device: &GpuDevice) -> Result<HostParams> {
        Ok(HostParams {
            w1: self.w1.download(device)?,
            b1: self.b1.download(device)?,
            w2: self.w2.download(device)?,
            b2: self.b2.download(device)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_cfg() -> MlpConfig {
        MlpConfig {
            input_size: 6,
            hidden_size: 8,
            output_size: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_init_shapes_and_range() {
        let cfg = small_cfg();
        let mut rng = StdRng::seed_from_u64(0);
        let p = HostParams::init(&cfg, &mut rng);
        p.validate(&cfg).unwrap();

        let limit1 = (6.0f32 / 14.0).sqrt();
        assert!(p.w1.iter().all(|w| w.abs() <= limit1));
        assert!(p.w1.iter().any(|&w| w != 0.0));
        assert!(p.b1.iter().all(|&b| b == 0.0));
        assert!(p.b2.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_init_is_seeded() {
        let cfg = small_cfg();
        let a = HostParams::init(&cfg, &mut StdRng::seed_from_u64(9));
        let b = HostParams::init(&cfg, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn test_validate_rejects_wrong_length() {
        let cfg = small_cfg();
        let mut p = HostParams::zeros(&cfg);
        p.b2.push(0.0);
        assert!(matches!(p.validate(&cfg), Err(Error::Shape(_))));
    }

    #[test]
    fn test_upload_download() {
        let device = match GpuDevice::new() {
            Ok(d) => d,
            Err(_) => return, // No GPU
        };

        let cfg = small_cfg();
        let host = HostParams::init(&cfg, &mut StdRng::seed_from_u64(1));
        let params = MlpParams::from_host(&device, &cfg, &host).unwrap();
        assert_eq!(params.w1.shape(), (6, 8));
        assert_eq!(params.b2.shape(), (1, 3));
        assert_eq!(params.download(&device).unwrap(), host);

        let grads = MlpGradients::like(&device, &params);
        assert_eq!(grads.w2.shape(), params.w2.shape());
        assert!(grads.download(&device).unwrap().w1.iter().all(|&g| g == 0.0));
    }
}
