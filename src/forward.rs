//! Forward Pipeline: Batch In, Probabilities Out
//!
//! ```text
//! input ──gemm_nn(W1)──▶ +b1 ──copy──▶ hidden_pre
//!                          │
//!                          ▼
//!                        gelu ──gemm_nn(W2)──▶ +b2 ──softmax──▶ output
//! ```
//!
//! Every kernel is submitted to the single device queue in the order
//! shown. wgpu executes submissions on one queue in order, so each kernel
//! observes the writes of the ones before it. The host waits exactly once,
//! after softmax. Nothing in this module may move work to another queue.

use crate::config::MlpConfig;
use crate::device::GpuDevice;
use crate::error::Result;
use crate::params::MlpParams;
use crate::pipeline::MlpCompute;
use crate::tensor::{GpuLabels, GpuTensor};

/// Persistent per-batch buffers, allocated once per run and reused.
pub struct BatchBuffers {
    /// batch × input
    pub input: GpuTensor,
    /// batch × hidden; pre-activation, then GELU output in place
    pub hidden: GpuTensor,
    /// batch × hidden; pre-activation saved for the GELU derivative
    pub hidden_pre: GpuTensor,
    /// batch × output; logits, then probabilities in place
    pub output: GpuTensor,
    pub labels: GpuLabels,
    pub d_output: GpuTensor,
    pub d_hidden: GpuTensor,
    pub d_act: GpuTensor,
}

impl BatchBuffers {
    /// Fails when any batch tensor exceeds the device's binding limit.
    pub fn new(device: &GpuDevice, cfg: &MlpConfig) -> Result<Self> {
        cfg.check_device(device)?;
        let (b, i, h, o) = (
            cfg.batch_size,
            cfg.input_size,
            cfg.hidden_size,
            cfg.output_size,
        );
        Ok(Self {
            input: GpuTensor::zeros(device, b, i),
            hidden: GpuTensor::output(device, b, h),
            hidden_pre: GpuTensor::output(device, b, h),
            output: GpuTensor::output(device, b, o),
            labels: GpuLabels::new(device, b),
            d_output: GpuTensor::output(device, b, o),
            d_hidden: GpuTensor::output(device, b, h),
            d_act: GpuTensor::output(device, b, h),
        })
    }

    /// Rows per batch
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.input.rows()
    }

    /// Stage one batch of images and labels
    pub fn upload(&self, device: &GpuDevice, images: &[f32], labels: &[u32]) -> Result<()> {
        self.input.upload(device, images)?;
        self.labels.upload(device, labels)
    }

    pub fn memory_bytes(&self) -> usize {
        [
            &self.input,
            &self.hidden,
            &self.hidden_pre,
            &self.output,
            &self.d_output,
            &self.d_hidden,
            &self.d_act,
        ]
        .iter()
        .map(|t| t.memory_bytes())
        .sum::<usize>()
            + self.labels.len() * std::mem::size_of::<u32>()
    }
}

/// The fixed six-step forward sequence
pub struct MlpForward;

impl MlpForward {
    /// Run the forward pass over `batch.input`. On return `batch.output`
    /// holds per-row probabilities and the GPU is idle.
    pub fn forward(
        device: &GpuDevice,
        compute: &MlpCompute,
        params: &MlpParams,
        batch: &BatchBuffers,
    ) -> Result<()> {
        compute.gemm_nn(device, &batch.input, &params.w1, &batch.hidden)?;
        compute.bias_add_inplace(device, &batch.hidden, &params.b1)?;
        device.copy_buffer(
            &batch.hidden.buffer,
            &batch.hidden_pre.buffer,
            batch.hidden.buffer_size(),
        );
        compute.gelu_inplace(device, &batch.hidden)?;

        compute.gemm_nn(device, &batch.hidden, &params.w2, &batch.output)?;
        compute.bias_add_inplace(device, &batch.output, &params.b2)?;
        compute.softmax_inplace(device, &batch.output)?;

        device.poll_wait();
        Ok(())
    }

    /// Forward, then read the probabilities back
    pub fn predict(
        device: &GpuDevice,
        compute: &MlpCompute,
        params: &MlpParams,
        batch: &BatchBuffers,
    ) -> Result<Vec<f32>> {
        Self::forward(device, compute, params, batch)?;
        batch.output.download(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::HostParams;
    use crate::reference;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_cfg() -> MlpConfig {
        MlpConfig {
            input_size: 12,
            hidden_size: 20,
            output_size: 4,
            batch_size: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_forward_matches_reference() {
        let device = match GpuDevice::new() {
            Ok(d) => d,
            Err(_) => return, // No GPU
        };
        let compute = MlpCompute::new(&device);

        let cfg = small_cfg();
        let mut host = HostParams::init(&cfg, &mut StdRng::seed_from_u64(5));
        host.b1.iter_mut().enumerate().for_each(|(i, b)| *b = i as f32 * 0.01);
        host.b2 = vec![0.1, -0.2, 0.3, 0.0];
        let params = MlpParams::from_host(&device, &cfg, &host).unwrap();

        let batch = BatchBuffers::new(&device, &cfg).unwrap();
        let images: Vec<f32> = (0..cfg.batch_size * cfg.input_size)
            .map(|i| ((i % 9) as f32 - 4.0) * 0.1)
            .collect();
        batch.upload(&device, &images, &[0, 1, 2]).unwrap();

        let probs = MlpForward::predict(&device, &compute, &params, &batch).unwrap();
        let want = reference::forward(&cfg, &host, &images, cfg.batch_size);

        for (g, w) in probs.iter().zip(&want.probs) {
            assert!((g - w).abs() < 1e-4, "got {g}, want {w}");
        }
        let pre = batch.hidden_pre.download(&device).unwrap();
        for (g, w) in pre.iter().zip(&want.hidden_pre) {
            assert!((g - w).abs() < 1e-4);
        }
    }

    #[test]
    fn test_zero_batch_gives_uniform_probabilities() {
        let device = match GpuDevice::new() {
            Ok(d) => d,
            Err(_) => return,
        };
        let compute = MlpCompute::new(&device);

        let cfg = MlpConfig {
            hidden_size: 64,
            ..Default::default()
        };
        let params = MlpParams::init(&device, &cfg, &mut StdRng::seed_from_u64(0)).unwrap();
        let batch = BatchBuffers::new(&device, &cfg).unwrap();

        let probs = MlpForward::predict(&device, &compute, &params, &batch).unwrap();
        assert!(batch.hidden.download(&device).unwrap().iter().all(|&v| v == 0.0));
        assert_eq!(probs.len(), cfg.batch_size * cfg.output_size);
        for p in probs {
            assert!((p - 0.1).abs() < 1e-6, "p = {p}");
        }
    }

    #[test]
    fn test_batch_past_binding_limit_is_an_error() {
        let device = match GpuDevice::new() {
            Ok(d) => d,
            Err(_) => return,
        };

        // hidden is 2048 × 1048560 f32, past any u32-sized binding limit
        let cfg = MlpConfig {
            hidden_size: crate::kernel::MAX_GEMM_EXTENT,
            batch_size: 2048,
            test_size: 2048,
            ..Default::default()
        };
        cfg.validate().unwrap();
        assert!(matches!(
            BatchBuffers::new(&device, &cfg),
            Err(crate::Error::InvalidConfig(_))
        ));
        assert!(matches!(
            crate::Trainer::new(&device, &cfg),
            Err(crate::Error::InvalidConfig(_))
        ));
    }
}
