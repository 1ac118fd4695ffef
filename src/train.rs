//! Training Driver: Epochs, Batches, Backward, SGD
//!
//! Per batch: stage → forward → read probabilities → host loss →
//! backward kernels → SGD kernels. Every kernel goes through the one
//! device queue, so gradients are complete before the update reads them
//! and the update is complete before the next forward reads the weights.
//!
//! Backward (B = batch rows):
//!
//! ```text
//! d_out   = (probs - onehot) / B
//! gW2     = hiddenᵗ · d_out           gb2 = Σ_rows d_out
//! d_hid   = d_out · W2ᵗ
//! d_hid  *= gelu'(hidden_pre)
//! gW1     = inputᵗ · d_hid            gb1 = Σ_rows d_hid
//! ```

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::MlpConfig;
use crate::data::Dataset;
use crate::device::GpuDevice;
use crate::error::{Error, Result};
use crate::forward::{BatchBuffers, MlpForward};
use crate::loss;
use crate::params::{HostParams, MlpGradients, MlpParams};
use crate::pipeline::MlpCompute;

/// Loss and correct count for one batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchStats {
    pub loss: f32,
    pub correct: usize,
}

/// Mean loss and accuracy over a dataset split
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalReport {
    pub loss: f32,
    pub accuracy: f32,
    /// Samples actually evaluated (full batches only)
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    /// 1-based
    pub epoch: usize,
    pub train_loss: f32,
    pub train_accuracy: f32,
    pub test_loss: f32,
    pub test_accuracy: f32,
    pub elapsed: Duration,
}

impl std::fmt::Display for EpochReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Epoch {}: train loss {:.4} acc {:.2}% | test loss {:.4} acc {:.2}% ({:.2?})",
            self.epoch,
            self.train_loss,
            self.train_accuracy * 100.0,
            self.test_loss,
            self.test_accuracy * 100.0,
            self.elapsed,
        )
    }
}

/// Owns parameters, gradients, batch buffers and pipelines for one run.
pub struct Trainer {
    cfg: MlpConfig,
    compute: MlpCompute,
    params: MlpParams,
    grads: MlpGradients,
    batch: BatchBuffers,
    rng: StdRng,
    order: Vec<usize>,
    stage_images: Vec<f32>,
    stage_labels: Vec<u32>,
}

impl Trainer {
    /// Validate `cfg`, compile pipelines, initialize parameters from `cfg.seed`.
    pub fn new(device: &GpuDevice, cfg: &MlpConfig) -> Result<Self> {
        cfg.validate()?;
        cfg.check_device(device)?;
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let params = MlpParams::init(device, cfg, &mut rng)?;
        Self::assemble(device, cfg, params, rng)
    }

    /// Start from explicit parameters instead of random ones.
    pub fn with_params(device: &GpuDevice, cfg: &MlpConfig, host: &HostParams) -> Result<Self> {
        cfg.validate()?;
        cfg.check_device(device)?;
        let params = MlpParams::from_host(device, cfg, host)?;
        Self::assemble(device, cfg, params, StdRng::seed_from_u64(cfg.seed))
    }

    fn assemble(
        device: &GpuDevice,
        cfg: &MlpConfig,
        params: MlpParams,
        rng: StdRng,
    ) -> Result<Self> {
        let compute = MlpCompute::new(device);
        let grads = MlpGradients::like(device, &params);
        let batch = BatchBuffers::new(device, cfg)?;
        log::debug!(
            "trainer ready: {} params, {} bytes batch buffers",
            cfg.parameter_count(),
            batch.memory_bytes()
        );
        Ok(Self {
            cfg: cfg.clone(),
            compute,
            params,
            grads,
            batch,
            rng,
            order: Vec::new(),
            stage_images: Vec::with_capacity(cfg.batch_size * cfg.input_size),
            stage_labels: Vec::with_capacity(cfg.batch_size),
        })
    }

    #[inline]
    pub fn config(&self) -> &MlpConfig {
        &self.cfg
    }

    #[inline]
    pub fn params(&self) -> &MlpParams {
        &self.params
    }

    #[inline]
    pub fn gradients(&self) -> &MlpGradients {
        &self.grads
    }

    /// One forward + backward + update over a staged batch.
    ///
    /// Labels must lie in `[0, output_size)`.
    pub fn train_step(
        &mut self,
        device: &GpuDevice,
        images: &[f32],
        labels: &[u32],
    ) -> Result<BatchStats> {
        let classes = self.cfg.output_size;
        if let Some(&label) = labels.iter().find(|&&l| l as usize >= classes) {
            return Err(Error::InvalidData(format!(
                "label {label} out of range for {classes} classes"
            )));
        }
        self.batch.upload(device, images, labels)?;
        let probs = MlpForward::predict(device, &self.compute, &self.params, &self.batch)?;
        let stats = BatchStats {
            loss: loss::cross_entropy(&probs, labels, self.cfg.output_size),
            correct: loss::count_correct(&probs, labels, self.cfg.output_size),
        };

        self.backward(device)?;
        self.apply_update(device)?;
        device.poll_wait();
        Ok(stats)
    }

    /// Fill all four gradients from the last forward pass.
    ///
    /// Reads `output`, `labels`, `hidden`, `hidden_pre` and `input` from the
    /// batch buffers; every gradient buffer is overwritten.
    pub fn backward(&self, device: &GpuDevice) -> Result<()> {
        let (c, b, g, p) = (&self.compute, &self.batch, &self.grads, &self.params);

        c.softmax_xent_grad(device, &b.output, &b.labels, &b.d_output)?;

        c.gemm_tn(device, &b.hidden, &b.d_output, &g.w2)?;
        c.bias_grad(device, &b.d_output, &g.b2)?;

        c.gemm_nt(device, &b.d_output, &p.w2, &b.d_hidden)?;
        c.gelu_grad(device, &b.hidden_pre, &b.d_act)?;
        c.mul_inplace(device, &b.d_hidden, &b.d_act)?;

        c.gemm_tn(device, &b.input, &b.d_hidden, &g.w1)?;
        c.bias_grad(device, &b.d_hidden, &g.b1)?;
        Ok(())
    }

    /// SGD on all four parameter tensors with the configured learning rate.
    pub fn apply_update(&self, device: &GpuDevice) -> Result<()> {
        let lr = self.cfg.learning_rate;
        let (c, p, g) = (&self.compute, &self.params, &self.grads);
        c.sgd_update(device, &p.w1, &g.w1, lr)?;
        c.sgd_update(device, &p.b1, &g.b1, lr)?;
        c.sgd_update(device, &p.w2, &g.w2, lr)?;
        c.sgd_update(device, &p.b2, &g.b2, lr)?;
        Ok(())
    }

    /// Forward-only pass over every full batch of `data`.
    pub fn evaluate(&mut self, device: &GpuDevice, data: &Dataset) -> Result<EvalReport> {
        let batches = self.check_dataset(data, "test")?;
        let bs = self.cfg.batch_size;
        let classes = self.cfg.output_size;

        let mut loss_sum = 0.0f32;
        let mut correct = 0usize;
        for idx in 0..batches {
            let (images, labels) = data.batch(idx, bs);
            self.stage_labels.clear();
            self.stage_labels.extend(labels.iter().map(|&l| l as u32));
            self.batch.upload(device, images, &self.stage_labels)?;

            let probs = MlpForward::predict(device, &self.compute, &self.params, &self.batch)?;
            loss_sum += loss::cross_entropy(&probs, &self.stage_labels, classes);
            correct += loss::count_correct(&probs, &self.stage_labels, classes);
        }

        let samples = batches * bs;
        Ok(EvalReport {
            loss: loss_sum / batches as f32,
            accuracy: correct as f32 / samples as f32,
            samples,
        })
    }

    /// One pass over every full batch of `data`. Returns mean loss and accuracy.
    pub fn run_epoch(&mut self, device: &GpuDevice, data: &Dataset) -> Result<EvalReport> {
        let batches = self.check_dataset(data, "train")?;
        let bs = self.cfg.batch_size;

        self.order.clear();
        self.order.extend(0..data.len());
        if self.cfg.shuffle {
            self.order.shuffle(&mut self.rng);
        }

        let mut loss_sum = 0.0f32;
        let mut correct = 0usize;
        for idx in 0..batches {
            let mut images = std::mem::take(&mut self.stage_images);
            let mut labels = std::mem::take(&mut self.stage_labels);
            data.gather(&self.order[idx * bs..(idx + 1) * bs], &mut images, &mut labels);

            let stats = self.train_step(device, &images, &labels);
            self.stage_images = images;
            self.stage_labels = labels;

            let stats = stats?;
            loss_sum += stats.loss;
            correct += stats.correct;
        }

        let samples = batches * bs;
        Ok(EvalReport {
            loss: loss_sum / batches as f32,
            accuracy: correct as f32 / samples as f32,
            samples,
        })
    }

    /// Train for `cfg.epochs` epochs, evaluating `test` after each.
    pub fn fit(
        &mut self,
        device: &GpuDevice,
        train: &Dataset,
        test: &Dataset,
    ) -> Result<Vec<EpochReport>> {
        let dropped = train.len() % self.cfg.batch_size;
        if dropped != 0 {
            log::warn!(
                "{dropped} trailing training samples do not fill a batch of {} and are skipped",
                self.cfg.batch_size
            );
        }

        let mut reports = Vec::with_capacity(self.cfg.epochs);
        for epoch in 1..=self.cfg.epochs {
            let start = Instant::now();
            let train_report = self.run_epoch(device, train)?;
            let test_report = self.evaluate(device, test)?;

            let report = EpochReport {
                epoch,
                train_loss: train_report.loss,
                train_accuracy: train_report.accuracy,
                test_loss: test_report.loss,
                test_accuracy: test_report.accuracy,
                elapsed: start.elapsed(),
            };
            log::info!("{report}");
            reports.push(report);
        }
        Ok(reports)
    }

    /// Download the current parameters
    pub fn download_params(&self, device: &GpuDevice) -> Result<HostParams> {
        self.params.download(device)
    }

    fn check_dataset(&self, data: &Dataset, split: &str) -> Result<usize> {
        if data.input_size() != self.cfg.input_size || data.classes() != self.cfg.output_size {
            return Err(Error::Shape(format!(
                "{split} set is {}→{}, network is {}→{}",
                data.input_size(),
                data.classes(),
                self.cfg.input_size,
                self.cfg.output_size
            )));
        }
        let batches = data.full_batches(self.cfg.batch_size);
        if batches == 0 {
            return Err(Error::InvalidData(format!(
                "{split} set has {} samples, fewer than one batch of {}",
                data.len(),
                self.cfg.batch_size
            )));
        }
        Ok(batches)
    }
}

impl std::fmt::Display for Trainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Trainer[{}-{}-{}, batch {}, lr {}]",
            self.cfg.input_size,
            self.cfg.hidden_size,
            self.cfg.output_size,
            self.cfg.batch_size,
            self.cfg.learning_rate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference;

    fn small_cfg() -> MlpConfig {
        MlpConfig {
            input_size: 8,
            hidden_size: 16,
            output_size: 3,
            train_size: 48,
            test_size: 24,
            batch_size: 8,
            epochs: 3,
            learning_rate: 0.1,
            shuffle: false,
            seed: 11,
        }
    }

    fn separable(cfg: &MlpConfig, count: usize) -> Dataset {
        // Class c lights up a distinct band of inputs
        let mut images = vec![0.0; count * cfg.input_size];
        let mut labels = Vec::with_capacity(count);
        for s in 0..count {
            let class = s % cfg.output_size;
            for j in 0..cfg.input_size {
                if j % cfg.output_size == class {
                    images[s * cfg.input_size + j] = 1.0;
                }
            }
            labels.push(class as i32);
        }
        Dataset::from_flat(images, labels, cfg.input_size, cfg.output_size).unwrap()
    }

    #[test]
    fn test_backward_matches_reference() {
        let device = match GpuDevice::new() {
            Ok(d) => d,
            Err(_) => return, // No GPU
        };

        let cfg = small_cfg();
        let trainer = Trainer::new(&device, &cfg).unwrap();
        let host = trainer.download_params(&device).unwrap();

        let data = separable(&cfg, cfg.batch_size);
        let (images, labels) = data.batch(0, cfg.batch_size);
        let labels: Vec<u32> = labels.iter().map(|&l| l as u32).collect();
        trainer.batch.upload(&device, images, &labels).unwrap();

        MlpForward::forward(&device, &trainer.compute, &trainer.params, &trainer.batch).unwrap();
        trainer.backward(&device).unwrap();
        let got = trainer.grads.download(&device).unwrap();

        let acts = reference::forward(&cfg, &host, images, cfg.batch_size);
        let want = reference::backward(&cfg, &host, images, &labels, &acts);

        for (name, g, w) in [
            ("w1", &got.w1, &want.w1),
            ("b1", &got.b1, &want.b1),
            ("w2", &got.w2, &want.w2),
            ("b2", &got.b2, &want.b2),
        ] {
            for (i, (x, y)) in g.iter().zip(w.iter()).enumerate() {
                assert!((x - y).abs() < 1e-4, "{name}[{i}]: gpu {x}, host {y}");
            }
        }
    }

    #[test]
    fn test_backward_overwrites_previous_batch() {
        let device = match GpuDevice::new() {
            Ok(d) => d,
            Err(_) => return,
        };

        let cfg = small_cfg();
        let trainer = Trainer::new(&device, &cfg).unwrap();
        let host = trainer.download_params(&device).unwrap();

        let data = separable(&cfg, 2 * cfg.batch_size);
        let run = |idx: usize| {
            let (images, labels) = data.batch(idx, cfg.batch_size);
            let labels: Vec<u32> = labels.iter().map(|&l| l as u32).collect();
            trainer.batch.upload(&device, images, &labels).unwrap();
            MlpForward::forward(&device, &trainer.compute, &trainer.params, &trainer.batch)
                .unwrap();
            trainer.backward(&device).unwrap();
            (images, labels)
        };

        // Batch A leaves non-zero gradients behind; batch B must not see them
        run(0);
        let (images, labels) = run(1);
        device.poll_wait();
        let got = trainer.grads.download(&device).unwrap();

        let acts = reference::forward(&cfg, &host, images, cfg.batch_size);
        let want = reference::backward(&cfg, &host, images, &labels, &acts);
        for (name, g, w) in [
            ("w1", &got.w1, &want.w1),
            ("b1", &got.b1, &want.b1),
            ("w2", &got.w2, &want.w2),
            ("b2", &got.b2, &want.b2),
        ] {
            for (i, (x, y)) in g.iter().zip(w.iter()).enumerate() {
                assert!((x - y).abs() < 1e-4, "{name}[{i}]: gpu {x}, host {y}");
            }
        }
    }

    #[test]
    fn test_train_step_rejects_out_of_range_label() {
        let device = match GpuDevice::new() {
            Ok(d) => d,
            Err(_) => return,
        };

        let cfg = small_cfg();
        let mut trainer = Trainer::new(&device, &cfg).unwrap();
        let before = trainer.download_params(&device).unwrap();

        let images = vec![0.5; cfg.batch_size * cfg.input_size];
        let mut labels = vec![0u32; cfg.batch_size];
        labels[5] = cfg.output_size as u32;
        assert!(matches!(
            trainer.train_step(&device, &images, &labels),
            Err(Error::InvalidData(_))
        ));

        // Nothing was staged or updated
        assert_eq!(trainer.download_params(&device).unwrap(), before);
    }

    #[test]
    fn test_update_moves_against_gradient() {
        let device = match GpuDevice::new() {
            Ok(d) => d,
            Err(_) => return,
        };

        let cfg = small_cfg();
        let mut trainer = Trainer::new(&device, &cfg).unwrap();
        let before = trainer.download_params(&device).unwrap();

        let data = separable(&cfg, cfg.batch_size);
        let (images, labels) = data.batch(0, cfg.batch_size);
        let labels: Vec<u32> = labels.iter().map(|&l| l as u32).collect();
        trainer.train_step(&device, images, &labels).unwrap();

        let grads = trainer.gradients().download(&device).unwrap();
        let after = trainer.download_params(&device).unwrap();
        for ((a, b), g) in after.b2.iter().zip(&before.b2).zip(&grads.b2) {
            assert!((a - (b - cfg.learning_rate * g)).abs() < 1e-6);
        }
    }

    #[test]
    fn test_fit_reduces_loss() {
        let device = match GpuDevice::new() {
            Ok(d) => d,
            Err(_) => return,
        };

        let cfg = small_cfg();
        let train = separable(&cfg, cfg.train_size);
        let test = separable(&cfg, cfg.test_size);
        let mut trainer = Trainer::new(&device, &cfg).unwrap();

        let reports = trainer.fit(&device, &train, &test).unwrap();
        assert_eq!(reports.len(), cfg.epochs);
        assert_eq!(reports[0].epoch, 1);
        assert!(reports.last().unwrap().train_loss < reports[0].train_loss);
        assert!(reports.iter().all(|r| r.test_loss.is_finite()));
    }

    #[test]
    fn test_rejects_mismatched_dataset() {
        let device = match GpuDevice::new() {
            Ok(d) => d,
            Err(_) => return,
        };

        let cfg = small_cfg();
        let mut trainer = Trainer::new(&device, &cfg).unwrap();
        let wrong = Dataset::from_flat(vec![0.0; 8 * 4], vec![0; 8], 4, 3).unwrap();
        assert!(matches!(
            trainer.evaluate(&device, &wrong),
            Err(Error::Shape(_))
        ));
        let short = separable(&cfg, cfg.batch_size - 1);
        assert!(matches!(
            trainer.run_epoch(&device, &short),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let device = match GpuDevice::new() {
            Ok(d) => d,
            Err(_) => return,
        };
        let cfg = MlpConfig {
            learning_rate: 0.0,
            ..small_cfg()
        };
        assert!(matches!(
            Trainer::new(&device, &cfg),
            Err(Error::InvalidConfig(_))
        ));
    }
}
