//! alice-mlp-train: train the MLP on raw image/label files
//!
//! Usage:
//!   alice-mlp-train \
//!       --train-images train_images.bin --train-labels train_labels.bin \
//!       --test-images test_images.bin --test-labels test_labels.bin \
//!       --epochs 20 --learning-rate 0.05
//!
//! Image files are headerless native-endian f32 (count × 784), label files
//! headerless native-endian i32. Progress is logged per epoch; set
//! `RUST_LOG=debug` for device and pipeline details.

use std::path::PathBuf;
use std::process::ExitCode;

use alice_mlp::prelude::*;
use clap::Parser;

/// Train a 784-H-10 GELU perceptron on the GPU
#[derive(Parser, Debug)]
#[command(name = "alice-mlp-train", version, about)]
struct Cli {
    #[arg(long, default_value = "train_images.bin")]
    train_images: PathBuf,

    #[arg(long, default_value = "train_labels.bin")]
    train_labels: PathBuf,

    #[arg(long, default_value = "test_images.bin")]
    test_images: PathBuf,

    #[arg(long, default_value = "test_labels.bin")]
    test_labels: PathBuf,

    /// Training samples to read
    #[arg(long)]
    train_size: Option<usize>,

    /// Test samples to read
    #[arg(long)]
    test_size: Option<usize>,

    #[arg(long)]
    hidden_size: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f32>,

    /// Seed for weight initialization and shuffling
    #[arg(long)]
    seed: Option<u64>,

    /// Reorder training samples every epoch
    #[arg(long)]
    shuffle: bool,
}

impl Cli {
    fn config(&self) -> MlpConfig {
        let d = MlpConfig::default();
        MlpConfig {
            train_size: self.train_size.unwrap_or(d.train_size),
            test_size: self.test_size.unwrap_or(d.test_size),
            hidden_size: self.hidden_size.unwrap_or(d.hidden_size),
            batch_size: self.batch_size.unwrap_or(d.batch_size),
            epochs: self.epochs.unwrap_or(d.epochs),
            learning_rate: self.learning_rate.unwrap_or(d.learning_rate),
            seed: self.seed.unwrap_or(d.seed),
            shuffle: self.shuffle,
            ..d
        }
    }
}

fn run(cli: &Cli) -> alice_mlp::Result<()> {
    let cfg = cli.config();
    cfg.validate()?;

    let train = Dataset::load(
        &cli.train_images,
        &cli.train_labels,
        cfg.train_size,
        cfg.input_size,
        cfg.output_size,
    )?;
    let test = Dataset::load(
        &cli.test_images,
        &cli.test_labels,
        cfg.test_size,
        cfg.input_size,
        cfg.output_size,
    )?;

    let device = GpuDevice::new()?;
    log::info!("{device}");

    let mut trainer = Trainer::new(&device, &cfg)?;
    log::info!("{trainer}, {} epochs", cfg.epochs);

    let reports = trainer.fit(&device, &train, &test)?;
    if let Some(last) = reports.last() {
        println!(
            "final: train acc {:.2}%, test acc {:.2}%",
            last.train_accuracy * 100.0,
            last.test_accuracy * 100.0
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
