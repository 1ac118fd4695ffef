//! alice-mlp-wmma: fragment-tiled mixed-precision GEMM benchmark
//!
//! Usage:
//!   alice-mlp-wmma                    # 4096³ on the wgpu adapter
//!   alice-mlp-wmma -m 2048 -n 2048 -k 1024
//!   alice-mlp-wmma --cuda             # native Tensor Cores (needs --features cuda)
//!
//! Prints one throughput line: elapsed milliseconds and TFLOP/s.

use std::process::ExitCode;

use alice_mlp::prelude::*;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Time D = A·B + C with f16 A/B and f32 C/D, 16×16×16 fragments
#[derive(Parser, Debug)]
#[command(name = "alice-mlp-wmma", version, about)]
struct Cli {
    /// Rows of A and D (multiple of 16)
    #[arg(short, long, default_value_t = 4096)]
    m: usize,

    /// Columns of B and D (multiple of 16)
    #[arg(short, long, default_value_t = 4096)]
    n: usize,

    /// Shared dimension (multiple of 16)
    #[arg(short, long, default_value_t = 4096)]
    k: usize,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Use the native CUDA wmma kernel instead of wgpu
    #[arg(long)]
    cuda: bool,
}

fn run(cli: &Cli) -> alice_mlp::Result<()> {
    let cfg = WmmaConfig::new(cli.m, cli.n, cli.k)?;
    let inputs = WmmaInputs::random(cfg, &mut StdRng::seed_from_u64(cli.seed))?;

    let report = if cli.cuda {
        run_cuda(&inputs)?
    } else {
        let device = GpuDevice::new()?;
        log::info!("{device}");
        let bench = WmmaBenchmark::new(&device);
        let (report, _) = bench.run(&device, &inputs)?;
        report
    };

    println!(
        "{}x{}x{}: {:.3} ms, {:.2} TFLOP/s",
        cfg.m, cfg.n, cfg.k, report.elapsed_ms, report.tflops
    );
    Ok(())
}

#[cfg(feature = "cuda")]
fn run_cuda(inputs: &WmmaInputs) -> alice_mlp::Result<alice_mlp::WmmaReport> {
    let engine = alice_mlp::cuda::CudaWmmaEngine::init(0)?;
    log::info!("{engine}");
    let (report, _) = engine.run(inputs)?;
    Ok(report)
}

#[cfg(not(feature = "cuda"))]
fn run_cuda(_inputs: &WmmaInputs) -> alice_mlp::Result<alice_mlp::WmmaReport> {
    Err(alice_mlp::Error::InvalidConfig(
        "--cuda requires building with `--features cuda`".to_owned(),
    ))
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
