//! Fragment-Tiled Mixed-Precision GEMM Benchmark
//!
//! D = A·B + C with A (m×k) and B (k×n) in half precision, C and D in f32.
//! One 16×16 workgroup owns one output tile; for each 16-wide slice of K
//! it stages an A fragment and a B fragment in workgroup memory, barriers,
//! and accumulates in f32. C is added once at the end.
//!
//! ```text
//!   A tile row ──▶ frag_a[16×16] ─┐
//!                                  ├─▶ acc += frag_a · frag_b  (K/16 steps)
//!   B tile col ──▶ frag_b[16×16] ─┘
//!                                  └─▶ D = acc + C
//! ```
//!
//! Halves travel packed two per `u32` (element `2i` in the low 16 bits)
//! and are widened in the shader with `unpack2x16float`.

use std::time::Instant;

use half::f16;
use rand::Rng;

use crate::config::{WmmaConfig, FRAGMENT};
use crate::device::GpuDevice;
use crate::error::{Error, Result};
use crate::kernel::{GemmParams, WMMA_GEMM_SHADER};
use crate::pipeline::{Access, Kernel};
use crate::tensor::GpuTensor;

/// Host operands for one benchmark run
#[derive(Debug, Clone)]
pub struct WmmaInputs {
    pub cfg: WmmaConfig,
    /// m × k
    pub a: Vec<f16>,
    /// k × n
    pub b: Vec<f16>,
    /// m × n
    pub c: Vec<f32>,
}

impl WmmaInputs {
    /// Validate operand lengths against `cfg`
    pub fn new(cfg: WmmaConfig, a: Vec<f16>, b: Vec<f16>, c: Vec<f32>) -> Result<Self> {
        cfg.validate()?;
        let expect = [
            ("A", a.len(), cfg.m * cfg.k),
            ("B", b.len(), cfg.k * cfg.n),
            ("C", c.len(), cfg.m * cfg.n),
        ];
        for (name, got, want) in expect {
            if got != want {
                return Err(Error::Shape(format!(
                    "{name}: expected {want} elements, got {got}"
                )));
            }
        }
        Ok(Self { cfg, a, b, c })
    }

    /// Uniform values in [-1, 1)
    pub fn random<R: Rng + ?Sized>(cfg: WmmaConfig, rng: &mut R) -> Result<Self> {
        let a = (0..cfg.m * cfg.k)
            .map(|_| f16::from_f32(rng.gen_range(-1.0..1.0)))
            .collect();
        let b = (0..cfg.k * cfg.n)
            .map(|_| f16::from_f32(rng.gen_range(-1.0..1.0)))
            .collect();
        let c = (0..cfg.m * cfg.n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        Self::new(cfg, a, b, c)
    }
}

/// Device copies of the operands plus the output tensor
pub struct WmmaBuffers {
    cfg: WmmaConfig,
    params: GemmParams,
    a: wgpu::Buffer,
    b: wgpu::Buffer,
    c: GpuTensor,
    /// m × n result
    pub d: GpuTensor,
}

impl WmmaBuffers {
    /// Fails when an operand exceeds the device's binding limit.
    pub fn upload(device: &GpuDevice, inputs: &WmmaInputs) -> Result<Self> {
        let cfg = inputs.cfg;
        cfg.check_device(device)?;
        let params = GemmParams::new(cfg.m, cfg.n, cfg.k)?;
        Ok(Self {
            cfg,
            params,
            a: device.create_buffer_init("wmma_a", bytemuck::cast_slice(&inputs.a)),
            b: device.create_buffer_init("wmma_b", bytemuck::cast_slice(&inputs.b)),
            c: GpuTensor::from_f32(device, &inputs.c, cfg.m, cfg.n)?,
            d: GpuTensor::output(device, cfg.m, cfg.n),
        })
    }

    /// VRAM usage in bytes
    pub fn memory_bytes(&self) -> usize {
        (self.cfg.m * self.cfg.k + self.cfg.k * self.cfg.n) * std::mem::size_of::<f16>()
            + self.c.memory_bytes()
            + self.d.memory_bytes()
    }
}

/// Timing of one launch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WmmaReport {
    pub cfg: WmmaConfig,
    pub elapsed_ms: f64,
    pub tflops: f64,
    /// True when measured with GPU timestamps, false for host wall-clock
    pub device_timed: bool,
}

impl WmmaReport {
    pub fn new(cfg: WmmaConfig, elapsed_ms: f64, device_timed: bool) -> Self {
        let tflops = if elapsed_ms > 0.0 {
            cfg.flops() / (elapsed_ms * 1e-3) / 1e12
        } else {
            0.0
        };
        Self {
            cfg,
            elapsed_ms,
            tflops,
            device_timed,
        }
    }
}

impl std::fmt::Display for WmmaReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}x{} GEMM: {:.3} ms, {:.2} TFLOPS ({})",
            self.cfg.m,
            self.cfg.n,
            self.cfg.k,
            self.elapsed_ms,
            self.tflops,
            if self.device_timed { "gpu timestamps" } else { "host clock" },
        )
    }
}

/// Compiled fragment GEMM pipeline
pub struct WmmaBenchmark {
    kernel: Kernel,
}

impl WmmaBenchmark {
    pub fn new(device: &GpuDevice) -> Self {
        use Access::{Read, ReadWrite};
        Self {
            kernel: Kernel::new(
                device,
                WMMA_GEMM_SHADER,
                "wmma_gemm",
                &[Read, Read, Read, ReadWrite],
            ),
        }
    }

    /// Upload, launch once, time it. The result stays in the returned buffers.
    pub fn run(&self, device: &GpuDevice, inputs: &WmmaInputs) -> Result<(WmmaReport, WmmaBuffers)> {
        let buffers = WmmaBuffers::upload(device, inputs)?;
        if !device.supports_timestamps() {
            log::warn!("adapter lacks TIMESTAMP_QUERY, timing with the host clock");
        }
        // Uploads land before timing starts
        device.poll_wait();
        let report = self.launch(device, &buffers)?;
        log::info!("{report}");
        Ok((report, buffers))
    }

    /// One timed dispatch over already-uploaded buffers. Does not log.
    pub fn launch(&self, device: &GpuDevice, buffers: &WmmaBuffers) -> Result<WmmaReport> {
        let cfg = buffers.cfg;
        if device.supports_timestamps() {
            let elapsed_ms = self.launch_timestamped(device, buffers)?;
            Ok(WmmaReport::new(cfg, elapsed_ms, true))
        } else {
            let start = Instant::now();
            self.dispatch(device, buffers, None);
            device.poll_wait();
            Ok(WmmaReport::new(cfg, start.elapsed().as_secs_f64() * 1e3, false))
        }
    }

    fn launch_timestamped(&self, device: &GpuDevice, buffers: &WmmaBuffers) -> Result<f64> {
        let query_set = device.device().create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("wmma_timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: 2,
        });
        let resolve_size = 2 * std::mem::size_of::<u64>() as u64;
        let resolve = device.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("wmma_timestamps_resolve"),
            size: resolve_size,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        self.dispatch(
            device,
            buffers,
            Some(wgpu::ComputePassTimestampWrites {
                query_set: &query_set,
                beginning_of_pass_write_index: Some(0),
                end_of_pass_write_index: Some(1),
            }),
        );

        let mut encoder = device.encoder("wmma_resolve");
        encoder.resolve_query_set(&query_set, 0..2, &resolve, 0);
        device.submit(encoder);

        let bytes = device.read_buffer(&resolve, resolve_size)?;
        let stamps: Vec<u64> = bytemuck::pod_collect_to_vec(&bytes);
        let ticks = stamps[1].saturating_sub(stamps[0]);
        let period_ns = device.queue().get_timestamp_period() as f64;
        Ok(ticks as f64 * period_ns * 1e-6)
    }

    fn dispatch(
        &self,
        device: &GpuDevice,
        buffers: &WmmaBuffers,
        timestamp_writes: Option<wgpu::ComputePassTimestampWrites<'_>>,
    ) {
        let params = buffers.params;
        let groups = (params.n / FRAGMENT as u32, params.m / FRAGMENT as u32, 1);
        self.kernel.dispatch(
            device,
            &[&buffers.a, &buffers.b, &buffers.c.buffer, &buffers.d.buffer],
            bytemuck::bytes_of(&params),
            groups,
            timestamp_writes,
        );
    }
}

/// Host emulation of the tile protocol: same fragment loads, same f32
/// accumulation order per output element, C added last.
pub fn fragment_gemm_reference(a: &[f16], b: &[f16], c: &[f32], cfg: &WmmaConfig) -> Vec<f32> {
    let (m, n, k) = (cfg.m, cfg.n, cfg.k);
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b.len(), k * n);
    debug_assert_eq!(c.len(), m * n);

    let mut d = vec![0.0f32; m * n];
    let mut frag_a = [0.0f32; FRAGMENT * FRAGMENT];
    let mut frag_b = [0.0f32; FRAGMENT * FRAGMENT];
    let mut acc = [0.0f32; FRAGMENT * FRAGMENT];

    for tile_row in (0..m).step_by(FRAGMENT) {
        for tile_col in (0..n).step_by(FRAGMENT) {
            acc.fill(0.0);
            for kk in (0..k).step_by(FRAGMENT) {
                for r in 0..FRAGMENT {
                    for cc in 0..FRAGMENT {
                        frag_a[r * FRAGMENT + cc] = a[(tile_row + r) * k + kk + cc].to_f32();
                        frag_b[r * FRAGMENT + cc] = b[(kk + r) * n + tile_col + cc].to_f32();
                    }
                }
                for r in 0..FRAGMENT {
                    for cc in 0..FRAGMENT {
                        let mut sum = acc[r * FRAGMENT + cc];
                        for i in 0..FRAGMENT {
                            sum += frag_a[r * FRAGMENT + i] * frag_b[i * FRAGMENT + cc];
                        }
                        acc[r * FRAGMENT + cc] = sum;
                    }
                }
            }
            for r in 0..FRAGMENT {
                for cc in 0..FRAGMENT {
                    let dst = (tile_row + r) * n + tile_col + cc;
                    d[dst] = acc[r * FRAGMENT + cc] + c[dst];
                }
            }
        }
    }
    d
}
