//! WGSL Compute Shaders: The MLP Kernel Library
//!
//! Every kernel is a pure map over its output index space: one
//! invocation owns one output element (or one row for softmax), so
//! writes are disjoint and no kernel synchronizes beyond its dispatch.
//!
//! Layout is row-major everywhere: element (row, col) of an R×C matrix
//! lives at `row * C + col`. `reference.rs` holds the host twin of each
//! formula below.

use crate::error::{Error, Result};

/// Invocations per workgroup for the flat elementwise kernels
pub const LINEAR_WORKGROUP: u32 = 256;

/// Workgroup edge for the 2D GEMM kernels (16×16 invocations)
pub const GEMM_TILE: u32 = 16;

/// Floor applied to probabilities by softmax and the loss
pub const PROB_FLOOR: f32 = 1e-7;

/// GEMM shape (must match WGSL struct layout exactly)
///
/// Meaning of `m`, `n`, `k` per variant:
/// - NN: A m×n, B n×k, C m×k
/// - NT: A m×n, B k×n, C m×k
/// - TN: A m×n, B m×k, C n×k
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GemmParams {
    pub m: u32,
    pub n: u32,
    pub k: u32,
    pub _pad: u32,
}

/// Elementwise / row-wise kernel params (matches WGSL struct)
///
/// `rows * cols` is the flat length. `scale` is the learning rate for
/// `SGD_UPDATE_SHADER` and `1 / batch` for `SOFTMAX_XENT_GRAD_SHADER`.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ElemParams {
    pub rows: u32,
    pub cols: u32,
    pub scale: f32,
    pub _pad: u32,
}

impl ElemParams {
    /// Fails when `rows * cols` does not fit the shaders' u32 indexing.
    pub fn new(rows: usize, cols: usize, scale: f32) -> Result<Self> {
        index_span("elementwise", &[(rows, cols)])?;
        Ok(Self {
            rows: u32::try_from(rows).map_err(|_| overflow("elementwise", rows, cols))?,
            cols: u32::try_from(cols).map_err(|_| overflow("elementwise", rows, cols))?,
            scale,
            _pad: 0,
        })
    }
}

impl GemmParams {
    /// Every operand extent (m×n, n×k, m×k) must be addressable in u32,
    /// and each dimension must fit the dispatch grid.
    pub fn new(m: usize, n: usize, k: usize) -> Result<Self> {
        index_span("gemm", &[(m, n), (n, k), (m, k)])?;
        if let Some(&dim) = [m, n, k].iter().find(|&&d| d > MAX_GEMM_EXTENT) {
            return Err(Error::Shape(format!(
                "gemm: dimension {dim} exceeds the dispatch limit {MAX_GEMM_EXTENT}"
            )));
        }
        let dim = |v: usize| u32::try_from(v).map_err(|_| overflow("gemm", v, 1));
        Ok(Self {
            m: dim(m)?,
            n: dim(n)?,
            k: dim(k)?,
            _pad: 0,
        })
    }
}

/// Largest element count a kernel may address; shaders index in u32.
pub const MAX_KERNEL_ELEMENTS: usize = u32::MAX as usize;

/// Default per-dimension workgroup limit of wgpu
pub const MAX_WORKGROUPS_PER_DIM: u32 = 65_535;

/// Largest GEMM row or column count a 2D dispatch can cover
pub const MAX_GEMM_EXTENT: usize = MAX_WORKGROUPS_PER_DIM as usize * GEMM_TILE as usize;

fn index_span(what: &str, extents: &[(usize, usize)]) -> Result<()> {
    for &(rows, cols) in extents {
        match rows.checked_mul(cols) {
            Some(len) if len <= MAX_KERNEL_ELEMENTS => {}
            _ => return Err(overflow(what, rows, cols)),
        }
    }
    Ok(())
}

fn overflow(what: &str, rows: usize, cols: usize) -> Error {
    Error::Shape(format!(
        "{what}: {rows}x{cols} exceeds the u32 index range of the kernels"
    ))
}

/// GEMM A·B: one invocation per output element
///
/// Dispatch: (ceil(k/16), ceil(m/16), 1)
pub const GEMM_NN_SHADER: &str = r#"
struct Params {
    m: u32,
    n: u32,
    k: u32,
    _pad: u32,
}

@group(0) @binding(0) var<storage, read> a: array<f32>;
@group(0) @binding(1) var<storage, read> b: array<f32>;
@group(0) @binding(2) var<storage, read_write> c: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let col = gid.x;
    let row = gid.y;
    if (row >= params.m || col >= params.k) {
        return;
    }

    var acc: f32 = 0.0;
    for (var i: u32 = 0u; i < params.n; i = i + 1u) {
        acc = acc + a[row * params.n + i] * b[i * params.k + col];
    }
    c[row * params.k + col] = acc;
}
"#;

/// GEMM A·Bᵗ: B is stored k×n, read along its rows
///
/// Dispatch: (ceil(k/16), ceil(m/16), 1)
pub const GEMM_NT_SHADER: &str = r#"
struct Params {
    m: u32,
    n: u32,
    k: u32,
    _pad: u32,
}

@group(0) @binding(0) var<storage, read> a: array<f32>;
@group(0) @binding(1) var<storage, read> b: array<f32>;
@group(0) @binding(2) var<storage, read_write> c: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let col = gid.x;
    let row = gid.y;
    if (row >= params.m || col >= params.k) {
        return;
    }

    var acc: f32 = 0.0;
    for (var i: u32 = 0u; i < params.n; i = i + 1u) {
        acc = acc + a[row * params.n + i] * b[col * params.n + i];
    }
    c[row * params.k + col] = acc;
}
"#;

/// GEMM Aᵗ·B: contraction runs over the m rows shared by A and B
///
/// Dispatch: (ceil(k/16), ceil(n/16), 1)
pub const GEMM_TN_SHADER: &str = r#"
struct Params {
    m: u32,
    n: u32,
    k: u32,
    _pad: u32,
}

@group(0) @binding(0) var<storage, read> a: array<f32>;
@group(0) @binding(1) var<storage, read> b: array<f32>;
@group(0) @binding(2) var<storage, read_write> c: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let col = gid.x;
    let row = gid.y;
    if (row >= params.n || col >= params.k) {
        return;
    }

    var acc: f32 = 0.0;
    for (var i: u32 = 0u; i < params.m; i = i + 1u) {
        acc = acc + a[i * params.n + row] * b[i * params.k + col];
    }
    c[row * params.k + col] = acc;
}
"#;

/// Bias broadcast-add (in place): data[r, c] += bias[c]
///
/// Flat dispatch, see `linear_groups`.
pub const BIAS_ADD_SHADER: &str = r#"
struct Params {
    rows: u32,
    cols: u32,
    scale: f32,
    _pad: u32,
}

@group(0) @binding(0) var<storage, read_write> data: array<f32>;
@group(0) @binding(1) var<storage, read> bias: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let idx = gid.y * nwg.x * 256u + gid.x;
    if (idx >= params.rows * params.cols) {
        return;
    }
    data[idx] = data[idx] + bias[idx % params.cols];
}
"#;

/// GELU, tanh approximation (in place)
///
/// The tanh argument is clamped to ±10; tanh(10) already rounds to 1.0
/// in f32, and some backends return NaN for larger arguments.
pub const GELU_SHADER: &str = r#"
struct Params {
    rows: u32,
    cols: u32,
    scale: f32,
    _pad: u32,
}

@group(0) @binding(0) var<storage, read_write> data: array<f32>;
@group(0) @binding(1) var<uniform> params: Params;

const SQRT_2_OVER_PI: f32 = 0.7978845608;
const GELU_COEF: f32 = 0.044715;

fn gelu_cdf(x: f32) -> f32 {
    let inner = clamp(SQRT_2_OVER_PI * (x + GELU_COEF * x * x * x), -10.0, 10.0);
    return 0.5 * (1.0 + tanh(inner));
}

@compute @workgroup_size(256)
fn main(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let idx = gid.y * nwg.x * 256u + gid.x;
    if (idx >= params.rows * params.cols) {
        return;
    }
    let x = data[idx];
    data[idx] = x * gelu_cdf(x);
}
"#;

/// GELU derivative: out = cdf(x) + x * pdf(x), read from pre-activations
pub const GELU_GRAD_SHADER: &str = r#"
struct Params {
    rows: u32,
    cols: u32,
    scale: f32,
    _pad: u32,
}

@group(0) @binding(0) var<storage, read> pre_act: array<f32>;
@group(0) @binding(1) var<storage, read_write> deriv: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

const SQRT_2_OVER_PI: f32 = 0.7978845608;
const GELU_COEF: f32 = 0.044715;

fn gelu_cdf(x: f32) -> f32 {
    let inner = clamp(SQRT_2_OVER_PI * (x + GELU_COEF * x * x * x), -10.0, 10.0);
    return 0.5 * (1.0 + tanh(inner));
}

@compute @workgroup_size(256)
fn main(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let idx = gid.y * nwg.x * 256u + gid.x;
    if (idx >= params.rows * params.cols) {
        return;
    }
    let x = pre_act[idx];
    let pdf = 0.5 * SQRT_2_OVER_PI * exp(-0.5 * x * x);
    deriv[idx] = gelu_cdf(x) + x * pdf;
}
"#;

/// Row softmax (in place): one workgroup per row, single invocation
///
/// max-subtract, exponentiate, normalize, then floor at 1e-7.
/// Dispatch: (rows, 1, 1)
pub const SOFTMAX_SHADER: &str = r#"
struct Params {
    rows: u32,
    cols: u32,
    scale: f32,
    _pad: u32,
}

@group(0) @binding(0) var<storage, read_write> data: array<f32>;
@group(0) @binding(1) var<uniform> params: Params;

@compute @workgroup_size(1)
fn main(@builtin(workgroup_id) wid: vec3<u32>) {
    let row = wid.x;
    if (row >= params.rows) {
        return;
    }
    let base = row * params.cols;

    var row_max: f32 = data[base];
    for (var c: u32 = 1u; c < params.cols; c = c + 1u) {
        row_max = max(row_max, data[base + c]);
    }

    var sum: f32 = 0.0;
    for (var c: u32 = 0u; c < params.cols; c = c + 1u) {
        let e = exp(data[base + c] - row_max);
        data[base + c] = e;
        sum = sum + e;
    }

    for (var c: u32 = 0u; c < params.cols; c = c + 1u) {
        data[base + c] = max(data[base + c] / sum, 1e-7);
    }
}
"#;

/// Elementwise gradient combine (in place): a[i] *= b[i]
pub const MUL_INPLACE_SHADER: &str = r#"
struct Params {
    rows: u32,
    cols: u32,
    scale: f32,
    _pad: u32,
}

@group(0) @binding(0) var<storage, read_write> a: array<f32>;
@group(0) @binding(1) var<storage, read> b: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let idx = gid.y * nwg.x * 256u + gid.x;
    if (idx >= params.rows * params.cols) {
        return;
    }
    a[idx] = a[idx] * b[idx];
}
"#;

/// Softmax + cross-entropy gradient w.r.t. logits:
/// grad[r, c] = (probs[r, c] - onehot(label[r])[c]) * scale
pub const SOFTMAX_XENT_GRAD_SHADER: &str = r#"
struct Params {
    rows: u32,
    cols: u32,
    scale: f32,
    _pad: u32,
}

@group(0) @binding(0) var<storage, read> probs: array<f32>;
@group(0) @binding(1) var<storage, read> labels: array<u32>;
@group(0) @binding(2) var<storage, read_write> grad: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let idx = gid.y * nwg.x * 256u + gid.x;
    if (idx >= params.rows * params.cols) {
        return;
    }
    let row = idx / params.cols;
    let col = idx % params.cols;
    let onehot = select(0.0, 1.0, labels[row] == col);
    grad[idx] = (probs[idx] - onehot) * params.scale;
}
"#;

/// Bias gradient: column sums over the batch, one invocation per column
pub const BIAS_GRAD_SHADER: &str = r#"
struct Params {
    rows: u32,
    cols: u32,
    scale: f32,
    _pad: u32,
}

@group(0) @binding(0) var<storage, read> grad_out: array<f32>;
@group(0) @binding(1) var<storage, read_write> grad_bias: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let col = gid.y * nwg.x * 256u + gid.x;
    if (col >= params.cols) {
        return;
    }
    var acc: f32 = 0.0;
    for (var r: u32 = 0u; r < params.rows; r = r + 1u) {
        acc = acc + grad_out[r * params.cols + col];
    }
    grad_bias[col] = acc;
}
"#;

/// SGD step (in place): param[i] -= scale * grad[i]
pub const SGD_UPDATE_SHADER: &str = r#"
struct Params {
    rows: u32,
    cols: u32,
    scale: f32,
    _pad: u32,
}

@group(0) @binding(0) var<storage, read_write> values: array<f32>;
@group(0) @binding(1) var<storage, read> grad: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let idx = gid.y * nwg.x * 256u + gid.x;
    if (idx >= params.rows * params.cols) {
        return;
    }
    values[idx] = values[idx] - params.scale * grad[idx];
}
"#;

/// Fragment-tiled mixed-precision GEMM: D = A×B + C
///
/// A (m×k) and B (k×n) are f16, packed two per u32 (element 2i in the
/// low half). C and D are f32. One workgroup owns one 16×16 output tile
/// and keeps its accumulator fragment in registers, one element per
/// invocation. Each K step loads a 16×16 fragment of A and of B into
/// workgroup memory, then every invocation multiply-accumulates its
/// element. The C fragment is added after the contraction loop.
///
/// All dimensions are multiples of 16. Dispatch: (n/16, m/16, 1)
pub const WMMA_GEMM_SHADER: &str = r#"
struct Params {
    m: u32,
    n: u32,
    k: u32,
    _pad: u32,
}

@group(0) @binding(0) var<storage, read> a: array<u32>;
@group(0) @binding(1) var<storage, read> b: array<u32>;
@group(0) @binding(2) var<storage, read> c: array<f32>;
@group(0) @binding(3) var<storage, read_write> d: array<f32>;
@group(0) @binding(4) var<uniform> params: Params;

var<workgroup> frag_a: array<f32, 256>;
var<workgroup> frag_b: array<f32, 256>;

fn half_of(word: u32, idx: u32) -> f32 {
    let pair = unpack2x16float(word);
    return select(pair.x, pair.y, (idx & 1u) == 1u);
}

@compute @workgroup_size(16, 16)
fn main(
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
) {
    let tile_row = wid.y * 16u;
    let tile_col = wid.x * 16u;
    let r = lid.y;
    let c_local = lid.x;
    let slot = r * 16u + c_local;

    var acc: f32 = 0.0;

    for (var kk: u32 = 0u; kk < params.k; kk = kk + 16u) {
        let ai = (tile_row + r) * params.k + kk + c_local;
        frag_a[slot] = half_of(a[ai / 2u], ai);
        let bi = (kk + r) * params.n + tile_col + c_local;
        frag_b[slot] = half_of(b[bi / 2u], bi);
        workgroupBarrier();

        for (var i: u32 = 0u; i < 16u; i = i + 1u) {
            acc = acc + frag_a[r * 16u + i] * frag_b[i * 16u + c_local];
        }
        workgroupBarrier();
    }

    let dst = (tile_row + r) * params.n + tile_col + c_local;
    let frag_c = c[dst];
    d[dst] = acc + frag_c;
}
"#;

/// Workgroup grid for a flat kernel over `len` elements.
///
/// Splits into (x, y) so that x stays within the per-dimension dispatch
/// limit; the shaders rebuild the flat index as `gid.y * nwg.x * 256 + gid.x`.
pub fn linear_groups(len: usize) -> (u32, u32) {
    const MAX_X: usize = MAX_WORKGROUPS_PER_DIM as usize;
    let total = len.div_ceil(LINEAR_WORKGROUP as usize).max(1);
    let x = total.min(MAX_X);
    let y = total.div_ceil(x);
    (x as u32, y as u32)
}

/// Workgroup grid for a 2D GEMM over an output of `rows × cols`
#[inline]
pub fn gemm_groups(rows: usize, cols: usize) -> (u32, u32) {
    let tile = GEMM_TILE as usize;
    (cols.div_ceil(tile) as u32, rows.div_ceil(tile) as u32)
}
