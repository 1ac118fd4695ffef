//! Host Reference Kernels
//!
//! Plain-Rust twins of the WGSL kernels in `kernel.rs`, same formulas,
//! same row-major layout. They back the host-side loss, serve as the
//! oracle for GPU tests, and run anywhere (no adapter required).

use crate::config::MlpConfig;
use crate::kernel::PROB_FLOOR;
use crate::params::HostParams;

const SQRT_2_OVER_PI: f32 = 0.797_884_6;
const GELU_COEF: f32 = 0.044715;

/// C = A·B, A m×n, B n×k, C m×k
pub fn gemm_nn(a: &[f32], b: &[f32], c: &mut [f32], m: usize, n: usize, k: usize) {
    debug_assert_eq!(a.len(), m * n);
    debug_assert_eq!(b.len(), n * k);
    debug_assert_eq!(c.len(), m * k);
    for r in 0..m {
        for col in 0..k {
            let mut acc = 0.0f32;
            for i in 0..n {
                acc += a[r * n + i] * b[i * k + col];
            }
            c[r * k + col] = acc;
        }
    }
}

/// C = A·Bᵗ, A m×n, B k×n, C m×k
pub fn gemm_nt(a: &[f32], b: &[f32], c: &mut [f32], m: usize, n: usize, k: usize) {
    debug_assert_eq!(a.len(), m * n);
    debug_assert_eq!(b.len(), k * n);
    debug_assert_eq!(c.len(), m * k);
    for r in 0..m {
        for col in 0..k {
            let mut acc = 0.0f32;
            for i in 0..n {
                acc += a[r * n + i] * b[col * n + i];
            }
            c[r * k + col] = acc;
        }
    }
}

/// C = Aᵗ·B, A m×n, B m×k, C n×k
pub fn gemm_tn(a: &[f32], b: &[f32], c: &mut [f32], m: usize, n: usize, k: usize) {
    debug_assert_eq!(a.len(), m * n);
    debug_assert_eq!(b.len(), m * k);
    debug_assert_eq!(c.len(), n * k);
    for r in 0..n {
        for col in 0..k {
            let mut acc = 0.0f32;
            for i in 0..m {
                acc += a[i * n + r] * b[i * k + col];
            }
            c[r * k + col] = acc;
        }
    }
}

/// x[r, c] += bias[c]
pub fn bias_add(x: &mut [f32], bias: &[f32]) {
    for row in x.chunks_mut(bias.len()) {
        for (v, b) in row.iter_mut().zip(bias) {
            *v += b;
        }
    }
}

#[inline]
fn gelu_cdf(x: f32) -> f32 {
    0.5 * (1.0 + (SQRT_2_OVER_PI * (x + GELU_COEF * x * x * x)).tanh())
}

/// GELU, tanh approximation
#[inline]
pub fn gelu(x: f32) -> f32 {
    x * gelu_cdf(x)
}

/// d/dx GELU evaluated at the pre-activation `x`
#[inline]
pub fn gelu_grad(x: f32) -> f32 {
    let pdf = 0.5 * SQRT_2_OVER_PI * (-0.5 * x * x).exp();
    gelu_cdf(x) + x * pdf
}

pub fn gelu_inplace(x: &mut [f32]) {
    for v in x.iter_mut() {
        *v = gelu(*v);
    }
}

/// Row softmax with max subtraction and the 1e-7 floor
pub fn softmax_rows(x: &mut [f32], cols: usize) {
    for row in x.chunks_mut(cols) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0f32;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        for v in row.iter_mut() {
            *v = (*v / sum).max(PROB_FLOOR);
        }
    }
}

/// a[i] *= b[i]
pub fn mul_inplace(a: &mut [f32], b: &[f32]) {
    for (x, y) in a.iter_mut().zip(b) {
        *x *= y;
    }
}

/// grad[r, c] = (probs[r, c] - onehot(labels[r])[c]) / rows
pub fn softmax_xent_grad(probs: &[f32], labels: &[u32], grad: &mut [f32], cols: usize) {
    let scale = 1.0 / labels.len() as f32;
    for (r, &label) in labels.iter().enumerate() {
        for c in 0..cols {
            let idx = r * cols + c;
            let onehot = if label as usize == c { 1.0 } else { 0.0 };
            grad[idx] = (probs[idx] - onehot) * scale;
        }
    }
}

/// grad_bias[c] = Σ_r grad_out[r, c]
pub fn bias_grad(grad_out: &[f32], grad_bias: &mut [f32], cols: usize) {
    grad_bias.iter_mut().for_each(|g| *g = 0.0);
    for row in grad_out.chunks(cols) {
        for (g, v) in grad_bias.iter_mut().zip(row) {
            *g += v;
        }
    }
}

/// param -= lr * grad
pub fn sgd_update(param: &mut [f32], grad: &[f32], learning_rate: f32) {
    for (p, g) in param.iter_mut().zip(grad) {
        *p -= learning_rate * g;
    }
}

/// Activations of one forward pass, kept for backward
#[derive(Debug, Clone)]
pub struct Activations {
    pub hidden_pre: Vec<f32>,
    pub hidden: Vec<f32>,
    pub probs: Vec<f32>,
}

/// Host forward pass, same kernel sequence as the GPU pipeline
pub fn forward(cfg: &MlpConfig, params: &HostParams, input: &[f32], batch: usize) -> Activations {
    let (i, h, o) = (cfg.input_size, cfg.hidden_size, cfg.output_size);

    let mut hidden_pre = vec![0.0; batch * h];
    gemm_nn(input, &params.w1, &mut hidden_pre, batch, i, h);
    bias_add(&mut hidden_pre, &params.b1);

    let mut hidden = hidden_pre.clone();
    gelu_inplace(&mut hidden);

    let mut probs = vec![0.0; batch * o];
    gemm_nn(&hidden, &params.w2, &mut probs, batch, h, o);
    bias_add(&mut probs, &params.b2);
    softmax_rows(&mut probs, o);

    Activations {
        hidden_pre,
        hidden,
        probs,
    }
}

/// Host backward pass: gradients of the mean cross-entropy
pub fn backward(
    cfg: &MlpConfig,
    params: &HostParams,
    input: &[f32],
    labels: &[u32],
    acts: &Activations,
) -> HostParams {
    let (i, h, o) = (cfg.input_size, cfg.hidden_size, cfg.output_size);
    let batch = labels.len();
    let mut grads = HostParams::zeros(cfg);

    let mut d_out = vec![0.0; batch * o];
    softmax_xent_grad(&acts.probs, labels, &mut d_out, o);

    gemm_tn(&acts.hidden, &d_out, &mut grads.w2, batch, h, o);
    bias_grad(&d_out, &mut grads.b2, o);

    let mut d_hidden = vec![0.0; batch * h];
    gemm_nt(&d_out, &params.w2, &mut d_hidden, batch, o, h);
    let d_act: Vec<f32> = acts.hidden_pre.iter().map(|&x| gelu_grad(x)).collect();
    mul_inplace(&mut d_hidden, &d_act);

    gemm_tn(input, &d_hidden, &mut grads.w1, batch, i, h);
    bias_grad(&d_hidden, &mut grads.b1, h);

    grads
}
