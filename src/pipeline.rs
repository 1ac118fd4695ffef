//! Compute Pipeline: Compile Once, Dispatch Many
//!
//! Pre-compiled WGSL shaders for every MLP kernel.
//! Bind groups connect GPU buffers to shader parameters.
//!
//! Each dispatch is recorded into its own encoder and submitted to the
//! device queue right away. Nothing here waits on the GPU: callers put a
//! single `poll_wait` at the end of a phase and rely on queue order for
//! read-after-write between kernels.

use crate::device::GpuDevice;
use crate::error::{Error, Result};
use crate::kernel::{
    gemm_groups, linear_groups, ElemParams, GemmParams, BIAS_ADD_SHADER, BIAS_GRAD_SHADER,
    GELU_GRAD_SHADER, GELU_SHADER, GEMM_NN_SHADER, GEMM_NT_SHADER, GEMM_TN_SHADER,
    MAX_WORKGROUPS_PER_DIM, MUL_INPLACE_SHADER, SGD_UPDATE_SHADER, SOFTMAX_SHADER,
    SOFTMAX_XENT_GRAD_SHADER,
};
use crate::tensor::{GpuLabels, GpuTensor};

/// Storage binding access, in binding order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Access {
    Read,
    ReadWrite,
}

/// A compiled shader plus the bind group layout it was built against
pub(crate) struct Kernel {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    label: &'static str,
}

impl Kernel {
    /// Compile `shader_src`. Storage bindings take slots `0..storage.len()`,
    /// the uniform params buffer takes the next slot.
    pub(crate) fn new(
        device: &GpuDevice,
        shader_src: &str,
        label: &'static str,
        storage: &[Access],
    ) -> Self {
        let shader = device
            .device()
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(shader_src.into()),
            });

        let mut entries: Vec<wgpu::BindGroupLayoutEntry> = storage
            .iter()
            .enumerate()
            .map(|(binding, access)| wgpu::BindGroupLayoutEntry {
                binding: binding as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage {
                        read_only: *access == Access::Read,
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: storage.len() as u32,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });

        let layout =
            device
                .device()
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&format!("{label}_layout")),
                    entries: &entries,
                });

        let pipeline_layout =
            device
                .device()
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(&format!("{label}_pipeline_layout")),
                    bind_group_layouts: &[&layout],
                    push_constant_ranges: &[],
                });

        let pipeline =
            device
                .device()
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(&format!("{label}_pipeline")),
                    layout: Some(&pipeline_layout),
                    module: &shader,
                    entry_point: Some("main"),
                    compilation_options: Default::default(),
                    cache: None,
                });

        log::debug!("compiled {label} pipeline");

        Self {
            pipeline,
            layout,
            label,
        }
    }

    /// Bind `buffers` (storage slots in order) plus a fresh uniform holding
    /// `params`, then record and submit one dispatch of `groups`.
    pub(crate) fn dispatch(
        &self,
        device: &GpuDevice,
        buffers: &[&wgpu::Buffer],
        params: &[u8],
        groups: (u32, u32, u32),
        timestamp_writes: Option<wgpu::ComputePassTimestampWrites<'_>>,
    ) {
        let params_buffer = device.create_uniform_buffer(self.label, params);

        let mut entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: buffers.len() as u32,
            resource: params_buffer.as_entire_binding(),
        });

        let bind_group = device.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.label),
            layout: &self.layout,
            entries: &entries,
        });

        let mut encoder = device.encoder(self.label);
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(self.label),
                timestamp_writes,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups.0, groups.1, groups.2);
        }

        device.submit(encoder);
    }
}

/// Pre-compiled compute pipelines for all MLP operations
pub struct MlpCompute {
    gemm_nn: Kernel,
    gemm_nt: Kernel,
    gemm_tn: Kernel,
    bias_add: Kernel,
    gelu: Kernel,
    gelu_grad: Kernel,
    softmax: Kernel,
    mul_inplace: Kernel,
    softmax_xent_grad: Kernel,
    bias_grad: Kernel,
    sgd_update: Kernel,
}

impl MlpCompute {
    /// Compile all shaders and create pipelines
    pub fn new(device: &GpuDevice) -> Self {
        use Access::{Read, ReadWrite};

        let two_in = [Read, Read, ReadWrite];
        let in_place = [ReadWrite];
        let in_place_with = [ReadWrite, Read];
        let read_into = [Read, ReadWrite];

        Self {
            gemm_nn: Kernel::new(device, GEMM_NN_SHADER, "gemm_nn", &two_in),
            gemm_nt: Kernel::new(device, GEMM_NT_SHADER, "gemm_nt", &two_in),
            gemm_tn: Kernel::new(device, GEMM_TN_SHADER, "gemm_tn", &two_in),
            bias_add: Kernel::new(device, BIAS_ADD_SHADER, "bias_add", &in_place_with),
            gelu: Kernel::new(device, GELU_SHADER, "gelu", &in_place),
            gelu_grad: Kernel::new(device, GELU_GRAD_SHADER, "gelu_grad", &read_into),
            softmax: Kernel::new(device, SOFTMAX_SHADER, "softmax", &in_place),
            mul_inplace: Kernel::new(device, MUL_INPLACE_SHADER, "mul_inplace", &in_place_with),
            softmax_xent_grad: Kernel::new(
                device,
                SOFTMAX_XENT_GRAD_SHADER,
                "softmax_xent_grad",
                &two_in,
            ),
            bias_grad: Kernel::new(device, BIAS_GRAD_SHADER, "bias_grad", &read_into),
            sgd_update: Kernel::new(device, SGD_UPDATE_SHADER, "sgd_update", &in_place_with),
        }
    }

    /// C = A·B, A m×n, B n×k, C m×k. Overwrites C.
    pub fn gemm_nn(
        &self,
        device: &GpuDevice,
        a: &GpuTensor,
        b: &GpuTensor,
        c: &GpuTensor,
    ) -> Result<()> {
        let (m, n) = a.shape();
        let k = b.cols();
        expect_shape("gemm_nn B", b, (n, k))?;
        expect_shape("gemm_nn C", c, (m, k))?;

        let (gx, gy) = gemm_groups(m, k);
        self.gemm_nn.dispatch(
            device,
            &[&a.buffer, &b.buffer, &c.buffer],
            bytemuck::bytes_of(&GemmParams::new(m, n, k)?),
            (gx, gy, 1),
            None,
        );
        Ok(())
    }

    /// C = A·Bᵗ, A m×n, B k×n, C m×k. Overwrites C.
    pub fn gemm_nt(
        &self,
        device: &GpuDevice,
        a: &GpuTensor,
        b: &GpuTensor,
        c: &GpuTensor,
    ) -> Result<()> {
        let (m, n) = a.shape();
        let k = b.rows();
        expect_shape("gemm_nt B", b, (k, n))?;
        expect_shape("gemm_nt C", c, (m, k))?;

        let (gx, gy) = gemm_groups(m, k);
        self.gemm_nt.dispatch(
            device,
            &[&a.buffer, &b.buffer, &c.buffer],
            bytemuck::bytes_of(&GemmParams::new(m, n, k)?),
            (gx, gy, 1),
            None,
        );
        Ok(())
    }

    /// C = Aᵗ·B, A m×n, B m×k, C n×k. Overwrites C.
    pub fn gemm_tn(
        &self,
        device: &GpuDevice,
        a: &GpuTensor,
        b: &GpuTensor,
        c: &GpuTensor,
    ) -> Result<()> {
        let (m, n) = a.shape();
        let k = b.cols();
        expect_shape("gemm_tn B", b, (m, k))?;
        expect_shape("gemm_tn C", c, (n, k))?;

        let (gx, gy) = gemm_groups(n, k);
        self.gemm_tn.dispatch(
            device,
            &[&a.buffer, &b.buffer, &c.buffer],
            bytemuck::bytes_of(&GemmParams::new(m, n, k)?),
            (gx, gy, 1),
            None,
        );
        Ok(())
    }

    /// x[r, c] += bias[c] (in-place)
    pub fn bias_add_inplace(
        &self,
        device: &GpuDevice,
        x: &GpuTensor,
        bias: &GpuTensor,
    ) -> Result<()> {
        expect_shape("bias_add bias", bias, (1, x.cols()))?;
        self.dispatch_linear(
            &self.bias_add,
            device,
            &[&x.buffer, &bias.buffer],
            ElemParams::new(x.rows(), x.cols(), 0.0)?,
        );
        Ok(())
    }

    /// GELU activation (in-place)
    pub fn gelu_inplace(&self, device: &GpuDevice, x: &GpuTensor) -> Result<()> {
        self.dispatch_linear(
            &self.gelu,
            device,
            &[&x.buffer],
            ElemParams::new(x.rows(), x.cols(), 0.0)?,
        );
        Ok(())
    }

    /// deriv = GELU'(pre_act). Reads pre-activations only.
    pub fn gelu_grad(
        &self,
        device: &GpuDevice,
        pre_act: &GpuTensor,
        deriv: &GpuTensor,
    ) -> Result<()> {
        expect_shape("gelu_grad output", deriv, pre_act.shape())?;
        self.dispatch_linear(
            &self.gelu_grad,
            device,
            &[&pre_act.buffer, &deriv.buffer],
            ElemParams::new(pre_act.rows(), pre_act.cols(), 0.0)?,
        );
        Ok(())
    }

    /// Row-wise numerically stable softmax (in-place)
    pub fn softmax_inplace(&self, device: &GpuDevice, x: &GpuTensor) -> Result<()> {
        let params = ElemParams::new(x.rows(), x.cols(), 0.0)?;
        if params.rows > MAX_WORKGROUPS_PER_DIM {
            return Err(Error::Shape(format!(
                "softmax: {} rows exceed one workgroup per row",
                x.rows()
            )));
        }
        self.softmax.dispatch(
            device,
            &[&x.buffer],
            bytemuck::bytes_of(&params),
            (params.rows, 1, 1),
            None,
        );
        Ok(())
    }

    /// a[i] *= b[i] (in-place, chain rule combine)
    pub fn mul_inplace(&self, device: &GpuDevice, a: &GpuTensor, b: &GpuTensor) -> Result<()> {
        expect_shape("mul_inplace rhs", b, a.shape())?;
        self.dispatch_linear(
            &self.mul_inplace,
            device,
            &[&a.buffer, &b.buffer],
            ElemParams::new(a.rows(), a.cols(), 0.0)?,
        );
        Ok(())
    }

    /// grad = (probs - onehot(labels)) / batch
    pub fn softmax_xent_grad(
        &self,
        device: &GpuDevice,
        probs: &GpuTensor,
        labels: &GpuLabels,
        grad: &GpuTensor,
    ) -> Result<()> {
        if labels.len() != probs.rows() {
            return Err(Error::Shape(format!(
                "softmax_xent_grad: {} labels for {} rows",
                labels.len(),
                probs.rows()
            )));
        }
        expect_shape("softmax_xent_grad output", grad, probs.shape())?;
        self.dispatch_linear(
            &self.softmax_xent_grad,
            device,
            &[&probs.buffer, &labels.buffer, &grad.buffer],
            ElemParams::new(probs.rows(), probs.cols(), 1.0 / probs.rows() as f32)?,
        );
        Ok(())
    }

    /// grad_bias[c] = Σ_r grad_out[r, c]. Overwrites grad_bias.
    pub fn bias_grad(
        &self,
        device: &GpuDevice,
        grad_out: &GpuTensor,
        grad_bias: &GpuTensor,
    ) -> Result<()> {
        expect_shape("bias_grad output", grad_bias, (1, grad_out.cols()))?;
        let params = ElemParams::new(grad_out.rows(), grad_out.cols(), 0.0)?;
        let (gx, gy) = linear_groups(grad_out.cols());
        self.bias_grad.dispatch(
            device,
            &[&grad_out.buffer, &grad_bias.buffer],
            bytemuck::bytes_of(&params),
            (gx, gy, 1),
            None,
        );
        Ok(())
    }

    /// param -= learning_rate * grad (in-place)
    pub fn sgd_update(
        &self,
        device: &GpuDevice,
        param: &GpuTensor,
        grad: &GpuTensor,
        learning_rate: f32,
    ) -> Result<()> {
        expect_shape("sgd_update grad", grad, param.shape())?;
        self.dispatch_linear(
            &self.sgd_update,
            device,
            &[&param.buffer, &grad.buffer],
            ElemParams::new(param.rows(), param.cols(), learning_rate)?,
        );
        Ok(())
    }

    fn dispatch_linear(
        &self,
        kernel: &Kernel,
        device: &GpuDevice,
        buffers: &[&wgpu::Buffer],
        params: ElemParams,
    ) {
        let (gx, gy) = linear_groups(params.rows as usize * params.cols as usize);
        kernel.dispatch(device, buffers, bytemuck::bytes_of(&params), (gx, gy, 1), None);
    }
}

impl std::fmt::Display for MlpCompute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MlpCompute[11 pipelines: gemm_nn, gemm_nt, gemm_tn, bias_add, gelu, gelu_grad, \
             softmax, mul_inplace, softmax_xent_grad, bias_grad, sgd_update]"
        )
    }
}

fn expect_shape(what: &str, t: &GpuTensor, shape: (usize, usize)) -> Result<()> {
    if t.shape() != shape {
        return Err(Error::Shape(format!(
            "{what}: expected {}x{}, got {}x{}",
            shape.0,
            shape.1,
            t.rows(),
            t.cols()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference;

    fn assert_close(got: &[f32], want: &[f32], tol: f32) {
        assert_eq!(got.len(), want.len());
        for (i, (g, w)) in got.iter().zip(want).enumerate() {
            assert!((g - w).abs() <= tol, "index {i}: got {g}, want {w}");
        }
    }

    fn ramp(len: usize, scale: f32) -> Vec<f32> {
        (0..len).map(|i| ((i * 7 % 13) as f32 - 6.0) * scale).collect()
    }

    #[test]
    fn test_gemm_variants_match_reference() {
        let device = match GpuDevice::new() {
            Ok(d) => d,
            Err(_) => return, // No GPU
        };
        let compute = MlpCompute::new(&device);

        let (m, n, k) = (5, 7, 19);
        let a = ramp(m * n, 0.25);
        let b = ramp(n * k, 0.5);
        let bt = ramp(k * n, 0.5);
        let at_src = ramp(m * k, 0.125);

        let ga = GpuTensor::from_f32(&device, &a, m, n).unwrap();

        // NN
        let gb = GpuTensor::from_f32(&device, &b, n, k).unwrap();
        let gc = GpuTensor::output(&device, m, k);
        compute.gemm_nn(&device, &ga, &gb, &gc).unwrap();
        let mut want = vec![0.0; m * k];
        reference::gemm_nn(&a, &b, &mut want, m, n, k);
        assert_close(&gc.download(&device).unwrap(), &want, 1e-4);

        // NT
        let gbt = GpuTensor::from_f32(&device, &bt, k, n).unwrap();
        compute.gemm_nt(&device, &ga, &gbt, &gc).unwrap();
        reference::gemm_nt(&a, &bt, &mut want, m, n, k);
        assert_close(&gc.download(&device).unwrap(), &want, 1e-4);

        // TN: A m×n, B m×k -> n×k
        let gat = GpuTensor::from_f32(&device, &at_src, m, k).unwrap();
        let gtn = GpuTensor::output(&device, n, k);
        compute.gemm_tn(&device, &ga, &gat, &gtn).unwrap();
        let mut want_tn = vec![0.0; n * k];
        reference::gemm_tn(&a, &at_src, &mut want_tn, m, n, k);
        assert_close(&gtn.download(&device).unwrap(), &want_tn, 1e-4);
    }

    #[test]
    fn test_gemm_rejects_bad_shapes() {
        let device = match GpuDevice::new() {
            Ok(d) => d,
            Err(_) => return,
        };
        let compute = MlpCompute::new(&device);

        let a = GpuTensor::zeros(&device, 2, 3);
        let b = GpuTensor::zeros(&device, 4, 5);
        let c = GpuTensor::output(&device, 2, 5);
        assert!(matches!(
            compute.gemm_nn(&device, &a, &b, &c),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn test_bias_add_on_zero_rows() {
        let device = match GpuDevice::new() {
            Ok(d) => d,
            Err(_) => return,
        };
        let compute = MlpCompute::new(&device);

        let rows = 4;
        let bias: Vec<f32> = (1..=6).map(|v| v as f32).collect();
        let x = GpuTensor::zeros(&device, rows, bias.len());
        let gbias = GpuTensor::from_f32(&device, &bias, 1, bias.len()).unwrap();

        compute.bias_add_inplace(&device, &x, &gbias).unwrap();
        let result = x.download(&device).unwrap();
        for row in result.chunks(bias.len()) {
            assert_eq!(row, bias.as_slice());
        }
    }

    #[test]
    fn test_gelu_and_grad_match_reference() {
        let device = match GpuDevice::new() {
            Ok(d) => d,
            Err(_) => return,
        };
        let compute = MlpCompute::new(&device);

        let data = vec![-20.0, -3.0, -1.0, -0.1, 0.0, 0.1, 1.0, 3.0, 20.0];
        let x = GpuTensor::from_f32(&device, &data, 1, data.len()).unwrap();
        let deriv = GpuTensor::output(&device, 1, data.len());

        compute.gelu_grad(&device, &x, &deriv).unwrap();
        compute.gelu_inplace(&device, &x).unwrap();

        let want_act: Vec<f32> = data.iter().map(|&v| reference::gelu(v)).collect();
        let want_grad: Vec<f32> = data.iter().map(|&v| reference::gelu_grad(v)).collect();
        assert_close(&x.download(&device).unwrap(), &want_act, 1e-5);
        assert_close(&deriv.download(&device).unwrap(), &want_grad, 1e-5);
    }

    #[test]
    fn test_softmax_rows() {
        let device = match GpuDevice::new() {
            Ok(d) => d,
            Err(_) => return,
        };
        let compute = MlpCompute::new(&device);

        let logits = vec![
            1.0, 2.0, 3.0, 4.0, //
            1000.0, 1000.0, 1000.0, 1000.0, //
            -50.0, 0.0, 50.0, 0.0,
        ];
        let x = GpuTensor::from_f32(&device, &logits, 3, 4).unwrap();
        compute.softmax_inplace(&device, &x).unwrap();
        let probs = x.download(&device).unwrap();

        for row in probs.chunks(4) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4, "sum = {sum}");
            assert!(row.iter().all(|&p| p >= 1e-7));
        }
        assert!((probs[4] - 0.25).abs() < 1e-6);

        let mut want = logits.clone();
        reference::softmax_rows(&mut want, 4);
        assert_close(&probs, &want, 1e-6);
    }

    #[test]
    fn test_backward_helpers() {
        let device = match GpuDevice::new() {
            Ok(d) => d,
            Err(_) => return,
        };
        let compute = MlpCompute::new(&device);

        let probs = vec![0.7, 0.2, 0.1, 0.1, 0.1, 0.8];
        let labels = [0u32, 2];
        let gp = GpuTensor::from_f32(&device, &probs, 2, 3).unwrap();
        let gl = GpuLabels::new(&device, 2);
        gl.upload(&device, &labels).unwrap();
        let gd = GpuTensor::output(&device, 2, 3);

        compute.softmax_xent_grad(&device, &gp, &gl, &gd).unwrap();
        let mut want = vec![0.0; 6];
        reference::softmax_xent_grad(&probs, &labels, &mut want, 3);
        assert_close(&gd.download(&device).unwrap(), &want, 1e-6);

        let gb = GpuTensor::output(&device, 1, 3);
        compute.bias_grad(&device, &gd, &gb).unwrap();
        let mut want_b = vec![0.0; 3];
        reference::bias_grad(&want, &mut want_b, 3);
        assert_close(&gb.download(&device).unwrap(), &want_b, 1e-6);

        let param = GpuTensor::from_f32(&device, &[1.0, 1.0, 1.0], 1, 3).unwrap();
        compute.sgd_update(&device, &param, &gb, 0.5).unwrap();
        let mut want_p = vec![1.0, 1.0, 1.0];
        reference::sgd_update(&mut want_p, &want_b, 0.5);
        assert_close(&param.download(&device).unwrap(), &want_p, 1e-6);

        let a = GpuTensor::from_f32(&device, &[1.0, 2.0, 3.0], 1, 3).unwrap();
        let b = GpuTensor::from_f32(&device, &[4.0, 0.5, -1.0], 1, 3).unwrap();
        compute.mul_inplace(&device, &a, &b).unwrap();
        assert_close(&a.download(&device).unwrap(), &[4.0, 1.0, -3.0], 0.0);
    }
}
