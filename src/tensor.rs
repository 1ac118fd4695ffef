//! GPU Tensor: Buffer-Backed Float Storage
//!
//! Data lives in VRAM. Upload once, compute many.
//! Download only when you need to read results.
//!
//! Every tensor is a row-major matrix: element (row, col) of an R×C
//! tensor lives at `row * C + col`. Vectors are stored as 1×C.

use crate::device::GpuDevice;
use crate::error::{Error, Result};

/// GPU-resident tensor (f32 storage buffer) with explicit shape
pub struct GpuTensor {
    pub(crate) buffer: wgpu::Buffer,
    rows: usize,
    cols: usize,
}

impl GpuTensor {
    /// Upload f32 data to GPU as a `rows × cols` matrix
    pub fn from_f32(device: &GpuDevice, data: &[f32], rows: usize, cols: usize) -> Result<Self> {
        check_len("from_f32", data.len(), rows, cols)?;
        let buffer = device.create_buffer_init("mlp_tensor", bytemuck::cast_slice(data));
        Ok(Self { buffer, rows, cols })
    }

    /// Create zero-filled tensor on GPU
    pub fn zeros(device: &GpuDevice, rows: usize, cols: usize) -> Self {
        let tensor = Self::output(device, rows, cols);
        let zeros = vec![0u8; tensor.buffer_size() as usize];
        device.write_buffer(&tensor.buffer, &zeros);
        tensor
    }

    /// Create output tensor (pre-allocated, uninitialized)
    pub fn output(device: &GpuDevice, rows: usize, cols: usize) -> Self {
        let size = (rows * cols * std::mem::size_of::<f32>()) as u64;
        let buffer = device.create_buffer_empty("mlp_output", size);
        Self { buffer, rows, cols }
    }

    /// Overwrite the whole tensor from host memory
    pub fn upload(&self, device: &GpuDevice, data: &[f32]) -> Result<()> {
        check_len("upload", data.len(), self.rows, self.cols)?;
        device.write_buffer(&self.buffer, bytemuck::cast_slice(data));
        Ok(())
    }

    /// Download tensor data from GPU to CPU
    pub fn download(&self, device: &GpuDevice) -> Result<Vec<f32>> {
        let bytes = device.read_buffer(&self.buffer, self.buffer_size())?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    /// Flat offset of (row, col)
    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        debug_assert!(row < self.rows && col < self.cols);
        row * self.cols + col
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// (rows, cols)
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Total number of elements
    #[inline]
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// VRAM usage in bytes
    #[inline]
    pub fn memory_bytes(&self) -> usize {
        self.len() * std::mem::size_of::<f32>()
    }

    /// Size in bytes (for buffer operations)
    #[inline]
    pub(crate) fn buffer_size(&self) -> u64 {
        self.memory_bytes() as u64
    }
}

impl std::fmt::Display for GpuTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GpuTensor[{}x{}, {} bytes VRAM]",
            self.rows,
            self.cols,
            self.memory_bytes(),
        )
    }
}

/// Class labels for one batch (u32 storage buffer)
pub struct GpuLabels {
    pub(crate) buffer: wgpu::Buffer,
    len: usize,
}

impl GpuLabels {
    /// Allocate room for `len` labels
    pub fn new(device: &GpuDevice, len: usize) -> Self {
        let size = (len * std::mem::size_of::<u32>()) as u64;
        let buffer = device.create_buffer_empty("mlp_labels", size);
        Self { buffer, len }
    }

    /// Overwrite all labels. Labels are validated when the dataset is built.
    pub fn upload(&self, device: &GpuDevice, labels: &[u32]) -> Result<()> {
        if labels.len() != self.len {
            return Err(Error::Shape(format!(
                "labels upload: got {} labels, buffer holds {}",
                labels.len(),
                self.len
            )));
        }
        device.write_buffer(&self.buffer, bytemuck::cast_slice(labels));
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn check_len(op: &str, len: usize, rows: usize, cols: usize) -> Result<()> {
    if len != rows * cols {
        return Err(Error::Shape(format!(
            "{op}: {len} elements do not fill a {rows}x{cols} tensor"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_len() {
        assert!(check_len("t", 6, 2, 3).is_ok());
        assert!(matches!(check_len("t", 5, 2, 3), Err(Error::Shape(_))));
    }

    #[test]
    fn test_roundtrip_and_index() {
        let device = match GpuDevice::new() {
            Ok(d) => d,
            Err(_) => return, // No GPU
        };

        let t = GpuTensor::from_f32(&device, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3).unwrap();
        assert_eq!(t.shape(), (2, 3));
        assert_eq!(t.index(1, 2), 5);

        let data = t.download(&device).unwrap();
        assert_eq!(data[t.index(1, 0)], 4.0);

        t.upload(&device, &[0.0; 6]).unwrap();
        assert!(t.download(&device).unwrap().iter().all(|&x| x == 0.0));
        assert!(t.upload(&device, &[0.0; 5]).is_err());
    }

    #[test]
    fn test_zeros() {
        let device = match GpuDevice::new() {
            Ok(d) => d,
            Err(_) => return,
        };

        let t = GpuTensor::zeros(&device, 4, 8);
        assert_eq!(t.memory_bytes(), 128);
        assert!(t.download(&device).unwrap().iter().all(|&x| x == 0.0));
    }
}
