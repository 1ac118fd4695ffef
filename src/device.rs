//! GPU Device Management
//!
//! Wraps wgpu initialization into a single struct.
//! Requests high-performance adapter by default.
//!
//! All kernels go through the one [`wgpu::Queue`] held here. Work
//! submitted to it executes in submission order, so a kernel always
//! observes the writes of every kernel submitted before it. The host
//! only blocks in [`GpuDevice::poll_wait`] and [`GpuDevice::read_buffer`].

use crate::error::{Error, Result};

/// GPU device handle for all ALICE-MLP operations
///
/// Holds the wgpu Device and Queue. All GPU buffers and pipelines
/// are created through this handle.
pub struct GpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: String,
    timestamps: bool,
}

impl GpuDevice {
    /// Initialize GPU with high-performance adapter
    ///
    /// # Errors
    /// [`Error::NoAdapter`] if no GPU adapter is available.
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::new_async())
    }

    /// Async initialization (for custom runtimes)
    pub async fn new_async() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(Error::NoAdapter)?;

        let adapter_info = adapter.get_info();
        let info = format!(
            "{} ({:?}, {:?})",
            adapter_info.name, adapter_info.backend, adapter_info.device_type
        );

        // Timestamp queries are optional; the benchmark falls back to host timing.
        let required_features = adapter.features() & wgpu::Features::TIMESTAMP_QUERY;
        let timestamps = required_features.contains(wgpu::Features::TIMESTAMP_QUERY);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("ALICE-MLP"),
                    required_features,
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| Error::DeviceRequest(e.to_string()))?;

        log::debug!("selected adapter {info}, timestamps = {timestamps}");

        Ok(Self {
            device,
            queue,
            info,
            timestamps,
        })
    }

    /// Get wgpu device reference
    #[inline]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Get wgpu queue reference
    #[inline]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// GPU adapter info string
    #[inline]
    pub fn info(&self) -> &str {
        &self.info
    }

    /// Whether compute passes can carry timestamp writes
    #[inline]
    pub fn supports_timestamps(&self) -> bool {
        self.timestamps
    }

    /// Fail with [`Error::InvalidConfig`] when a storage binding of
    /// `bytes` would exceed the device limits.
    pub fn check_storage_size(&self, name: &str, bytes: u64) -> Result<()> {
        let limits = self.device.limits();
        let max = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
        if bytes > max {
            return Err(Error::InvalidConfig(format!(
                "{name} needs {bytes} bytes, device binding limit is {max}"
            )));
        }
        Ok(())
    }

    /// Create a storage buffer with initial data
    pub fn create_buffer_init(&self, label: &str, data: &[u8]) -> wgpu::Buffer {
        use wgpu::util::DeviceExt;
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: data,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
        })
    }

    /// Create a uniform buffer with initial data
    pub fn create_uniform_buffer(&self, label: &str, data: &[u8]) -> wgpu::Buffer {
        use wgpu::util::DeviceExt;
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: data,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        })
    }

    /// Create an empty storage buffer
    pub fn create_buffer_empty(&self, label: &str, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Overwrite the start of a buffer. Ordered after all prior submissions.
    pub fn write_buffer(&self, buffer: &wgpu::Buffer, data: &[u8]) {
        self.queue.write_buffer(buffer, 0, data);
    }

    /// Device-side copy of `size` bytes from `src` to `dst`
    pub fn copy_buffer(&self, src: &wgpu::Buffer, dst: &wgpu::Buffer, size: u64) {
        let mut encoder = self.encoder("copy_enc");
        encoder.copy_buffer_to_buffer(src, 0, dst, 0, size);
        self.submit(encoder);
    }

    /// Create a labelled command encoder
    pub fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    /// Submit a command encoder
    pub fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit([encoder.finish()]);
    }

    /// Poll device until all operations complete
    pub fn poll_wait(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    /// Read buffer contents back to CPU
    pub fn read_buffer(&self, buffer: &wgpu::Buffer, size: u64) -> Result<Vec<u8>> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging_read"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.encoder("read_back");
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.submit(encoder);
        self.poll_wait();

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            // Receiver outlives the callback; a failed send means nobody is listening.
            let _ = tx.send(result);
        });
        self.poll_wait();
        rx.recv()
            .map_err(|e| Error::BufferMap(e.to_string()))?
            .map_err(|e| Error::BufferMap(e.to_string()))?;

        let data = slice.get_mapped_range();
        let result = data.to_vec();
        drop(data);
        staging.unmap();

        Ok(result)
    }
}

impl std::fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ALICE-MLP [{}]", self.info)
    }
}
