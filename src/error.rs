//! Error types for ALICE-MLP
//!
//! Every device, I/O and shape fault surfaces as an [`Error`] value.
//! Only the binaries turn an `Err` into a process exit status.

use std::path::PathBuf;

use thiserror::Error;

/// All failures the trainer and the benchmark can report.
#[derive(Error, Debug)]
pub enum Error {
    /// No wgpu adapter could be selected
    #[error("No GPU adapter found")]
    NoAdapter,

    /// Adapter found, but device creation failed
    #[error("Failed to create device: {0}")]
    DeviceRequest(String),

    /// Mapping a staging buffer for readback failed
    #[error("Buffer map failed: {0}")]
    BufferMap(String),

    /// Dataset file could not be read
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Dataset contents are inconsistent (length, label range)
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Configuration record rejected by `validate()`
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Tensor shapes do not line up for the requested operation
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// Native CUDA backend failure
    #[cfg(feature = "cuda")]
    #[error(transparent)]
    Cuda(#[from] crate::cuda::CudaError),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("batch_size must be > 0".to_string());
        assert_eq!(err.to_string(), "invalid config: batch_size must be > 0");
    }

    #[test]
    fn test_io_error_names_path() {
        let err = Error::io(
            "train-images.bin",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        let msg = err.to_string();
        assert!(msg.contains("train-images.bin"), "{msg}");
        assert!(msg.contains("missing"), "{msg}");
    }
}
