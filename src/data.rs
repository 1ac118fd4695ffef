//! Host Dataset
//!
//! Flattened row-major images (`count * input_size` f32) and one `i32`
//! label per image. Images are expected to be normalized already.
//!
//! On-disk formats are headerless:
//! - images: native-endian f32, `count * input_size` values
//! - labels: native-endian i32, `count` values in `[0, classes)`

use std::path::Path;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Dataset {
    images: Vec<f32>,
    labels: Vec<i32>,
    input_size: usize,
    classes: usize,
}

impl Dataset {
    /// Build from flat buffers, validating lengths and label range.
    pub fn from_flat(
        images: Vec<f32>,
        labels: Vec<i32>,
        input_size: usize,
        classes: usize,
    ) -> Result<Self> {
        if input_size == 0 || classes == 0 {
            return Err(Error::InvalidData(
                "input_size and classes must be > 0".to_owned(),
            ));
        }
        if images.len() != labels.len() * input_size {
            return Err(Error::InvalidData(format!(
                "images length {} does not match {} labels * input_size {}",
                images.len(),
                labels.len(),
                input_size
            )));
        }
        if let Some((idx, &label)) = labels
            .iter()
            .enumerate()
            .find(|&(_, &l)| l < 0 || l as usize >= classes)
        {
            return Err(Error::InvalidData(format!(
                "label {label} at index {idx} outside [0, {classes})"
            )));
        }

        Ok(Self {
            images,
            labels,
            input_size,
            classes,
        })
    }

    /// Read the first `count` samples from raw image/label files.
    ///
    /// Files may hold more samples than requested; the tail is ignored.
    pub fn load(
        image_path: impl AsRef<Path>,
        label_path: impl AsRef<Path>,
        count: usize,
        input_size: usize,
        classes: usize,
    ) -> Result<Self> {
        let images: Vec<f32> = read_values(image_path.as_ref(), count * input_size)?;
        let labels: Vec<i32> = read_values(label_path.as_ref(), count)?;

        log::debug!(
            "loaded {count} samples from {} / {}",
            image_path.as_ref().display(),
            label_path.as_ref().display()
        );

        Self::from_flat(images, labels, input_size, classes)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[inline]
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    #[inline]
    pub fn classes(&self) -> usize {
        self.classes
    }

    /// One image row. Panics if `idx >= len`.
    #[inline]
    pub fn image(&self, idx: usize) -> &[f32] {
        let start = idx * self.input_size;
        &self.images[start..start + self.input_size]
    }

    #[inline]
    pub fn label(&self, idx: usize) -> i32 {
        self.labels[idx]
    }

    /// Number of full batches; a trailing partial batch is not counted.
    #[inline]
    pub fn full_batches(&self, batch_size: usize) -> usize {
        self.len() / batch_size
    }

    /// Contiguous batch `index` in dataset order.
    pub fn batch(&self, index: usize, batch_size: usize) -> (&[f32], &[i32]) {
        let start = index * batch_size;
        let end = start + batch_size;
        (
            &self.images[start * self.input_size..end * self.input_size],
            &self.labels[start..end],
        )
    }

    /// Copy the samples at `indices` into reusable staging vectors.
    ///
    /// Labels come out as `u32`; range was checked at construction.
    pub fn gather(&self, indices: &[usize], images: &mut Vec<f32>, labels: &mut Vec<u32>) {
        images.clear();
        labels.clear();
        for &idx in indices {
            images.extend_from_slice(self.image(idx));
            labels.push(self.labels[idx] as u32);
        }
    }
}

/// First `count` values of a headerless file; any tail is ignored.
fn read_values<T: bytemuck::Pod>(path: &Path, count: usize) -> Result<Vec<T>> {
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    let needed = count * std::mem::size_of::<T>();
    if bytes.len() < needed {
        return Err(Error::InvalidData(format!(
            "{}: {} bytes, need at least {needed}",
            path.display(),
            bytes.len()
        )));
    }
    Ok(bytemuck::pod_collect_to_vec(&bytes[..needed]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_from_flat_validates() {
        assert!(Dataset::from_flat(vec![0.0; 6], vec![0, 1], 3, 2).is_ok());
        assert!(matches!(
            Dataset::from_flat(vec![0.0; 5], vec![0, 1], 3, 2),
            Err(Error::InvalidData(_))
        ));
        assert!(Dataset::from_flat(vec![0.0; 6], vec![0, 2], 3, 2).is_err());
        assert!(Dataset::from_flat(vec![0.0; 6], vec![-1, 0], 3, 2).is_err());
    }

    #[test]
    fn test_batches_and_gather() {
        let images: Vec<f32> = (0..10).map(|v| v as f32).collect();
        let ds = Dataset::from_flat(images, vec![0, 1, 2, 3, 4], 2, 5).unwrap();
        assert_eq!(ds.full_batches(2), 2);

        let (x, y) = ds.batch(1, 2);
        assert_eq!(x, &[4.0, 5.0, 6.0, 7.0]);
        assert_eq!(y, &[2, 3]);

        let (mut gx, mut gy) = (Vec::new(), Vec::new());
        ds.gather(&[4, 0], &mut gx, &mut gy);
        assert_eq!(gx, vec![8.0, 9.0, 0.0, 1.0]);
        assert_eq!(gy, vec![4, 0]);
    }

    #[test]
    fn test_load_roundtrip_and_tail() {
        let dir = tempfile::tempdir().unwrap();
        let values: Vec<f32> = (0..12).map(|v| v as f32 * 0.5).collect();
        let img = write_file(dir.path(), "images.bin", bytemuck::cast_slice(&values));
        let lbl = write_file(dir.path(), "labels.bin", bytemuck::cast_slice(&[1i32, 0, 2, 1]));

        // Ask for 3 of 4 samples
        let ds = Dataset::load(&img, &lbl, 3, 3, 3).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.image(2), &[3.0, 3.5, 4.0]);
        assert_eq!(ds.label(2), 2);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.bin");
        let short = write_file(dir.path(), "short.bin", &[0u8; 8]);

        assert!(matches!(
            Dataset::load(&missing, &short, 1, 2, 2),
            Err(Error::Io { .. })
        ));
        assert!(matches!(
            Dataset::load(&short, &short, 1, 4, 2),
            Err(Error::InvalidData(_))
        ));
    }
}
