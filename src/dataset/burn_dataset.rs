//! Burn Dataset integration for label-list datasets
//!
//! `LabelListDataset` is the index -> (path, label) lookup; images are
//! decoded through an `ImageLoader` and turned into tensors by
//! `DefectBatcher`, which runs the train or eval `Transform` on every item.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::{DynamicImage, ImageReader};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::label_list::{read_label_list, LabelEntry};
use super::transform::Transform;
use crate::utils::error::{DefectError, Result};

/// One dataset entry: image path and class label
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefectSample {
    pub path: PathBuf,
    pub label: usize,
}

impl From<LabelEntry> for DefectSample {
    fn from(entry: LabelEntry) -> Self {
        Self {
            path: entry.path,
            label: entry.label,
        }
    }
}

/// Dataset backed by a label-list file
#[derive(Debug, Clone, Default)]
pub struct LabelListDataset {
    samples: Vec<DefectSample>,
}

impl LabelListDataset {
    /// Read `<path>\t<label>` lines from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let entries = read_label_list(path)?;
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: Vec<LabelEntry>) -> Self {
        Self {
            samples: entries.into_iter().map(DefectSample::from).collect(),
        }
    }

    pub fn samples(&self) -> &[DefectSample] {
        &self.samples
    }

    /// Get the number of classes in the dataset
    pub fn num_classes(&self) -> usize {
        self.samples
            .iter()
            .map(|s| s.label)
            .max()
            .map(|m| m + 1)
            .unwrap_or(0)
    }

    /// Get samples per class count
    pub fn class_distribution(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.num_classes()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }
}

impl Dataset<DefectSample> for LabelListDataset {
    fn get(&self, index: usize) -> Option<DefectSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Opens an image file for a sample
pub trait ImageLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<DynamicImage>;
}

/// Decodes the file with the `image` crate (format guessed from content)
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLoader;

impl ImageLoader for DefaultLoader {
    fn load(&self, path: &Path) -> Result<DynamicImage> {
        let to_err = |e: &dyn std::fmt::Display| DefectError::ImageLoad(path.to_path_buf(), e.to_string());
        ImageReader::open(path)
            .map_err(|e| to_err(&e))?
            .with_guessed_format()
            .map_err(|e| to_err(&e))?
            .decode()
            .map_err(|e| to_err(&e))
    }
}

/// A decoded, not yet transformed item
#[derive(Clone)]
pub struct RawDefectItem {
    pub image: DynamicImage,
    pub label: usize,
    pub path: String,
}

impl RawDefectItem {
    /// Load the sample's image through `loader`
    pub fn load(sample: &DefectSample, loader: &dyn ImageLoader) -> Result<Self> {
        let image = loader.load(&sample.path)?;
        Ok(Self {
            image,
            label: sample.label,
            path: sample.path.to_string_lossy().to_string(),
        })
    }
}

impl std::fmt::Debug for RawDefectItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawDefectItem")
            .field("label", &self.label)
            .field("path", &self.path)
            .field(
                "image_size",
                &format!("{}x{}", self.image.width(), self.image.height()),
            )
            .finish()
    }
}

/// A batch of defect images
#[derive(Clone, Debug)]
pub struct DefectBatch<B: Backend> {
    /// Batch of images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Batch of labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Batcher that transforms raw images and normalizes the stacked tensor
pub struct DefectBatcher<B: Backend> {
    transform: Transform,
    seed: u64,
    /// Batches produced so far; mixed into every batch seed
    counter: Arc<AtomicU64>,
    _backend: std::marker::PhantomData<B>,
}

impl<B: Backend> Clone for DefectBatcher<B> {
    fn clone(&self) -> Self {
        Self {
            transform: self.transform.clone(),
            seed: self.seed,
            counter: Arc::clone(&self.counter),
            _backend: std::marker::PhantomData,
        }
    }
}

impl<B: Backend> std::fmt::Debug for DefectBatcher<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefectBatcher")
            .field("mode", &self.transform.mode())
            .field("image_size", &self.transform.output_size())
            .finish()
    }
}

impl<B: Backend> DefectBatcher<B> {
    pub fn new(transform: Transform, seed: u64) -> Self {
        Self {
            transform,
            seed,
            counter: Arc::new(AtomicU64::new(0)),
            _backend: std::marker::PhantomData,
        }
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }
}

impl<B: Backend> Batcher<B, RawDefectItem, DefectBatch<B>> for DefectBatcher<B> {
    fn batch(&self, items: Vec<RawDefectItem>, device: &B::Device) -> DefectBatch<B> {
        self.build(items, device, true)
    }
}

impl<B: Backend> DefectBatcher<B> {
    /// Same as [`Batcher::batch`] but transforms on the calling thread
    pub fn batch_sequential(&self, items: Vec<RawDefectItem>, device: &B::Device) -> DefectBatch<B> {
        self.build(items, device, false)
    }

    fn build(&self, items: Vec<RawDefectItem>, device: &B::Device, parallel: bool) -> DefectBatch<B> {
        let batch_size = items.len();
        let size = self.transform.output_size();
        let batch_seed = self
            .seed
            .wrapping_add(self.counter.fetch_add(1, Ordering::Relaxed));

        // One ChaCha stream per item keeps results independent of thread count
        let process = |(i, item): (usize, RawDefectItem)| {
            let mut rng = ChaCha8Rng::seed_from_u64(batch_seed);
            rng.set_stream(i as u64);
            (self.transform.apply(item.image, &mut rng), item.label as i64)
        };
        let processed: Vec<(Vec<f32>, i64)> = if parallel {
            items.into_par_iter().enumerate().map(process).collect()
        } else {
            items.into_iter().enumerate().map(process).collect()
        };

        let mut images_data = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets_data = Vec::with_capacity(batch_size);
        for (data, label) in processed {
            images_data.extend(data);
            targets_data.push(label);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );

        let config = self.transform.config();
        let mean = Tensor::<B, 4>::from_floats(
            TensorData::new(config.mean.to_vec(), [1, 3, 1, 1]),
            device,
        );
        let std = Tensor::<B, 4>::from_floats(
            TensorData::new(config.std.to_vec(), [1, 3, 1, 1]),
            device,
        );
        let images = (images - mean) / std;

        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        DefectBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::transform::TransformConfig;
    use burn_ndarray::NdArray;
    use image::{ImageBuffer, Rgb};

    type TestBackend = NdArray<f32>;

    fn raw_item(label: usize, value: u8) -> RawDefectItem {
        let img = ImageBuffer::from_pixel(10, 10, Rgb([value, value, value]));
        RawDefectItem {
            image: DynamicImage::ImageRgb8(img),
            label,
            path: format!("{label}.jpg"),
        }
    }

    fn test_config() -> TransformConfig {
        TransformConfig {
            resize: None,
            crop_size: 8,
            padding: 0,
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
            ..Default::default()
        }
    }

    #[test]
    fn test_dataset_lookup() {
        let dataset = LabelListDataset::from_entries(vec![
            LabelEntry::new("a.jpg", 0),
            LabelEntry::new("b.jpg", 3),
            LabelEntry::new("c.jpg", 3),
        ]);

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.get(1).unwrap().path, PathBuf::from("b.jpg"));
        assert!(dataset.get(3).is_none());
        assert_eq!(dataset.num_classes(), 4);
        assert_eq!(dataset.class_distribution(), vec![1, 0, 0, 2]);
    }

    #[test]
    fn test_default_loader_error() {
        let err = DefaultLoader.load(Path::new("/nonexistent/img.jpg")).unwrap_err();
        assert!(matches!(err, DefectError::ImageLoad(..)));
        assert!(err.to_string().contains("/nonexistent/img.jpg"));
    }

    #[test]
    fn test_default_loader_reads_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        ImageBuffer::from_pixel(4, 3, Rgb([10u8, 20, 30])).save(&path).unwrap();

        let sample = DefectSample {
            path: path.clone(),
            label: 5,
        };
        let item = RawDefectItem::load(&sample, &DefaultLoader).unwrap();
        assert_eq!(item.label, 5);
        assert_eq!((item.image.width(), item.image.height()), (4, 3));
    }

    #[test]
    fn test_batch_shapes_and_normalization() {
        let device = Default::default();
        let batcher = DefectBatcher::<TestBackend>::new(Transform::eval(test_config()), 0);

        let batch = batcher.batch(vec![raw_item(1, 255), raw_item(4, 0)], &device);
        assert_eq!(batch.images.dims(), [2, 3, 8, 8]);
        assert_eq!(batch.targets.dims(), [2]);

        let values: Vec<f32> = batch.images.into_data().to_vec().unwrap();
        let plane = 3 * 8 * 8;
        assert!(values[..plane].iter().all(|v| (v - 1.0).abs() < 1e-5));
        assert!(values[plane..].iter().all(|v| (v + 1.0).abs() < 1e-5));

        let targets: Vec<i64> = batch.targets.into_data().to_vec().unwrap();
        assert_eq!(targets, vec![1, 4]);
    }

    #[test]
    fn test_sequential_batch_matches_parallel() {
        let device = Default::default();
        let config = TransformConfig { padding: 2, ..test_config() };
        let items = || (0..6).map(|i| raw_item(i % 3, (i * 40) as u8)).collect::<Vec<_>>();

        let parallel = DefectBatcher::<TestBackend>::new(Transform::train(config.clone()), 9)
            .batch(items(), &device);
        let sequential = DefectBatcher::<TestBackend>::new(Transform::train(config), 9)
            .batch_sequential(items(), &device);

        let a: Vec<f32> = parallel.images.into_data().to_vec().unwrap();
        let b: Vec<f32> = sequential.images.into_data().to_vec().unwrap();
        assert_eq!(a, b);
    }
}
