//! Train/validation index split and subset batching.

use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::warn;

use super::burn_dataset::{DefectBatch, DefectBatcher, ImageLoader, LabelListDataset, RawDefectItem};
use crate::utils::error::{DefectError, Result};

/// Split `0..len` into (train, valid) indices.
///
/// The indices are permuted and the last `valid_size` of the permutation
/// become the validation subset.
pub fn train_valid_split(
    len: usize,
    valid_size: usize,
    rng: &mut ChaCha8Rng,
) -> Result<(Vec<usize>, Vec<usize>)> {
    if valid_size >= len && valid_size > 0 {
        return Err(DefectError::InvalidInput(format!(
            "valid_size ({valid_size}) must be smaller than the dataset ({len} samples)"
        )));
    }

    let mut indices: Vec<usize> = (0..len).collect();
    indices.shuffle(rng);
    let valid = indices.split_off(len - valid_size);
    Ok((indices, valid))
}

/// Batches a subset of a dataset, optionally reshuffling every pass
pub struct SubsetLoader {
    dataset: Arc<LabelListDataset>,
    indices: Vec<usize>,
    batch_size: usize,
    shuffle: bool,
    loader: Arc<dyn ImageLoader>,
    pool: Option<rayon::ThreadPool>,
}

impl std::fmt::Debug for SubsetLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubsetLoader")
            .field("len", &self.indices.len())
            .field("batch_size", &self.batch_size)
            .field("shuffle", &self.shuffle)
            .finish()
    }
}

impl SubsetLoader {
    /// `num_workers == 0` loads on the calling thread
    pub fn new(
        dataset: Arc<LabelListDataset>,
        indices: Vec<usize>,
        batch_size: usize,
        shuffle: bool,
        loader: Arc<dyn ImageLoader>,
        num_workers: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(DefectError::InvalidInput("batch_size must be positive".to_string()));
        }

        let pool = if num_workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_workers)
                .build()
                .map_err(|e| DefectError::Dataset(format!("Failed to build loader pool: {e}")))?;
            Some(pool)
        } else {
            None
        };

        Ok(Self {
            dataset,
            indices,
            batch_size,
            shuffle,
            loader,
            pool,
        })
    }

    /// Number of samples in the subset
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Batches per pass (the last one may be short)
    pub fn num_batches(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }

    /// Index groups for one pass over the subset
    pub fn batches(&mut self, rng: &mut ChaCha8Rng) -> Vec<Vec<usize>> {
        if self.shuffle {
            self.indices.shuffle(rng);
        }
        self.indices
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Decode and batch the given dataset indices.
    ///
    /// Unreadable images are logged and dropped; `None` when nothing loaded.
    pub fn load_batch<B: Backend>(
        &self,
        indices: &[usize],
        batcher: &DefectBatcher<B>,
        device: &B::Device,
    ) -> Option<DefectBatch<B>> {
        let load = |index: &usize| -> Option<RawDefectItem> {
            let sample = self.dataset.get(*index)?;
            match RawDefectItem::load(&sample, self.loader.as_ref()) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!("Cannot read image: {} ({e})", sample.path.display());
                    None
                }
            }
        };

        let run = || {
            let items: Vec<RawDefectItem> = match self.pool {
                Some(_) => indices.par_iter().filter_map(load).collect(),
                None => indices.iter().filter_map(load).collect(),
            };
            if items.is_empty() {
                None
            } else if self.pool.is_some() {
                Some(batcher.batch(items, device))
            } else {
                Some(batcher.batch_sequential(items, device))
            }
        };

        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::label_list::LabelEntry;
    use crate::dataset::transform::{Transform, TransformConfig};
    use burn_ndarray::NdArray;
    use image::{DynamicImage, ImageBuffer, Rgb};
    use rand::SeedableRng;
    use std::path::Path;

    type TestBackend = NdArray<f32>;

    /// Serves a solid image for every path except those containing "bad"
    struct SolidLoader;

    impl ImageLoader for SolidLoader {
        fn load(&self, path: &Path) -> Result<DynamicImage> {
            if path.to_string_lossy().contains("bad") {
                return Err(DefectError::ImageLoad(path.to_path_buf(), "corrupt".into()));
            }
            Ok(DynamicImage::ImageRgb8(ImageBuffer::from_pixel(6, 6, Rgb([100, 100, 100]))))
        }
    }

    fn dataset(n: usize) -> Arc<LabelListDataset> {
        let entries = (0..n)
            .map(|i| {
                let name = if i == 2 { "bad.jpg".to_string() } else { format!("{i}.jpg") };
                LabelEntry::new(name, i % 3)
            })
            .collect();
        Arc::new(LabelListDataset::from_entries(entries))
    }

    fn batcher() -> DefectBatcher<TestBackend> {
        let config = TransformConfig {
            resize: None,
            crop_size: 4,
            padding: 1,
            ..Default::default()
        };
        DefectBatcher::new(Transform::train(config), 7)
    }

    #[test]
    fn test_split_sizes_and_disjoint() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let (train, valid) = train_valid_split(10, 3, &mut rng).unwrap();
        assert_eq!(train.len(), 7);
        assert_eq!(valid.len(), 3);

        let mut all: Vec<usize> = train.iter().chain(valid.iter()).copied().collect();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_without_validation() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let (train, valid) = train_valid_split(5, 0, &mut rng).unwrap();
        assert_eq!(train.len(), 5);
        assert!(valid.is_empty());
    }

    #[test]
    fn test_split_rejects_oversized_validation() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(train_valid_split(5, 5, &mut rng).is_err());
    }

    #[test]
    fn test_batches_cover_subset() {
        let mut loader =
            SubsetLoader::new(dataset(7), (0..7).collect(), 3, true, Arc::new(SolidLoader), 0)
                .unwrap();
        assert_eq!(loader.num_batches(), 3);

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let batches = loader.batches(&mut rng);
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 3, 1]);

        let mut seen: Vec<usize> = batches.concat();
        seen.sort();
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_unshuffled_order_is_stable() {
        let mut loader =
            SubsetLoader::new(dataset(4), vec![3, 1, 0, 2], 2, false, Arc::new(SolidLoader), 0)
                .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(loader.batches(&mut rng), vec![vec![3, 1], vec![0, 2]]);
    }

    #[test]
    fn test_load_batch_drops_unreadable() {
        let device = Default::default();
        let batcher = batcher();
        for workers in [0, 2] {
            let loader =
                SubsetLoader::new(dataset(4), (0..4).collect(), 4, false, Arc::new(SolidLoader), workers)
                    .unwrap();
            let batch = loader.load_batch(&[0, 1, 2, 3], &batcher, &device).unwrap();
            assert_eq!(batch.images.dims(), [3, 3, 4, 4]);
            let targets: Vec<i64> = batch.targets.into_data().to_vec().unwrap();
            assert_eq!(targets, vec![0, 1, 0]);

            assert!(loader.load_batch(&[2], &batcher, &device).is_none());
        }
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(SubsetLoader::new(dataset(2), vec![0, 1], 0, false, Arc::new(SolidLoader), 0).is_err());
    }
}
