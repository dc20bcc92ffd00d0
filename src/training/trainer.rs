//! Epoch loops and the full training driver
//!
//! This implements the training loop directly on Burn's optimizer API
//! rather than the high-level LearnerBuilder: every batch is forwarded,
//! scored and stepped by hand so the running averages and log lines
//! match the classic DenseNet training scripts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use burn::{
    data::dataset::Dataset,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{
        decay::WeightDecayConfig, momentum::MomentumConfig, GradientsParams, Optimizer, SgdConfig,
    },
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::checkpoint::{
    self, load_model, save_metadata, save_model_config, save_weights, CheckpointMeta,
    BEST_WEIGHTS, LATEST_WEIGHTS,
};
use super::config::TrainingConfig;
use super::results::ResultsLog;
use super::scheduler::LrScheduler;
use crate::dataset::{
    train_valid_split, DefaultLoader, DefectBatcher, ImageLoader, LabelListDataset, SubsetLoader,
    Transform, TransformConfig,
};
use crate::model::{DenseNet, DenseNetConfig};
use crate::utils::error::{DefectError, Result};
use crate::utils::metrics::{AverageMeter, ConfusionMatrix};

/// Averages over one pass of a loader
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// Mean seconds per batch
    pub batch_time: f64,
    pub loss: f64,
    /// Top-1 error rate in `[0, 1]`
    pub error: f64,
    pub num_samples: usize,
}

/// Per-epoch record kept in the training report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    /// 1-based epoch
    pub epoch: usize,
    pub lr: f64,
    pub train_loss: f64,
    pub train_error: f64,
    pub valid_loss: Option<f64>,
    pub valid_error: Option<f64>,
    pub is_best: bool,
    pub duration_secs: f64,
}

/// Outcome of a full training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs: Vec<EpochSummary>,
    /// Lowest validation error (1.0 when never validated)
    pub best_error: f64,
    pub best_epoch: Option<usize>,
    pub test_error: Option<f64>,
    pub seed: u64,
    pub save_dir: PathBuf,
    pub num_parameters: usize,
}

/// Top-1 predictions for a batch of logits
fn predictions<B: Backend>(output: &Tensor<B, 2>) -> Tensor<B, 1, Int> {
    let [batch_size, _] = output.dims();
    output.clone().argmax(1).reshape([batch_size])
}

fn tensor_to_usize<B: Backend>(tensor: Tensor<B, 1, Int>) -> Result<Vec<usize>> {
    let values = tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| DefectError::Dataset(format!("Failed to read labels: {e:?}")))?;
    Ok(values.into_iter().map(|v| v.max(0) as usize).collect())
}

/// One optimization pass over `loader`
///
/// Returns the updated model and the epoch averages.
#[allow(clippy::too_many_arguments)]
pub fn train_epoch<B, O>(
    mut model: DenseNet<B>,
    optimizer: &mut O,
    loader: &mut SubsetLoader,
    batcher: &DefectBatcher<B>,
    device: &B::Device,
    lr: f64,
    epoch: usize,
    n_epochs: usize,
    print_freq: usize,
    rng: &mut ChaCha8Rng,
) -> (DenseNet<B>, EpochStats)
where
    B: AutodiffBackend,
    O: Optimizer<DenseNet<B>, B>,
{
    let mut batch_time = AverageMeter::new();
    let mut losses = AverageMeter::new();
    let mut error = AverageMeter::new();
    let loss_fn = CrossEntropyLossConfig::new().init(device);

    let batches = loader.batches(rng);
    let num_batches = batches.len();
    let mut end = Instant::now();

    for (batch_idx, indices) in batches.iter().enumerate() {
        let Some(batch) = loader.load_batch(indices, batcher, device) else {
            continue;
        };
        let batch_size = batch.targets.dims()[0];

        let output = model.forward(batch.images);
        let loss = loss_fn.forward(output.clone(), batch.targets.clone());

        let wrong: i64 = predictions(&output)
            .not_equal(batch.targets)
            .int()
            .sum()
            .into_scalar()
            .elem();
        error.update(wrong as f64 / batch_size as f64, batch_size);
        losses.update(loss.clone().into_scalar().elem::<f64>(), batch_size);

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optimizer.step(lr, model, grads);

        batch_time.update(end.elapsed().as_secs_f64(), 1);
        end = Instant::now();

        if batch_idx % print_freq == 0 {
            info!(
                "Epoch: [{}/{}]\tIter: [{}/{}]\tTime {:.3} ({:.3})\tLoss {:.4} ({:.4})\tError {:.4} ({:.4})",
                epoch + 1,
                n_epochs,
                batch_idx + 1,
                num_batches,
                batch_time.val,
                batch_time.avg,
                losses.val,
                losses.avg,
                error.val,
                error.avg
            );
        }
    }

    let stats = EpochStats {
        batch_time: batch_time.avg,
        loss: losses.avg,
        error: error.avg,
        num_samples: losses.count,
    };
    (model, stats)
}

/// One evaluation pass without gradients
///
/// Logs with the `Test` prefix when `is_test`, `Valid` otherwise. Predictions
/// are accumulated into `confusion` when given.
#[allow(clippy::too_many_arguments)]
pub fn test_epoch<B: Backend>(
    model: &DenseNet<B>,
    loader: &mut SubsetLoader,
    batcher: &DefectBatcher<B>,
    device: &B::Device,
    print_freq: usize,
    is_test: bool,
    rng: &mut ChaCha8Rng,
    mut confusion: Option<&mut ConfusionMatrix>,
) -> EpochStats {
    let mut batch_time = AverageMeter::new();
    let mut losses = AverageMeter::new();
    let mut error = AverageMeter::new();
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let prefix = if is_test { "Test" } else { "Valid" };

    let batches = loader.batches(rng);
    let num_batches = batches.len();
    let mut end = Instant::now();

    for (batch_idx, indices) in batches.iter().enumerate() {
        let Some(batch) = loader.load_batch(indices, batcher, device) else {
            continue;
        };
        let batch_size = batch.targets.dims()[0];

        let output = model.forward(batch.images);
        let loss = loss_fn.forward(output.clone(), batch.targets.clone());
        let predicted = predictions(&output);

        if let Some(matrix) = confusion.as_deref_mut() {
            match (
                tensor_to_usize(batch.targets.clone()),
                tensor_to_usize(predicted.clone()),
            ) {
                (Ok(actual), Ok(predicted)) => matrix.add_batch(&actual, &predicted),
                (Err(e), _) | (_, Err(e)) => warn!("Skipping batch in confusion matrix: {e}"),
            }
        }

        let wrong: i64 = predicted
            .not_equal(batch.targets)
            .int()
            .sum()
            .into_scalar()
            .elem();
        error.update(wrong as f64 / batch_size as f64, batch_size);
        losses.update(loss.into_scalar().elem::<f64>(), batch_size);

        batch_time.update(end.elapsed().as_secs_f64(), 1);
        end = Instant::now();

        if batch_idx % print_freq == 0 {
            info!(
                "{}\tIter: [{}/{}]\tTime {:.3} ({:.3})\tLoss {:.4} ({:.4})\tError {:.4} ({:.4})",
                prefix,
                batch_idx + 1,
                num_batches,
                batch_time.val,
                batch_time.avg,
                losses.val,
                losses.avg,
                error.val,
                error.avg
            );
        }
    }

    EpochStats {
        batch_time: batch_time.avg,
        loss: losses.avg,
        error: error.avg,
        num_samples: losses.count,
    }
}

/// Create the save directory; an existing non-directory is an error
pub fn prepare_save_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    if !path.is_dir() {
        return Err(DefectError::InvalidInput(format!("{} is not a dir", path.display())));
    }
    Ok(())
}

/// Train a DenseNet on `config.train_list`
///
/// # Type Parameters
/// * `B` - The autodiff backend to use (e.g., `Autodiff<NdArray>` or `Autodiff<Cuda>`)
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    model_config: &DenseNetConfig,
    transform: &TransformConfig,
    device: &B::Device,
) -> Result<TrainingReport> {
    config.validate()?;
    model_config.validate()?;
    transform.validate()?;
    prepare_save_dir(&config.save_dir)?;

    let seed = config.seed.unwrap_or_else(rand::random);
    B::seed(seed);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    info!("Seed: {}", seed);

    let dataset = Arc::new(LabelListDataset::from_file(&config.train_list)?);
    if dataset.is_empty() {
        return Err(DefectError::Dataset(format!(
            "{} contains no entries",
            config.train_list.display()
        )));
    }
    if dataset.num_classes() > model_config.num_classes {
        return Err(DefectError::Dataset(format!(
            "label list uses {} classes but the model has {}",
            dataset.num_classes(),
            model_config.num_classes
        )));
    }

    let (train_indices, valid_indices) =
        train_valid_split(dataset.len(), config.valid_size, &mut rng)?;
    info!(
        "Training samples: {}, validation samples: {}",
        train_indices.len(),
        valid_indices.len()
    );

    let image_loader: Arc<dyn ImageLoader> = Arc::new(DefaultLoader);
    let mut train_loader = SubsetLoader::new(
        Arc::clone(&dataset),
        train_indices,
        config.batch_size,
        true,
        Arc::clone(&image_loader),
        config.num_workers,
    )?;
    let mut valid_loader = if valid_indices.is_empty() {
        None
    } else {
        Some(SubsetLoader::new(
            Arc::clone(&dataset),
            valid_indices,
            config.batch_size,
            true,
            image_loader,
            config.num_workers,
        )?)
    };

    let train_batcher = DefectBatcher::<B>::new(Transform::train(transform.clone()), seed);
    let eval_batcher =
        DefectBatcher::<B::InnerBackend>::new(Transform::eval(transform.clone()), seed);

    let mut model = model_config.init::<B>(device);
    let num_parameters = model.num_parameters();
    info!("Model:\n{}", model.summary());
    save_model_config(&config.save_dir, model_config)?;
    if checkpoint::remove_weights(&config.save_dir, BEST_WEIGHTS)? {
        info!("Removed {} left by a previous run", BEST_WEIGHTS);
    }

    let momentum = MomentumConfig::new()
        .with_momentum(config.momentum)
        .with_dampening(0.0)
        .with_nesterov(config.nesterov);
    let mut optimizer = SgdConfig::new()
        .with_momentum(Some(momentum))
        .with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay as f32)))
        .init();

    let scheduler = LrScheduler::multi_step(config.lr, config.gamma, config.milestone_epochs());
    info!("Scheduler: {}", scheduler.description());

    let results = ResultsLog::create(&config.save_dir)?;
    let mut best_error = 1.0f64;
    let mut best_epoch = None;
    let mut epochs = Vec::with_capacity(config.n_epochs);

    for epoch in 0..config.n_epochs {
        let started = Instant::now();
        let lr = scheduler.get_lr(epoch);

        let (trained, train_stats) = train_epoch(
            model,
            &mut optimizer,
            &mut train_loader,
            &train_batcher,
            device,
            lr,
            epoch,
            config.n_epochs,
            config.print_freq,
            &mut rng,
        );
        model = trained;

        let valid_stats = valid_loader.as_mut().map(|loader| {
            test_epoch(
                &model.valid(),
                loader,
                &eval_batcher,
                device,
                config.print_freq,
                false,
                &mut rng,
                None,
            )
        });
        let valid = valid_stats.map(|s| (s.loss, s.error));

        let is_best = matches!(valid, Some((_, error)) if error < best_error);
        if let Some((_, error)) = valid.filter(|_| is_best) {
            best_error = error;
            best_epoch = Some(epoch + 1);
            info!("New best error: {:.4}", best_error);
            save_weights(&model, &config.save_dir, BEST_WEIGHTS)?;
        }
        save_weights(&model, &config.save_dir, LATEST_WEIGHTS)?;
        save_metadata(
            &config.save_dir,
            &CheckpointMeta::now(
                epoch + 1,
                config.n_epochs,
                lr,
                (train_stats.loss, train_stats.error),
                valid,
                best_error,
            ),
        )?;

        results.append_epoch(epoch + 1, train_stats.loss, train_stats.error, valid)?;

        epochs.push(EpochSummary {
            epoch: epoch + 1,
            lr,
            train_loss: train_stats.loss,
            train_error: train_stats.error,
            valid_loss: valid.map(|v| v.0),
            valid_error: valid.map(|v| v.1),
            is_best,
            duration_secs: started.elapsed().as_secs_f64(),
        });
    }

    let test_error = match &config.test_list {
        Some(test_list) => {
            let error = final_test::<B>(
                config,
                test_list,
                transform,
                model.valid(),
                best_epoch.is_some(),
                device,
                &mut rng,
            )?;
            results.append_test(error)?;
            info!("Final test error: {:.4}", error);
            Some(error)
        }
        None => None,
    };

    Ok(TrainingReport {
        epochs,
        best_error,
        best_epoch,
        test_error,
        seed,
        save_dir: config.save_dir.clone(),
        num_parameters,
    })
}

/// Evaluate this run's best weights (or the final model without them) on a test list
///
/// `has_best` must come from the current run: a `model_best` left in the save
/// directory by an earlier run is never loaded.
fn final_test<B: AutodiffBackend>(
    config: &TrainingConfig,
    test_list: &Path,
    transform: &TransformConfig,
    final_model: DenseNet<B::InnerBackend>,
    has_best: bool,
    device: &B::Device,
    rng: &mut ChaCha8Rng,
) -> Result<f64> {
    let model = if has_best && checkpoint::weights_exist(&config.save_dir, BEST_WEIGHTS) {
        load_model::<B::InnerBackend>(&config.save_dir, BEST_WEIGHTS, device)?.0
    } else {
        warn!("No best weights saved in this run, testing the final model");
        final_model
    };

    let dataset = Arc::new(LabelListDataset::from_file(test_list)?);
    let indices = (0..dataset.len()).collect();
    let mut loader = SubsetLoader::new(
        dataset,
        indices,
        config.batch_size,
        false,
        Arc::new(DefaultLoader),
        config.num_workers,
    )?;
    let batcher = DefectBatcher::<B::InnerBackend>::new(Transform::eval(transform.clone()), 0);

    let stats = test_epoch(&model, &mut loader, &batcher, device, config.print_freq, true, rng, None);
    Ok(stats.error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_to_usize() {
        type B = burn_ndarray::NdArray<f32>;
        let tensor = Tensor::<B, 1, Int>::from_ints([3, 0, 11], &Default::default());
        assert_eq!(tensor_to_usize(tensor).unwrap(), vec![3, 0, 11]);
    }

    #[test]
    fn test_prepare_save_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        prepare_save_dir(&nested).unwrap();
        assert!(nested.is_dir());

        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        let err = prepare_save_dir(&file).unwrap_err();
        assert!(err.to_string().ends_with("is not a dir"));
    }

    #[test]
    fn test_missing_train_list() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainingConfig {
            train_list: dir.path().join("missing.txt"),
            save_dir: dir.path().join("logs"),
            ..TrainingConfig::debug()
        };
        let err = train::<crate::backend::TrainingBackend>(
            &config,
            &DenseNetConfig::new(),
            &TransformConfig::default(),
            &Default::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DefectError::PathNotFound(_)));
    }
}
