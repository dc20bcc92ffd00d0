//! Checkpoint evaluation on a held-out label list.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::data::dataset::Dataset;
use burn::tensor::backend::Backend;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::checkpoint::load_model;
use super::results::ResultsLog;
use super::trainer::test_epoch;
use crate::dataset::{DefaultLoader, DefectBatcher, LabelListDataset, SubsetLoader, Transform, TransformConfig};
use crate::utils::error::{DefectError, Result};
use crate::utils::metrics::ConfusionMatrix;

/// What to evaluate and how
#[derive(Debug, Clone)]
pub struct EvaluationConfig {
    /// Directory holding `model_config.json` and the weights
    pub checkpoint_dir: PathBuf,
    /// Weights name without extension (`model_para` or `model_best`)
    pub weights: String,
    pub list: PathBuf,
    pub batch_size: usize,
    pub num_workers: usize,
    pub print_freq: usize,
    /// Append the `,,,,,error` row to `<checkpoint_dir>/results.csv`
    pub append_results: bool,
}

/// Evaluation results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub loss: f64,
    pub error: f64,
    pub num_samples: usize,
    pub confusion: ConfusionMatrix,
}

impl EvaluationReport {
    pub fn accuracy(&self) -> f64 {
        1.0 - self.error
    }
}

/// Load a checkpoint and run one test pass over `config.list`
pub fn evaluate<B: Backend>(
    config: &EvaluationConfig,
    transform: &TransformConfig,
    device: &B::Device,
) -> Result<EvaluationReport> {
    transform.validate()?;
    let (model, model_config) = load_model::<B>(&config.checkpoint_dir, &config.weights, device)?;

    let dataset = Arc::new(LabelListDataset::from_file(&config.list)?);
    if dataset.is_empty() {
        return Err(DefectError::Dataset(format!(
            "{} contains no entries",
            config.list.display()
        )));
    }
    if dataset.num_classes() > model_config.num_classes {
        return Err(DefectError::Dataset(format!(
            "label list uses {} classes but the model has {}",
            dataset.num_classes(),
            model_config.num_classes
        )));
    }
    info!(
        "Evaluating {} on {} samples from {:?}",
        config.weights,
        dataset.len(),
        config.list
    );

    let indices = (0..dataset.len()).collect();
    let mut loader = SubsetLoader::new(
        dataset,
        indices,
        config.batch_size,
        false,
        Arc::new(DefaultLoader),
        config.num_workers,
    )?;
    let batcher = DefectBatcher::<B>::new(Transform::eval(transform.clone()), 0);
    let mut confusion = ConfusionMatrix::new(model_config.num_classes);
    let mut rng = ChaCha8Rng::seed_from_u64(0);

    let stats = test_epoch(
        &model,
        &mut loader,
        &batcher,
        device,
        config.print_freq.max(1),
        true,
        &mut rng,
        Some(&mut confusion),
    );

    if config.append_results {
        append_test_row(&config.checkpoint_dir, stats.error)?;
    }

    Ok(EvaluationReport {
        loss: stats.loss,
        error: stats.error,
        num_samples: stats.num_samples,
        confusion,
    })
}

fn append_test_row(dir: &Path, error: f64) -> Result<()> {
    let log = ResultsLog::open(dir);
    log.append_test(error)?;
    info!("Appended test error to {:?}", log.path());
    Ok(())
}
