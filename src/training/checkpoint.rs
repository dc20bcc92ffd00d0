//! Checkpoint files written into the save directory.
//!
//! ```text
//! <save>/model_para.mpk      latest weights (every epoch)
//! <save>/model_best.mpk      weights with the lowest validation error
//! <save>/model_config.json   DenseNetConfig needed to rebuild the network
//! <save>/checkpoint.json     metadata of the last saved epoch
//! ```

use std::path::{Path, PathBuf};

use burn::config::Config;
use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::backend::Backend;
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::{DenseNet, DenseNetConfig};
use crate::utils::error::{DefectError, Result};

/// Weights saved after every epoch
pub const LATEST_WEIGHTS: &str = "model_para";
/// Weights of the best validation epoch
pub const BEST_WEIGHTS: &str = "model_best";
pub const MODEL_CONFIG_FILE: &str = "model_config.json";
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Metadata stored next to the weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// 1-based epoch that produced the weights
    pub epoch: usize,
    pub n_epochs: usize,
    pub lr: f64,
    pub train_loss: f64,
    pub train_error: f64,
    pub valid_loss: Option<f64>,
    pub valid_error: Option<f64>,
    pub best_error: f64,
    pub timestamp: String,
}

impl CheckpointMeta {
    /// Stamp with the current local time
    pub fn now(
        epoch: usize,
        n_epochs: usize,
        lr: f64,
        train: (f64, f64),
        valid: Option<(f64, f64)>,
        best_error: f64,
    ) -> Self {
        Self {
            epoch,
            n_epochs,
            lr,
            train_loss: train.0,
            train_error: train.1,
            valid_loss: valid.map(|v| v.0),
            valid_error: valid.map(|v| v.1),
            best_error,
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Weights path without the recorder's extension
pub fn weights_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}

/// Whether `<dir>/<name>.mpk` exists
pub fn weights_exist(dir: &Path, name: &str) -> bool {
    weights_path(dir, name).with_extension("mpk").exists()
}

/// Delete `<dir>/<name>.mpk` if present, returning whether a file was removed
pub fn remove_weights(dir: &Path, name: &str) -> Result<bool> {
    let path = weights_path(dir, name).with_extension("mpk");
    if !path.exists() {
        return Ok(false);
    }
    std::fs::remove_file(&path)?;
    Ok(true)
}

/// Write `model_config.json`
pub fn save_model_config(dir: &Path, config: &DenseNetConfig) -> Result<()> {
    let path = dir.join(MODEL_CONFIG_FILE);
    config
        .save(&path)
        .map_err(|e| DefectError::Serialization(format!("Failed to save {}: {e}", path.display())))?;
    debug!("Saved model config to {:?}", path);
    Ok(())
}

/// Read `model_config.json`
pub fn load_model_config(dir: &Path) -> Result<DenseNetConfig> {
    let path = dir.join(MODEL_CONFIG_FILE);
    if !path.exists() {
        return Err(DefectError::PathNotFound(path));
    }
    DenseNetConfig::load(&path)
        .map_err(|e| DefectError::Serialization(format!("Failed to load {}: {e:?}", path.display())))
}

/// Record the model weights under `<dir>/<name>`
pub fn save_weights<B: Backend>(model: &DenseNet<B>, dir: &Path, name: &str) -> Result<PathBuf> {
    let path = weights_path(dir, name);
    let recorder = CompactRecorder::new();
    model.clone().save_file(&path, &recorder)?;
    debug!("Saved weights to {:?}", path);
    Ok(path)
}

/// Write `checkpoint.json`
pub fn save_metadata(dir: &Path, meta: &CheckpointMeta) -> Result<()> {
    let json = serde_json::to_string_pretty(meta)?;
    std::fs::write(dir.join(CHECKPOINT_FILE), json)?;
    Ok(())
}

/// Read `checkpoint.json`
pub fn load_metadata(dir: &Path) -> Result<CheckpointMeta> {
    let path = dir.join(CHECKPOINT_FILE);
    if !path.exists() {
        return Err(DefectError::PathNotFound(path));
    }
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

/// Rebuild the network from `model_config.json` and load `<name>` weights
pub fn load_model<B: Backend>(
    dir: &Path,
    name: &str,
    device: &B::Device,
) -> Result<(DenseNet<B>, DenseNetConfig)> {
    let config = load_model_config(dir)?;
    if !weights_exist(dir, name) {
        return Err(DefectError::PathNotFound(weights_path(dir, name).with_extension("mpk")));
    }

    let recorder = CompactRecorder::new();
    let model = config
        .init::<B>(device)
        .load_file(weights_path(dir, name), &recorder, device)?;
    info!("Loaded {} weights from {:?}", name, dir);
    Ok((model, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn tiny_config() -> DenseNetConfig {
        DenseNetConfig::new()
            .with_growth_rate(2)
            .with_block_config(vec![1, 1])
            .with_num_init_features(4)
            .with_bn_size(2)
            .with_num_classes(3)
            .with_small_inputs(true)
    }

    #[test]
    fn test_save_and_load_model() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = tiny_config();
        let model = config.init::<TestBackend>(&device);

        save_model_config(dir.path(), &config).unwrap();
        save_weights(&model, dir.path(), LATEST_WEIGHTS).unwrap();
        assert!(weights_exist(dir.path(), LATEST_WEIGHTS));
        assert!(!weights_exist(dir.path(), BEST_WEIGHTS));

        let (loaded, loaded_config) =
            load_model::<TestBackend>(dir.path(), LATEST_WEIGHTS, &device).unwrap();
        assert_eq!(loaded_config.block_config, vec![1, 1]);

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 4, 4], &device);
        let expected: Vec<f32> = model.forward(input.clone()).into_data().to_vec().unwrap();
        let actual: Vec<f32> = loaded.forward(input).into_data().to_vec().unwrap();
        // CompactRecorder stores half precision
        for (a, b) in expected.iter().zip(&actual) {
            assert!((a - b).abs() < 1e-2 * (1.0 + a.abs()), "{a} vs {b}");
        }
    }

    #[test]
    fn test_missing_weights() {
        let dir = tempfile::tempdir().unwrap();
        save_model_config(dir.path(), &tiny_config()).unwrap();
        let err = load_model::<TestBackend>(dir.path(), BEST_WEIGHTS, &Default::default()).unwrap_err();
        assert!(matches!(err, DefectError::PathNotFound(_)));
    }

    #[test]
    fn test_remove_weights() {
        let dir = tempfile::tempdir().unwrap();
        let model = tiny_config().init::<TestBackend>(&Default::default());
        save_weights(&model, dir.path(), BEST_WEIGHTS).unwrap();

        assert!(remove_weights(dir.path(), BEST_WEIGHTS).unwrap());
        assert!(!weights_exist(dir.path(), BEST_WEIGHTS));
        assert!(!remove_weights(dir.path(), BEST_WEIGHTS).unwrap());
    }

    #[test]
    fn test_metadata_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let meta = CheckpointMeta::now(3, 10, 0.1, (1.2, 0.4), None, 1.0);
        save_metadata(dir.path(), &meta).unwrap();
        assert_eq!(load_metadata(dir.path()).unwrap(), meta);
    }
}
