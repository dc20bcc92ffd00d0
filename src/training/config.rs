//! Training configuration
//!
//! Defaults reproduce the reference DenseNet-BC recipe: SGD with Nesterov
//! momentum, lr 0.1 divided by 10 at 50% and 75% of training.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::utils::error::{DefectError, Result};

/// Optimizer, schedule and loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Label list the train/validation subsets are drawn from
    pub train_list: PathBuf,

    /// Optional held-out list evaluated once after training
    pub test_list: Option<PathBuf>,

    /// Output directory for weights and `results.csv`
    pub save_dir: PathBuf,

    /// Number of training epochs
    pub n_epochs: usize,

    /// Samples held out for validation (0 disables validation)
    pub valid_size: usize,

    /// Batch size for training and evaluation
    pub batch_size: usize,

    /// Initial learning rate
    pub lr: f64,

    /// Weight decay (L2 regularization)
    pub weight_decay: f64,

    /// SGD momentum
    pub momentum: f64,

    /// Nesterov momentum
    pub nesterov: bool,

    /// Learning rate milestones as fractions of `n_epochs`
    pub milestones: Vec<f64>,

    /// Multiplicative LR decay at each milestone
    pub gamma: f64,

    /// Random seed for reproducibility (None draws one)
    pub seed: Option<u64>,

    /// Log every N batches
    pub print_freq: usize,

    /// Image decoding threads (0 = calling thread)
    pub num_workers: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            train_list: PathBuf::from("train.txt"),
            test_list: None,
            save_dir: PathBuf::from("./logs_densenet"),
            n_epochs: 50,
            valid_size: 420,
            batch_size: 30,
            lr: 0.1,
            weight_decay: 1e-4,
            momentum: 0.9,
            nesterov: true,
            milestones: vec![0.5, 0.75],
            gamma: 0.1,
            seed: None,
            print_freq: 1,
            num_workers: 4,
        }
    }
}

impl TrainingConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.n_epochs == 0 {
            return Err(DefectError::Config("n_epochs must be greater than 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(DefectError::Config("batch_size must be greater than 0".to_string()));
        }
        if self.lr <= 0.0 {
            return Err(DefectError::Config(format!("lr must be positive, got {}", self.lr)));
        }
        if self.print_freq == 0 {
            return Err(DefectError::Config("print_freq must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Milestones in epochs
    pub fn milestone_epochs(&self) -> Vec<f64> {
        self.milestones
            .iter()
            .map(|fraction| fraction * self.n_epochs as f64)
            .collect()
    }

    /// Create a fast training config for debugging
    pub fn debug() -> Self {
        Self {
            n_epochs: 2,
            valid_size: 4,
            batch_size: 4,
            print_freq: 10,
            num_workers: 0,
            seed: Some(42),
            ..Default::default()
        }
    }
}
