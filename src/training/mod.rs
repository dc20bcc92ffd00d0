//! Training module for supervised DenseNet training
//!
//! This module provides:
//! - Epoch loops with running-average bookkeeping
//! - SGD with Nesterov momentum and a multi-step learning rate schedule
//! - Checkpointing of weights, model config and metadata
//! - The `results.csv` log and checkpoint evaluation

pub mod checkpoint;
pub mod config;
pub mod evaluate;
pub mod results;
pub mod scheduler;
pub mod trainer;

// Re-export main types for convenience
pub use checkpoint::{load_model, CheckpointMeta, BEST_WEIGHTS, LATEST_WEIGHTS};
pub use config::TrainingConfig;
pub use evaluate::{evaluate, EvaluationConfig, EvaluationReport};
pub use results::ResultsLog;
pub use scheduler::LrScheduler;
pub use trainer::{
    prepare_save_dir, test_epoch, train, train_epoch, EpochStats, EpochSummary, TrainingReport,
};
