//! # DenseNet Defect Classification
//!
//! A Rust library for training DenseNet-BC image classifiers on folder-organized
//! defect datasets using the Burn framework.
//!
//! ## Modules
//!
//! - `dataset`: Label-list files, stratified splitting, transforms and batching
//! - `model`: DenseNet-BC architecture built with Burn
//! - `training`: Epoch loops, learning rate scheduling, checkpoints and results logging
//! - `utils`: Logging, metrics, configuration and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use densenet_defects::dataset::LabelListDataset;
//! use densenet_defects::model::DenseNetConfig;
//!
//! let dataset = LabelListDataset::from_file("train.txt")?;
//! let config = DenseNetConfig::from_depth(100, 32, 12)?;
//! // ... training
//! ```

pub mod backend;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::{
    DefectBatch, DefectBatcher, DefectSample, LabelEntry, LabelListDataset, SplitConfig,
    TransformConfig,
};
pub use model::{DenseNet, DenseNetConfig};
pub use training::{train, EpochSummary, TrainingConfig, TrainingReport};
pub use utils::config::AppConfig;
pub use utils::error::{DefectError, Result};
pub use utils::metrics::{AverageMeter, ConfusionMatrix};

/// Default number of defect classes (normal + 11 defect types)
pub const NUM_CLASSES: usize = 12;

/// Default crop size fed to the network
pub const IMAGE_SIZE: usize = 224;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
