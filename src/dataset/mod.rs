//! Dataset module for folder-organized defect images
//!
//! This module provides:
//! - The class table mapping folder names to labels
//! - Label-list file reading and writing
//! - Stratified train/validation list generation
//! - Image transforms and Burn dataset/batcher integration
//! - Index splitting and subset batching for the training loop

pub mod burn_dataset;
pub mod classes;
pub mod label_list;
pub mod sampler;
pub mod split;
pub mod transform;

pub use burn_dataset::{
    DefaultLoader, DefectBatch, DefectBatcher, DefectSample, ImageLoader, LabelListDataset,
    RawDefectItem,
};
pub use classes::{default_class_rules, ClassMap, ClassRule};
pub use label_list::{read_label_list, write_label_list, LabelEntry};
pub use sampler::{train_valid_split, SubsetLoader};
pub use split::{split_dataset, SplitConfig, SplitSummary};
pub use transform::{Transform, TransformConfig, TransformMode};
