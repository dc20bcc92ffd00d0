//! Model module for the DenseNet-BC classifier using the Burn framework
//!
//! This module provides:
//! - The DenseNet-BC architecture (dense layers, blocks, transitions)
//! - Depth-based configuration and user-facing model options

pub mod config;
pub mod densenet;

// Re-export main types for convenience
pub use config::ModelOptions;
pub use densenet::{DenseBlock, DenseLayer, DenseNet, DenseNetConfig, Transition};
