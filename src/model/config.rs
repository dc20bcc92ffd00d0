//! Model Configuration Module
//!
//! `ModelOptions` is the user-facing (TOML/CLI) view of the network
//! hyperparameters; it resolves into a `DenseNetConfig`.

use serde::{Deserialize, Serialize};

use super::densenet::DenseNetConfig;
use crate::utils::error::Result;

/// DenseNet hyperparameters as they appear in config files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    /// Network depth; `(depth - 4)` must be divisible by 3
    pub depth: usize,

    /// Channels added by every dense layer
    pub growth_rate: usize,

    /// Number of output classes
    pub num_classes: usize,

    /// 3x3 stem without downsampling
    pub small_inputs: bool,

    /// Dropout after each dense layer
    pub drop_rate: f64,

    /// Bottleneck width multiplier
    pub bn_size: usize,

    /// Transition channel reduction
    pub compression: f64,

    /// Stem output channels
    pub num_init_features: usize,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            depth: 100,
            growth_rate: 32,
            num_classes: crate::NUM_CLASSES,
            small_inputs: false,
            drop_rate: 0.0,
            bn_size: 4,
            compression: 0.5,
            num_init_features: 24,
        }
    }
}

impl ModelOptions {
    /// Resolve into a validated `DenseNetConfig`
    pub fn to_densenet_config(&self) -> Result<DenseNetConfig> {
        let config = DenseNetConfig::from_depth(self.depth, self.growth_rate, self.num_classes)?
            .with_small_inputs(self.small_inputs)
            .with_drop_rate(self.drop_rate)
            .with_bn_size(self.bn_size)
            .with_compression(self.compression)
            .with_num_init_features(self.num_init_features);
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve() {
        let config = ModelOptions::default().to_densenet_config().unwrap();
        assert_eq!(config.block_config, vec![16, 16, 16]);
        assert_eq!(config.growth_rate, 32);
        assert_eq!(config.num_classes, 12);
        assert!(!config.small_inputs);
    }

    #[test]
    fn test_overrides_are_carried() {
        let options = ModelOptions {
            depth: 10,
            growth_rate: 4,
            num_classes: 3,
            small_inputs: true,
            num_init_features: 8,
            ..Default::default()
        };
        let config = options.to_densenet_config().unwrap();
        assert_eq!(config.block_config, vec![1, 1, 1]);
        assert_eq!(config.num_init_features, 8);
        assert!(config.small_inputs);
    }

    #[test]
    fn test_bad_values_rejected() {
        let depth = ModelOptions {
            depth: 50,
            ..Default::default()
        };
        assert!(depth.to_densenet_config().is_err());

        let compression = ModelOptions {
            compression: 0.0,
            ..Default::default()
        };
        assert!(compression.to_densenet_config().is_err());
    }
}
