//! Application configuration loaded from TOML.
//!
//! Every section has defaults, so a config file only needs the keys it
//! changes:
//!
//! ```toml
//! [training]
//! n_epochs = 100
//! batch_size = 64
//!
//! [transform]
//! crop_size = 192
//! ```

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::dataset::{SplitConfig, TransformConfig};
use crate::model::ModelOptions;
use crate::training::TrainingConfig;
use crate::utils::error::{DefectError, Result};

/// Top-level configuration shared by all CLI commands
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Folder discovery and train/validation list splitting
    pub split: SplitConfig,
    /// Image transforms and normalization
    pub transform: TransformConfig,
    /// Optimizer, schedule and loop settings
    pub training: TrainingConfig,
    /// DenseNet hyperparameters
    pub model: ModelOptions,
}

impl AppConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        load_toml_config(path)
    }

    /// Load from a TOML file when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Read and deserialize a TOML file
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path).map_err(|e| {
        DefectError::Config(format!("Failed to read config {}: {e}", path.display()))
    })?;

    toml::from_str(&content).map_err(|e| {
        DefectError::Config(format!("Failed to parse config {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[training]\nn_epochs = 7\nbatch_size = 4\n\n[model]\ndepth = 40\n"
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.training.n_epochs, 7);
        assert_eq!(config.training.batch_size, 4);
        assert_eq!(config.training.valid_size, TrainingConfig::default().valid_size);
        assert_eq!(config.model.depth, 40);
        assert_eq!(config.model.growth_rate, 32);
        assert_eq!(config.transform.crop_size, 224);
        assert_eq!(config.split.classes.len(), 12);
    }

    #[test]
    fn test_class_table_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[split]\nval_fraction = 0.2\n\n[[split.classes]]\nlabel = 0\nname = \"ok\"\nkeyword = \"good\"\n\n[[split.classes]]\nlabel = 1\nname = \"bad\"\nkeyword = \"scratch\"\n"
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.split.val_fraction, 0.2);
        assert_eq!(config.split.classes.len(), 2);
        assert_eq!(config.split.classes[1].keyword, "scratch");
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = AppConfig::load(Path::new("/nonexistent/densenet.toml")).unwrap_err();
        assert!(matches!(err, DefectError::Config(_)));
    }

    #[test]
    fn test_load_or_default_without_path() {
        let config = AppConfig::load_or_default(None).unwrap();
        assert_eq!(config.training.batch_size, 30);
    }
}
