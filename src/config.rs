use std::path::Path;

use crate::checkpoint::CheckpointManagerConfig;
use crate::error::ConfigError;
use crate::optim::SplatAdamConfig;
use crate::scene::GaussianModelConfig;

/// Highest SH degree with a defined basis.
pub const MAX_SH_DEGREE: usize = 4;

/// Session-level training settings.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub seed: u64,
    /// Number of device generators kept in the RNG context.
    pub num_devices: usize,
    pub num_points: usize,
    /// Enable the next SH band every this many steps; 0 disables.
    pub sh_increase_interval: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            seed: 0,
            num_devices: 1,
            num_points: 10_000,
            sh_increase_interval: 1_000,
        }
    }
}

/// Top-level application configuration, loadable from TOML.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub training: TrainingConfig,
    pub model: GaussianModelConfig,
    pub optimizer: SplatAdamConfig,
    pub checkpoint: CheckpointManagerConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!(
                "config file '{}' not found, using defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.training.num_points == 0 {
            return Err(ConfigError::Validation(
                "training.num_points must be > 0".into(),
            ));
        }

        if self.model.sh_degree > MAX_SH_DEGREE {
            return Err(ConfigError::Validation(format!(
                "model.sh_degree must be <= {MAX_SH_DEGREE}"
            )));
        }
        if self.model.initial_extent <= 0.0 {
            return Err(ConfigError::Validation(
                "model.initial_extent must be > 0".into(),
            ));
        }
        if self.model.initial_scale <= 0.0 {
            return Err(ConfigError::Validation(
                "model.initial_scale must be > 0".into(),
            ));
        }
        if self.model.initial_opacity <= 0.0 || self.model.initial_opacity >= 1.0 {
            return Err(ConfigError::Validation(
                "model.initial_opacity must be in (0, 1)".into(),
            ));
        }

        // Optimizer validations
        if !(0.0..1.0).contains(&self.optimizer.beta_1) {
            return Err(ConfigError::Validation(
                "optimizer.beta_1 must be in [0, 1)".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.optimizer.beta_2) {
            return Err(ConfigError::Validation(
                "optimizer.beta_2 must be in [0, 1)".into(),
            ));
        }
        if self.optimizer.epsilon <= 0.0 {
            return Err(ConfigError::Validation(
                "optimizer.epsilon must be > 0".into(),
            ));
        }
        let learning_rates = [
            ("position_lr", self.optimizer.position_lr),
            ("feature_lr", self.optimizer.feature_lr),
            ("opacity_lr", self.optimizer.opacity_lr),
            ("scaling_lr", self.optimizer.scaling_lr),
            ("rotation_lr", self.optimizer.rotation_lr),
        ];
        for (name, lr) in learning_rates {
            if lr <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "optimizer.{name} must be > 0"
                )));
            }
        }
        if self.optimizer.feature_rest_divisor <= 0.0 {
            return Err(ConfigError::Validation(
                "optimizer.feature_rest_divisor must be > 0".into(),
            ));
        }

        if self.checkpoint.interval == 0 {
            return Err(ConfigError::Validation(
                "checkpoint.interval must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a TOML string with all default values (useful for creating
    /// example config files).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&AppConfig::default()).expect("default config serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        config.validate().expect("default config should be valid");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[optimizer]
position_lr = 0.0002
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!((config.optimizer.position_lr - 0.0002).abs() < 1e-12);
        // Other fields should be defaults
        assert!((config.optimizer.beta_2 - 0.999).abs() < 1e-6);
        assert_eq!(config.model.sh_degree, 3);
        assert_eq!(config.checkpoint.interval, 7_000);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        let default = AppConfig::default();
        assert_eq!(config.training.num_points, default.training.num_points);
        assert!(config.checkpoint.strict_optimizer);
    }

    #[test]
    fn test_validation_rejects_zero_points() {
        let mut config = AppConfig::default();
        config.training.num_points = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_sh_degree_too_high() {
        let mut config = AppConfig::default();
        config.model.sh_degree = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_opacity_out_of_range() {
        let mut config = AppConfig::default();
        config.model.initial_opacity = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_invalid_beta() {
        let mut config = AppConfig::default();
        config.optimizer.beta_1 = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_negative_lr() {
        let mut config = AppConfig::default();
        config.optimizer.rotation_lr = -0.001;
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "config validation error: optimizer.rotation_lr must be > 0"
        );
    }

    #[test]
    fn test_validation_rejects_zero_checkpoint_interval() {
        let mut config = AppConfig::default();
        config.checkpoint.interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = AppConfig::load_or_default(Path::new("nonexistent_config.toml")).unwrap();
        assert_eq!(config.training.num_points, 10_000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"
[checkpoint]
checkpoint_dir = "output/run1"
keep_last_n = 3
strict_optimizer = false
"#
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.checkpoint.checkpoint_dir, Path::new("output/run1"));
        assert_eq!(config.checkpoint.keep_last_n, 3);
        assert!(!config.checkpoint.strict_optimizer);
        // Others are defaults
        assert_eq!(config.checkpoint.interval, 7_000);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[training]\nnum_points = 0\n").unwrap();
        assert!(matches!(
            AppConfig::load(&path),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_default_toml_roundtrips() {
        let toml_str = AppConfig::default_toml();
        let config: AppConfig = toml::from_str(&toml_str).unwrap();
        config.validate().expect("roundtripped config should be valid");
    }
}
