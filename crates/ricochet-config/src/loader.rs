//! Configuration loading and validation.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::RicochetConfig;

const KNOWN_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Load and validate a full Ricochet configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<RicochetConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: RicochetConfig = serde_yaml::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate a configuration, independent of how it was produced.
pub fn validate_config(config: &RicochetConfig) -> Result<(), ConfigError> {
    if config.version == 0 {
        return Err(ConfigError::Invalid(
            "version must be greater than 0".to_string(),
        ));
    }

    if config.app.name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "app.name must not be empty".to_string(),
        ));
    }

    if config.store.max_undo_stack == 0 {
        return Err(ConfigError::Invalid(
            "store.max_undo_stack must be at least 1".to_string(),
        ));
    }

    if !KNOWN_LOG_LEVELS.contains(&config.observability.log_level.as_str()) {
        return Err(ConfigError::Invalid(format!(
            "observability.log_level '{}' is not one of {:?}",
            config.observability.log_level, KNOWN_LOG_LEVELS
        )));
    }

    Ok(())
}
