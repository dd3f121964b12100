//! # Ricochet Config
//!
//! Unified single-file configuration for Ricochet stores. A single
//! `ricochet.yaml` configures the store flags (debug, patterns, undo) and
//! observability settings, and [`build_store`] turns a validated config
//! into a ready [`ricochet_core::Store`].

mod loader;

pub use loader::{load_config, validate_config, ConfigError};

use serde::Deserialize;

use ricochet_core::{Store, StoreOptions};

/// Top-level configuration schema for Ricochet.
#[derive(Debug, Clone, Deserialize)]
pub struct RicochetConfig {
    /// Config schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for RicochetConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            store: StoreConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_env(),
        }
    }
}

fn default_app_name() -> String {
    "ricochet".to_string()
}

fn default_env() -> String {
    "development".to_string()
}

/// Store construction flags; mirrors [`StoreOptions`].
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub patterns: bool,
    #[serde(default)]
    pub undo: bool,
    #[serde(default = "default_max_undo_stack")]
    pub max_undo_stack: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            debug: false,
            patterns: false,
            undo: false,
            max_undo_stack: default_max_undo_stack(),
        }
    }
}

fn default_max_undo_stack() -> usize {
    10
}

impl StoreConfig {
    /// Convert into engine options.
    pub fn options(&self) -> StoreOptions {
        StoreOptions::new()
            .with_debug(self.debug)
            .with_patterns(self.patterns)
            .with_undo(self.undo)
            .with_max_undo_stack(self.max_undo_stack)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level filter for the tracing subscriber: trace, debug, info,
    /// warn, or error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Build a store from a validated configuration.
pub fn build_store(config: &RicochetConfig) -> Store {
    Store::new(config.store.options())
}
