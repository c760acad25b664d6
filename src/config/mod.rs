// Configuration module for telemetry-spool
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values

mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TelemetryConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<TelemetryConfig> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config);
    ConfigLoader::validate(&config)?;
    Ok(config)
}

/// Allow environment variables to override config values
pub fn apply_env_overrides(config: &mut TelemetryConfig) {
    if let Ok(node_id) = std::env::var("NODE_ID") {
        config.node.node_id = node_id;
    }

    if let Ok(spool_dir) = std::env::var("SPOOL_DIR") {
        config.node.spool_dir = spool_dir;
    }

    if let Ok(reduct_url) = std::env::var("REDUCTSTORE_URL") {
        if let Some(reduct_config) = config.controller.sink.backend_config.as_reductstore_mut() {
            reduct_config.url = reduct_url;
        }
    }

    if let Ok(api_token) = std::env::var("REDUCT_API_TOKEN") {
        if let Some(reduct_config) = config.controller.sink.backend_config.as_reductstore_mut() {
            reduct_config.api_token = Some(api_token);
        }
    }
}
