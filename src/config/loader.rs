// Configuration loader with environment variable substitution

use super::types::*;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

pub struct ConfigLoader;

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}").expect("static regex is valid")
    })
}

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<TelemetryConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        Self::load_str(&content)
    }

    /// Parse configuration text (after substitution) and validate it
    pub fn load_str(content: &str) -> Result<TelemetryConfig> {
        let content = Self::substitute_env_vars(content);

        let config: TelemetryConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${NODE_ID:-pump-station-7} -> pump-station-7 (if NODE_ID not set)
    fn substitute_env_vars(content: &str) -> String {
        env_pattern()
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default_value = caps.get(2).map(|m| m.as_str());

                match std::env::var(var_name) {
                    Ok(value) => value,
                    Err(_) => match default_value {
                        Some(default) => default.to_string(),
                        // Keep original if no default and var not found
                        None => format!("${{{}}}", var_name),
                    },
                }
            })
            .to_string()
    }

    /// Validate configuration
    pub fn validate(config: &TelemetryConfig) -> Result<()> {
        if config.node.node_id.is_empty() {
            bail!("node.node_id cannot be empty");
        }
        if config.node.node_id.contains('/') || config.node.node_id.contains('*') {
            bail!("node.node_id must not contain '/' or '*'");
        }
        if config.node.spool_dir.is_empty() {
            bail!("node.spool_dir cannot be empty");
        }

        let spool = &config.spool;
        if spool.segment_rotation_bytes == 0 {
            bail!("spool.segment_rotation_bytes must be > 0");
        }
        if spool.segment_rotation_seconds == 0 {
            bail!("spool.segment_rotation_seconds must be > 0");
        }
        if let Some(max_bytes) = spool.max_spool_bytes {
            if spool.segment_rotation_bytes > max_bytes / 2 {
                bail!("spool.segment_rotation_bytes must be at most half of spool.max_spool_bytes");
            }
        }
        if spool.fsync_interval_seconds <= 0.0 {
            bail!("spool.fsync_interval_seconds must be > 0");
        }
        if spool.free_space_probe_seconds == 0 {
            bail!("spool.free_space_probe_seconds must be > 0");
        }

        let replay = &config.replay;
        if replay.replay_msgs_per_sec == 0 {
            bail!("replay.replay_msgs_per_sec must be > 0");
        }
        if replay.replay_bytes_per_sec == 0 {
            bail!("replay.replay_bytes_per_sec must be > 0");
        }
        if replay.chunk_frames == 0 || replay.live_batch_size == 0 {
            bail!("replay.chunk_frames and replay.live_batch_size must be > 0");
        }
        if replay.live_queue_capacity == 0 {
            bail!("replay.live_queue_capacity must be > 0");
        }
        if replay.heartbeat_interval_ms == 0 {
            bail!("replay.heartbeat_interval_ms must be > 0");
        }
        if replay.ack_stall_timeout_ms == 0 {
            bail!("replay.ack_stall_timeout_ms must be > 0");
        }

        let controller = &config.controller;
        if controller.online_timeout_seconds == 0 || controller.freshness_timeout_seconds == 0 {
            bail!("controller timeouts must be > 0");
        }
        if controller.ack_interval_ms == 0 {
            bail!("controller.ack_interval_ms must be > 0");
        }

        match controller.sink.backend.as_str() {
            "reductstore" => {
                if controller.sink.backend_config.as_reductstore().is_none() {
                    bail!("reductstore sink selected but reductstore config missing");
                }
            }
            "filesystem" => {
                if controller.sink.backend_config.as_filesystem().is_none() {
                    bail!("filesystem sink selected but filesystem config missing");
                }
            }
            "memory" => {}
            unknown => bail!(
                "Unknown sink backend: '{}'. Supported: reductstore, filesystem, memory",
                unknown
            ),
        }

        Ok(())
    }
}
