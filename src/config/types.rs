// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Configuration types for telemetry-spool

use serde::{Deserialize, Serialize};
use std::time::Duration;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TelemetryConfig {
    pub node: NodeSettings,
    #[serde(default)]
    pub zenoh: ZenohConfig,
    #[serde(default)]
    pub spool: SpoolSettings,
    #[serde(default)]
    pub replay: ReplaySettings,
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node identity and spool location
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeSettings {
    pub node_id: String,
    #[serde(default = "default_spool_dir")]
    pub spool_dir: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            node_id: "node-001".to_string(),
            spool_dir: default_spool_dir(),
        }
    }
}

/// Zenoh configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ZenohConfig {
    #[serde(default = "default_mode")]
    pub mode: String, // "peer", "client", or "router"

    #[serde(default)]
    pub connect: Option<ConnectConfig>,

    #[serde(default)]
    pub listen: Option<ListenConfig>,

    /// Root of every key expression this crate publishes or subscribes to
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for ZenohConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            connect: Some(ConnectConfig {
                endpoints: vec!["tcp/localhost:7447".to_string()],
            }),
            listen: None,
            key_prefix: default_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectConfig {
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    pub endpoints: Vec<String>,
}

/// Spool caps, rotation and durability
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpoolSettings {
    /// Hard byte cap; derived from the filesystem size when unset
    #[serde(default)]
    pub max_spool_bytes: Option<u64>,

    #[serde(default = "default_keep_free_bytes")]
    pub keep_free_bytes: u64,

    #[serde(default)]
    pub max_spool_age_seconds: Option<u64>,

    #[serde(default = "default_rotation_bytes")]
    pub segment_rotation_bytes: u64,

    #[serde(default = "default_rotation_seconds")]
    pub segment_rotation_seconds: u64,

    #[serde(default = "default_fsync_interval")]
    pub fsync_interval_seconds: f64,

    #[serde(default = "default_probe_interval")]
    pub free_space_probe_seconds: u64,
}

impl Default for SpoolSettings {
    fn default() -> Self {
        Self {
            max_spool_bytes: None,
            keep_free_bytes: default_keep_free_bytes(),
            max_spool_age_seconds: None,
            segment_rotation_bytes: default_rotation_bytes(),
            segment_rotation_seconds: default_rotation_seconds(),
            fsync_interval_seconds: default_fsync_interval(),
            free_space_probe_seconds: default_probe_interval(),
        }
    }
}

impl SpoolSettings {
    pub fn fsync_interval_ms(&self) -> u64 {
        (self.fsync_interval_seconds * 1000.0).round() as u64
    }

    pub fn free_space_probe_interval(&self) -> Duration {
        Duration::from_secs(self.free_space_probe_seconds)
    }
}

/// Replay throttling and live/heartbeat interleaving
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplaySettings {
    #[serde(default = "default_replay_msgs")]
    pub replay_msgs_per_sec: u32,

    #[serde(default = "default_replay_bytes")]
    pub replay_bytes_per_sec: u64,

    /// Frames read per replay chunk before live traffic gets a turn
    #[serde(default = "default_chunk_frames")]
    pub chunk_frames: usize,

    /// Upper bound of live envelopes sent between two replay chunks
    #[serde(default = "default_live_batch")]
    pub live_batch_size: usize,

    #[serde(default = "default_live_queue_capacity")]
    pub live_queue_capacity: usize,

    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_cursor_persist_ms")]
    pub cursor_persist_interval_ms: u64,

    /// Rewind replay to the acked position when acks stop advancing this
    /// long while published frames remain unacknowledged
    #[serde(default = "default_ack_stall_ms")]
    pub ack_stall_timeout_ms: u64,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            replay_msgs_per_sec: default_replay_msgs(),
            replay_bytes_per_sec: default_replay_bytes(),
            chunk_frames: default_chunk_frames(),
            live_batch_size: default_live_batch(),
            live_queue_capacity: default_live_queue_capacity(),
            heartbeat_interval_ms: default_heartbeat_ms(),
            cursor_persist_interval_ms: default_cursor_persist_ms(),
            ack_stall_timeout_ms: default_ack_stall_ms(),
        }
    }
}

impl ReplaySettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn cursor_persist_interval(&self) -> Duration {
        Duration::from_millis(self.cursor_persist_interval_ms)
    }

    pub fn ack_stall_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_stall_timeout_ms)
    }
}

/// Controller-side liveness, acknowledgement and ingest settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerSettings {
    #[serde(default = "default_online_timeout")]
    pub online_timeout_seconds: u64,

    #[serde(default = "default_freshness_timeout")]
    pub freshness_timeout_seconds: u64,

    #[serde(default = "default_ack_interval_ms")]
    pub ack_interval_ms: u64,

    #[serde(default)]
    pub sink: SinkConfig,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            online_timeout_seconds: default_online_timeout(),
            freshness_timeout_seconds: default_freshness_timeout(),
            ack_interval_ms: default_ack_interval_ms(),
            sink: SinkConfig::default(),
        }
    }
}

impl ControllerSettings {
    pub fn online_timeout(&self) -> Duration {
        Duration::from_secs(self.online_timeout_seconds)
    }

    pub fn freshness_timeout(&self) -> Duration {
        Duration::from_secs(self.freshness_timeout_seconds)
    }

    pub fn ack_interval(&self) -> Duration {
        Duration::from_millis(self.ack_interval_ms)
    }
}

/// Ingest sink configuration with backend selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    /// Backend type: "reductstore", "filesystem", "memory"
    pub backend: String,

    /// Backend-specific configuration
    #[serde(flatten)]
    pub backend_config: BackendConfig,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            backend: "reductstore".to_string(),
            backend_config: BackendConfig::ReductStore {
                reductstore: ReductStoreConfig::default(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BackendConfig {
    ReductStore {
        #[serde(rename = "reductstore")]
        reductstore: ReductStoreConfig,
    },
    Filesystem {
        #[serde(rename = "filesystem")]
        filesystem: FilesystemConfig,
    },
    /// No backend-specific settings (in-memory sink)
    Memory {},
}

impl BackendConfig {
    pub fn as_reductstore(&self) -> Option<&ReductStoreConfig> {
        match self {
            BackendConfig::ReductStore { reductstore } => Some(reductstore),
            _ => None,
        }
    }

    pub fn as_reductstore_mut(&mut self) -> Option<&mut ReductStoreConfig> {
        match self {
            BackendConfig::ReductStore { reductstore } => Some(reductstore),
            _ => None,
        }
    }

    pub fn as_filesystem(&self) -> Option<&FilesystemConfig> {
        match self {
            BackendConfig::Filesystem { filesystem } => Some(filesystem),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReductStoreConfig {
    pub url: String,
    pub bucket_name: String,
    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_retries")]
    pub max_retries: u32,
}

impl Default for ReductStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8383".to_string(),
            bucket_name: "telemetry".to_string(),
            api_token: None,
            timeout_seconds: default_timeout(),
            max_retries: default_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilesystemConfig {
    pub base_path: String,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            base_path: "/data/telemetry".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "compact"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_spool_dir() -> String { "/var/lib/telemetry-spool".to_string() }
fn default_mode() -> String { "peer".to_string() }
fn default_key_prefix() -> String { "telemetry".to_string() }
fn default_keep_free_bytes() -> u64 { 2 * GIB }
fn default_rotation_bytes() -> u64 { 128 * MIB }
fn default_rotation_seconds() -> u64 { 3600 }
fn default_fsync_interval() -> f64 { 1.0 }
fn default_probe_interval() -> u64 { 30 }
fn default_replay_msgs() -> u32 { 2000 }
fn default_replay_bytes() -> u64 { 4_000_000 }
fn default_chunk_frames() -> usize { 256 }
fn default_live_batch() -> usize { 64 }
fn default_live_queue_capacity() -> usize { 4096 }
fn default_heartbeat_ms() -> u64 { 5000 }
fn default_cursor_persist_ms() -> u64 { 2000 }
fn default_ack_stall_ms() -> u64 { 30_000 }
fn default_online_timeout() -> u64 { 30 }
fn default_freshness_timeout() -> u64 { 120 }
fn default_ack_interval_ms() -> u64 { 2000 }
fn default_timeout() -> u64 { 30 }
fn default_retries() -> u32 { 3 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
