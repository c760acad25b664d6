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

//! Wire messages exchanged between nodes and the controller, and the key
//! expressions they travel on.
//!
//! - `<prefix>/<node>/data`   protobuf `Envelope` payloads (live and replay)
//! - `<prefix>/<node>/status` JSON [`NodeStatus`] heartbeats
//! - `<prefix>/<node>/ack`    JSON [`AckMessage`] from the controller
//! - `<prefix>/liveness/<node>` queryable answering [`LivenessReport`]
//! - `<prefix>/<node>/sample/<sensor_key>` JSON [`SampleInput`] from local producers

use serde::{Deserialize, Serialize};

use crate::envelope::TimeQuality;
use crate::loss::LossEvent;

/// Raw sample handed to a node by a local producer, JSON encoded. The
/// sensor key is taken from the key expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleInput {
    /// Producer-observed time, epoch milliseconds
    pub sample_ts: i64,
    pub value: f64,
    #[serde(default = "unknown_quality")]
    pub time_quality: TimeQuality,
}

fn unknown_quality() -> TimeQuality {
    TimeQuality::Unknown
}

/// Controller acknowledgement of durable ingest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    pub node_id: String,
    pub acked_seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acked_sample_ts: Option<i64>,
}

/// Replay publisher state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplayState {
    #[default]
    Idle,
    Draining,
}

/// Node status heartbeat, published outside of replay rate limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: String,
    /// Epoch milliseconds at publish time
    pub published_at: i64,
    pub spool_bytes: u64,
    pub open_segments: usize,
    pub closed_segments: usize,
    /// Segment-granular; see [`crate::spool::SpoolStatus`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_unacked_age_ms: Option<i64>,
    pub last_acked_seq: u64,
    pub last_written_seq: u64,
    pub last_published_seq: u64,
    #[serde(default)]
    pub loss_events: Vec<LossEvent>,
    pub replay_state: ReplayState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_drain_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_fault: Option<String>,
    #[serde(default)]
    pub corrupt_frames_skipped: u64,
}

/// Controller answer for a liveness query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessReport {
    pub node_id: String,
    pub online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_rx_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sample_ts: Option<i64>,
    pub acked_seq: u64,
    #[serde(default)]
    pub stale_sensors: Vec<String>,
}

pub fn data_key(prefix: &str, node_id: &str) -> String {
    format!("{}/{}/data", prefix, node_id)
}

pub fn status_key(prefix: &str, node_id: &str) -> String {
    format!("{}/{}/status", prefix, node_id)
}

pub fn ack_key(prefix: &str, node_id: &str) -> String {
    format!("{}/{}/ack", prefix, node_id)
}

/// Subscription for every local sample of a node
pub fn sample_key_expr(prefix: &str, node_id: &str) -> String {
    format!("{}/{}/sample/**", prefix, node_id)
}

/// Sensor key from `<prefix>/<node>/sample/<sensor_key>`
pub fn sensor_from_sample_key<'a>(prefix: &str, node_id: &str, key: &'a str) -> Option<&'a str> {
    let sensor = key
        .strip_prefix(prefix)?
        .strip_prefix('/')?
        .strip_prefix(node_id)?
        .strip_prefix("/sample/")?;
    (!sensor.is_empty()).then_some(sensor)
}

pub fn liveness_key(prefix: &str, node_id: &str) -> String {
    format!("{}/liveness/{}", prefix, node_id)
}

/// Extract the node id from `<prefix>/<node>/<kind>`
pub fn node_from_key<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?.strip_prefix('/')?;
    let (node, _kind) = rest.split_once('/')?;
    if node.is_empty() {
        return None;
    }
    Some(node)
}
