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

//! Arrival-based liveness on the controller.
//!
//! A node is online when anything from it arrived recently, regardless of
//! how old the data is. A sensor is fresh when its newest `sample_ts` is
//! recent. Replaying a two hour backlog therefore keeps the node online
//! while its sensors stay stale until replay reaches current data.

use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::clock::Clock;
use crate::protocol::LivenessReport;

const NEVER: i64 = i64::MIN;

/// Receipt time and newest sample time, both only moving forward
#[derive(Debug)]
pub struct LivenessRecord {
    last_rx_at: AtomicI64,
    last_sample_ts: AtomicI64,
}

impl Default for LivenessRecord {
    fn default() -> Self {
        Self {
            last_rx_at: AtomicI64::new(NEVER),
            last_sample_ts: AtomicI64::new(NEVER),
        }
    }
}

impl LivenessRecord {
    fn received(&self, rx_at: i64) {
        self.last_rx_at.fetch_max(rx_at, Ordering::AcqRel);
    }

    fn sampled(&self, sample_ts: i64) {
        self.last_sample_ts.fetch_max(sample_ts, Ordering::AcqRel);
    }

    pub fn last_rx_at(&self) -> Option<i64> {
        match self.last_rx_at.load(Ordering::Acquire) {
            NEVER => None,
            at => Some(at),
        }
    }

    pub fn last_sample_ts(&self) -> Option<i64> {
        match self.last_sample_ts.load(Ordering::Acquire) {
            NEVER => None,
            ts => Some(ts),
        }
    }
}

pub struct LivenessTracker {
    nodes: DashMap<String, Arc<LivenessRecord>>,
    /// Keyed by (node_id, sensor_key); sensor names are only unique per node
    sensors: DashMap<(String, String), Arc<LivenessRecord>>,
    online_timeout_ms: i64,
    freshness_timeout_ms: i64,
    clock: Arc<dyn Clock>,
}

impl LivenessTracker {
    pub fn new(online_timeout: Duration, freshness_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            nodes: DashMap::new(),
            sensors: DashMap::new(),
            online_timeout_ms: online_timeout.as_millis() as i64,
            freshness_timeout_ms: freshness_timeout.as_millis() as i64,
            clock,
        }
    }

    fn node(&self, node_id: &str) -> Arc<LivenessRecord> {
        if let Some(record) = self.nodes.get(node_id) {
            return record.clone();
        }
        self.nodes
            .entry(node_id.to_string())
            .or_insert_with(|| {
                debug!("Tracking liveness of node '{}'", node_id);
                Arc::new(LivenessRecord::default())
            })
            .clone()
    }

    /// Record an envelope arrival, live or replayed
    pub fn on_arrival(&self, node_id: &str, sensor_key: &str, sample_ts: i64) {
        let now = self.clock.now_ms();
        let node = self.node(node_id);
        node.received(now);
        node.sampled(sample_ts);

        let sensor = self
            .sensors
            .entry((node_id.to_string(), sensor_key.to_string()))
            .or_default()
            .clone();
        sensor.received(now);
        sensor.sampled(sample_ts);
    }

    /// Record a status heartbeat: proves the node is reachable, says
    /// nothing about sample freshness
    pub fn on_heartbeat(&self, node_id: &str) {
        self.node(node_id).received(self.clock.now_ms());
    }

    pub fn is_online(&self, node_id: &str) -> bool {
        let now = self.clock.now_ms();
        self.nodes
            .get(node_id)
            .and_then(|record| record.last_rx_at())
            .is_some_and(|rx_at| now - rx_at < self.online_timeout_ms)
    }

    pub fn is_fresh(&self, node_id: &str, sensor_key: &str) -> bool {
        self.sensors
            .get(&(node_id.to_string(), sensor_key.to_string()))
            .is_some_and(|record| self.fresh(&record))
    }

    fn fresh(&self, record: &LivenessRecord) -> bool {
        let now = self.clock.now_ms();
        record
            .last_sample_ts()
            .is_some_and(|ts| now - ts < self.freshness_timeout_ms)
    }

    pub fn known_nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self.nodes.iter().map(|e| e.key().clone()).collect();
        nodes.sort();
        nodes
    }

    pub fn report(&self, node_id: &str, acked_seq: u64) -> LivenessReport {
        let record = self.nodes.get(node_id).map(|r| r.clone());
        let mut stale_sensors: Vec<String> = self
            .sensors
            .iter()
            .filter(|e| e.key().0 == node_id && !self.fresh(e.value()))
            .map(|e| e.key().1.clone())
            .collect();
        stale_sensors.sort();

        LivenessReport {
            node_id: node_id.to_string(),
            online: self.is_online(node_id),
            last_rx_at: record.as_ref().and_then(|r| r.last_rx_at()),
            last_sample_ts: record.as_ref().and_then(|r| r.last_sample_ts()),
            acked_seq,
            stale_sensors,
        }
    }
}
