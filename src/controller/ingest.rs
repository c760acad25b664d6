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

use anyhow::{Context, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::watermark::ContiguousWatermark;
use crate::envelope::Envelope;
use crate::liveness::LivenessTracker;
use crate::protocol::{AckMessage, NodeStatus};
use crate::sink::{IngestSink, UpsertOutcome};

/// Ingest counters
#[derive(Debug, Default)]
pub struct IngestStats {
    pub inserted: AtomicU64,
    pub duplicates: AtomicU64,
    pub failed: AtomicU64,
    pub undecodable: AtomicU64,
}

/// Writes arriving envelopes to the sink and tracks per-node watermarks
pub struct Ingestor {
    sink: Arc<dyn IngestSink>,
    liveness: Arc<LivenessTracker>,
    watermarks: DashMap<String, ContiguousWatermark>,
    max_retries: u32,
    stats: IngestStats,
}

impl Ingestor {
    pub fn new(sink: Arc<dyn IngestSink>, liveness: Arc<LivenessTracker>, max_retries: u32) -> Self {
        Self {
            sink,
            liveness,
            watermarks: DashMap::new(),
            max_retries,
            stats: IngestStats::default(),
        }
    }

    pub fn liveness(&self) -> Arc<LivenessTracker> {
        self.liveness.clone()
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Store one envelope. Liveness is updated on arrival, before and
    /// regardless of the write; the watermark only after the write is durable.
    pub async fn ingest(&self, envelope: &Envelope) -> Result<UpsertOutcome> {
        self.liveness
            .on_arrival(&envelope.node_id, &envelope.sensor_key, envelope.sample_ts);

        let outcome = match self.sink.upsert_with_retry(envelope, self.max_retries).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                return Err(e).with_context(|| {
                    format!("storing seq {} of node '{}'", envelope.seq, envelope.node_id)
                });
            }
        };
        match outcome {
            UpsertOutcome::Inserted => self.stats.inserted.fetch_add(1, Ordering::Relaxed),
            UpsertOutcome::Duplicate => self.stats.duplicates.fetch_add(1, Ordering::Relaxed),
        };

        let mut watermark = self
            .watermarks
            .entry(envelope.node_id.clone())
            .or_default();
        if watermark.observe(envelope.seq, envelope.sample_ts) {
            debug!(
                "Watermark of node '{}' now at seq {}",
                envelope.node_id,
                watermark.acked()
            );
        }
        Ok(outcome)
    }

    /// Decode and store a raw data payload
    pub async fn ingest_payload(&self, payload: &[u8]) -> Result<UpsertOutcome> {
        let envelope = match Envelope::from_payload(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.stats.undecodable.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };
        self.ingest(&envelope).await
    }

    /// Apply a node status heartbeat: liveness, the node's own ack floor,
    /// and its loss ranges
    pub fn on_status(&self, status: &NodeStatus) {
        self.liveness.on_heartbeat(&status.node_id);

        let mut watermark = self.watermarks.entry(status.node_id.clone()).or_default();
        if watermark.raise_floor(status.last_acked_seq) {
            info!(
                "Watermark of node '{}' raised to its acked seq {}",
                status.node_id, status.last_acked_seq
            );
        }
        for event in &status.loss_events {
            if watermark.mark_lost(event.range_start_seq, event.range_end_seq) {
                warn!(
                    "Node '{}' lost seq {}..={} ({:?}), watermark now {}",
                    status.node_id,
                    event.range_start_seq,
                    event.range_end_seq,
                    event.reason,
                    watermark.acked()
                );
            }
        }
        if let Some(fault) = &status.health_fault {
            warn!("Node '{}' reports health fault: {}", status.node_id, fault);
        }
    }

    pub fn on_status_payload(&self, payload: &[u8]) -> Result<()> {
        let status: NodeStatus = serde_json::from_slice(payload)?;
        self.on_status(&status);
        Ok(())
    }

    pub fn acked_seq(&self, node_id: &str) -> u64 {
        self.watermarks
            .get(node_id)
            .map(|w| w.acked())
            .unwrap_or(0)
    }

    /// Current ack for every node with a nonzero watermark
    pub fn ack_messages(&self) -> Vec<AckMessage> {
        let mut acks: Vec<AckMessage> = self
            .watermarks
            .iter()
            .filter(|w| w.acked() > 0)
            .map(|w| AckMessage {
                node_id: w.key().clone(),
                acked_seq: w.acked(),
                acked_sample_ts: w.acked_sample_ts(),
            })
            .collect();
        acks.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        acks
    }
}
