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

//! Application-level acknowledgement handling on the node.
//!
//! The controller periodically reports the highest contiguous seq it has
//! durably ingested. [`AckState`] is the single value shared between the
//! tracker (writer) and the spool manager (reader); it only ever moves
//! forward, so a `fetch_max` is all the synchronization it needs.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::error::{SpoolError, SpoolResult};
use crate::protocol::AckMessage;

/// Highest seq the controller guarantees is durably persisted
#[derive(Debug, Default)]
pub struct AckState {
    acked_seq: AtomicU64,
    advanced: Notify,
}

impl AckState {
    pub fn new(initial: u64) -> Self {
        Self {
            acked_seq: AtomicU64::new(initial),
            advanced: Notify::new(),
        }
    }

    pub fn acked_seq(&self) -> u64 {
        self.acked_seq.load(Ordering::Acquire)
    }

    /// Compare-and-update-if-greater. Returns true when the value moved.
    pub fn advance(&self, acked_seq: u64) -> bool {
        let previous = self.acked_seq.fetch_max(acked_seq, Ordering::AcqRel);
        if acked_seq > previous {
            self.advanced.notify_waiters();
            true
        } else {
            false
        }
    }

    /// Resolves on the next advance
    pub async fn wait_advanced(&self) {
        self.advanced.notified().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Advanced { from: u64, to: u64 },
    /// Duplicate or regressed acknowledgement
    Stale { current: u64, received: u64 },
    /// Addressed to another node
    Foreign,
}

/// Consumes controller acknowledgements for one node
pub struct AckTracker {
    node_id: String,
    state: Arc<AckState>,
}

impl AckTracker {
    pub fn new(node_id: impl Into<String>, state: Arc<AckState>) -> Self {
        Self {
            node_id: node_id.into(),
            state,
        }
    }

    pub fn state(&self) -> Arc<AckState> {
        self.state.clone()
    }

    pub fn on_ack(&self, ack: &AckMessage) -> AckOutcome {
        if ack.node_id != self.node_id {
            debug!("Ignoring ack for node '{}'", ack.node_id);
            return AckOutcome::Foreign;
        }
        let current = self.state.acked_seq();
        if self.state.advance(ack.acked_seq) {
            info!("Controller acked seq {} (was {})", ack.acked_seq, current);
            AckOutcome::Advanced {
                from: current,
                to: ack.acked_seq,
            }
        } else {
            debug!(
                "Ignoring stale ack {} (current {})",
                ack.acked_seq, current
            );
            AckOutcome::Stale {
                current,
                received: ack.acked_seq,
            }
        }
    }

    /// Parse and apply a raw ack payload from the transport
    pub fn on_ack_payload(&self, payload: &[u8]) -> anyhow::Result<AckOutcome> {
        let ack: AckMessage = serde_json::from_slice(payload)?;
        Ok(self.on_ack(&ack))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedAck {
    acked_seq: u64,
}

pub(crate) fn load_acked_seq(path: &Path) -> SpoolResult<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let bytes = fs::read(path).map_err(|e| SpoolError::io(path, e))?;
    if bytes.is_empty() {
        return Ok(0);
    }
    let persisted: PersistedAck = serde_json::from_slice(&bytes)?;
    Ok(persisted.acked_seq)
}

pub(crate) fn store_acked_seq(path: &Path, acked_seq: u64) -> SpoolResult<()> {
    let tmp_path = path.with_extension("tmp");
    let bytes = serde_json::to_vec(&PersistedAck { acked_seq })?;
    fs::write(&tmp_path, bytes).map_err(|e| SpoolError::write_fault(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| SpoolError::write_fault(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(node: &str, seq: u64) -> AckMessage {
        AckMessage {
            node_id: node.to_string(),
            acked_seq: seq,
            acked_sample_ts: None,
        }
    }

    #[test]
    fn test_ack_only_moves_forward() {
        let tracker = AckTracker::new("node-1", Arc::new(AckState::new(0)));

        assert_eq!(
            tracker.on_ack(&ack("node-1", 10)),
            AckOutcome::Advanced { from: 0, to: 10 }
        );
        assert_eq!(
            tracker.on_ack(&ack("node-1", 7)),
            AckOutcome::Stale { current: 10, received: 7 }
        );
        assert_eq!(
            tracker.on_ack(&ack("node-1", 10)),
            AckOutcome::Stale { current: 10, received: 10 }
        );
        assert_eq!(tracker.state().acked_seq(), 10);
    }

    #[test]
    fn test_foreign_ack_ignored() {
        let tracker = AckTracker::new("node-1", Arc::new(AckState::new(3)));
        assert_eq!(tracker.on_ack(&ack("node-2", 100)), AckOutcome::Foreign);
        assert_eq!(tracker.state().acked_seq(), 3);
    }

    #[test]
    fn test_payload_parsing() {
        let tracker = AckTracker::new("node-1", Arc::new(AckState::new(0)));
        let outcome = tracker
            .on_ack_payload(br#"{"node_id":"node-1","acked_seq":5}"#)
            .unwrap();
        assert_eq!(outcome, AckOutcome::Advanced { from: 0, to: 5 });
        assert!(tracker.on_ack_payload(b"not json").is_err());
    }

    #[test]
    fn test_persisted_ack_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ack.json");
        assert_eq!(load_acked_seq(&path).unwrap(), 0);
        store_acked_seq(&path, 1500).unwrap();
        assert_eq!(load_acked_seq(&path).unwrap(), 1500);
    }

    #[tokio::test]
    async fn test_concurrent_advances_keep_maximum() {
        let state = Arc::new(AckState::new(0));
        let mut handles = vec![];
        for task in 0..8u64 {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..100u64 {
                    state.advance(task * 100 + i);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(state.acked_seq(), 799);
    }
}
