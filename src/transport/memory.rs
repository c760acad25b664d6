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

// In-process transport used by tests and local runs

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use super::Transport;
use crate::envelope::Envelope;
use crate::protocol::{AckMessage, NodeStatus};

/// Records everything published; connectivity can be toggled
pub struct MemoryTransport {
    connected: AtomicBool,
    data: Mutex<Vec<Vec<u8>>>,
    statuses: Mutex<Vec<NodeStatus>>,
    ack_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    /// Fail this many upcoming data publishes
    fail_next: AtomicUsize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            data: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            ack_tx: Mutex::new(None),
            fail_next: AtomicUsize::new(0),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_next_publishes(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Raw data payloads in publish order
    pub fn published_payloads(&self) -> Vec<Vec<u8>> {
        self.data.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Decoded envelopes in publish order (undecodable payloads skipped)
    pub fn published(&self) -> Vec<Envelope> {
        self.published_payloads()
            .iter()
            .filter_map(|payload| Envelope::from_payload(payload).ok())
            .collect()
    }

    /// Seqs in publish order
    pub fn published_seqs(&self) -> Vec<u64> {
        self.published().iter().map(|env| env.seq).collect()
    }

    /// Drain the published payloads
    pub fn take_published(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.data.lock().unwrap_or_else(|p| p.into_inner()))
    }

    pub fn statuses(&self) -> Vec<NodeStatus> {
        self.statuses.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Deliver an ack as if it arrived from the controller
    pub async fn deliver_ack(&self, ack: &AckMessage) -> Result<()> {
        let tx = self
            .ack_tx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        match tx {
            Some(tx) => {
                tx.send(serde_json::to_vec(ack)?)
                    .await
                    .map_err(|_| anyhow::anyhow!("ack subscriber dropped"))?;
                Ok(())
            }
            None => bail!("no ack subscriber"),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish_data(&self, payload: Vec<u8>) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            bail!("transport disconnected");
        }
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("injected publish failure");
        }
        self.data
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(payload);
        Ok(())
    }

    async fn publish_status(&self, status: &NodeStatus) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            bail!("transport disconnected");
        }
        self.statuses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(status.clone());
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn subscribe_acks(&self) -> Result<mpsc::Receiver<Vec<u8>>> {
        let (tx, rx) = mpsc::channel(64);
        *self.ack_tx.lock().unwrap_or_else(|p| p.into_inner()) = Some(tx);
        Ok(rx)
    }

    fn transport_type(&self) -> &str {
        "memory"
    }
}
