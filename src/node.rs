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

//! Node runtime: wires the spool, live queue, ack tracker and replay
//! publisher together.
//!
//! The [`Spool`] is owned by one dedicated writer thread and only reached
//! through [`WriterCommand`]s, so appends, rotation, cap enforcement and ack
//! deletion are serialized without locks. Producers hold a cheap
//! [`Producer`] handle.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::ack::{AckOutcome, AckTracker};
use crate::clock::Clock;
use crate::config::TelemetryConfig;
use crate::envelope::{Envelope, TimeQuality};
use crate::error::{SpoolError, SpoolResult};
use crate::fsprobe::FreeSpaceProbe;
use crate::live::{LiveItem, LiveQueue};
use crate::replay::{ReplayPublisher, ReplayStats};
use crate::spool::{AppendReceipt, Spool, SpoolOptions, SpoolShared, SpoolStatus};
use crate::transport::Transport;

const COMMAND_CHANNEL_CAPACITY: usize = 1024;

/// Requests served by the writer thread
pub enum WriterCommand {
    Append {
        envelope: Envelope,
        reply: oneshot::Sender<SpoolResult<AppendReceipt>>,
    },
    /// Batched fsync, age rotation, caps
    Tick,
    ProbeFreeSpace,
    ApplyAcks,
    Rotate {
        reply: oneshot::Sender<SpoolResult<()>>,
    },
    Sync {
        reply: oneshot::Sender<SpoolResult<()>>,
    },
    Status {
        reply: oneshot::Sender<SpoolStatus>,
    },
    Shutdown,
}

/// Handle producers use to hand samples to the spool
#[derive(Clone)]
pub struct Producer {
    node_id: String,
    tx: mpsc::Sender<WriterCommand>,
}

impl Producer {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Spool one sample; resolves once it is in the open segment
    pub async fn append(
        &self,
        sensor_key: &str,
        sample_ts: i64,
        value: f64,
        time_quality: TimeQuality,
    ) -> SpoolResult<AppendReceipt> {
        let envelope = Envelope::sample(self.node_id.clone(), sensor_key, sample_ts, value, time_quality);
        self.append_envelope(envelope).await
    }

    pub async fn append_envelope(&self, envelope: Envelope) -> SpoolResult<AppendReceipt> {
        let (reply, rx) = oneshot::channel();
        self.send(WriterCommand::Append { envelope, reply }).await?;
        rx.await.map_err(|_| stopped())?
    }

    /// Close the open segment now
    pub async fn rotate(&self) -> SpoolResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(WriterCommand::Rotate { reply }).await?;
        rx.await.map_err(|_| stopped())?
    }

    /// Force the open segment to stable storage
    pub async fn sync(&self) -> SpoolResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(WriterCommand::Sync { reply }).await?;
        rx.await.map_err(|_| stopped())?
    }

    pub async fn status(&self) -> SpoolResult<SpoolStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(WriterCommand::Status { reply }).await?;
        rx.await.map_err(|_| stopped())
    }

    async fn send(&self, command: WriterCommand) -> SpoolResult<()> {
        self.tx.send(command).await.map_err(|_| stopped())
    }
}

fn stopped() -> SpoolError {
    SpoolError::Unavailable("spool writer stopped".to_string())
}

/// Owns the spool on a dedicated thread until shutdown
fn writer_loop(mut spool: Spool, mut rx: mpsc::Receiver<WriterCommand>, live: Arc<LiveQueue>) {
    info!("Spool writer started for node '{}'", spool.node_id());
    while let Some(command) = rx.blocking_recv() {
        match command {
            WriterCommand::Append { envelope, reply } => {
                let mut live_copy = envelope.clone();
                let result = spool.append(envelope);
                if let Ok(receipt) = &result {
                    live_copy.seq = receipt.seq;
                    live.push(LiveItem {
                        envelope: live_copy,
                        receipt: *receipt,
                    });
                }
                let _ = reply.send(result);
            }
            WriterCommand::Tick => {
                if let Err(e) = spool.tick() {
                    error!("Spool maintenance failed: {}", e);
                }
                maintain(&mut spool);
            }
            WriterCommand::ProbeFreeSpace => {
                if let Err(e) = spool.probe_free_space() {
                    error!("Free space enforcement failed: {}", e);
                }
                spool.publish_status();
            }
            WriterCommand::ApplyAcks => maintain(&mut spool),
            WriterCommand::Rotate { reply } => {
                let result = spool.rotate().map(|_| ()).and_then(|_| spool.enforce_caps().map(|_| ()));
                let _ = reply.send(result);
            }
            WriterCommand::Sync { reply } => {
                let _ = reply.send(spool.sync());
            }
            WriterCommand::Status { reply } => {
                let _ = reply.send(spool.status());
            }
            WriterCommand::Shutdown => break,
        }
    }

    if let Err(e) = spool.sync() {
        error!("Final spool sync failed: {}", e);
    }
    spool.publish_status();
    info!("Spool writer for node '{}' stopped", spool.node_id());
}

/// Apply acks, enforce caps, then drop loss events the controller has
/// acknowledged past
fn maintain(spool: &mut Spool) {
    if let Err(e) = spool.enforce_caps() {
        error!("Cap enforcement failed: {}", e);
    }
    let acked = spool.shared().acked_seq();
    match spool.clear_loss_events(acked) {
        Ok(0) => {}
        Ok(cleared) => info!("Cleared {} reported loss event(s) up to seq {}", cleared, acked),
        Err(e) => warn!("Failed to clear loss events: {}", e),
    }
    spool.publish_status();
}

/// A running node
pub struct NodeRuntime {
    producer: Producer,
    shared: Arc<SpoolShared>,
    replay_stats: Arc<ReplayStats>,
    live: Arc<LiveQueue>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    writer: Option<thread::JoinHandle<()>>,
}

impl NodeRuntime {
    /// Open the spool and start every node task
    pub async fn start(
        config: &TelemetryConfig,
        transport: Arc<dyn Transport>,
        probe: Arc<dyn FreeSpaceProbe>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let node_id = config.node.node_id.clone();
        let spool_dir = PathBuf::from(&config.node.spool_dir).join(&node_id);
        let options = SpoolOptions::from_settings(&spool_dir, &config.spool, probe.as_ref())
            .context("resolving spool options")?;
        let spool = Spool::open(node_id.clone(), options, probe, clock.clone())
            .with_context(|| format!("opening spool at {}", spool_dir.display()))?;
        let shared = spool.shared();
        let live = LiveQueue::new(config.replay.live_queue_capacity);

        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let writer = {
            let live = live.clone();
            thread::Builder::new()
                .name("spool-writer".to_string())
                .spawn(move || writer_loop(spool, rx, live))
                .context("spawning spool writer thread")?
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(run_ticker(
            tx.clone(),
            Duration::from_millis(config.spool.fsync_interval_ms().max(100)),
            config.spool.free_space_probe_interval(),
            shutdown_rx.clone(),
        )));

        let tracker = AckTracker::new(node_id.clone(), shared.ack());
        let acks = transport
            .subscribe_acks()
            .await
            .context("subscribing to acks")?;
        tasks.push(tokio::spawn(run_ack_listener(
            tracker,
            acks,
            tx.clone(),
            shutdown_rx.clone(),
        )));

        let publisher = ReplayPublisher::new(
            node_id.clone(),
            transport,
            shared.clone(),
            live.clone(),
            config.replay.clone(),
            clock,
        )
        .context("starting replay publisher")?;
        let replay_stats = publisher.stats();
        let publisher_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = publisher.run(publisher_shutdown).await {
                error!("Replay publisher error: {}", e);
            }
        }));

        info!("Node '{}' running, spool at {}", node_id, spool_dir.display());

        Ok(Self {
            producer: Producer { node_id, tx },
            shared,
            replay_stats,
            live,
            shutdown_tx,
            tasks,
            writer: Some(writer),
        })
    }

    pub fn producer(&self) -> Producer {
        self.producer.clone()
    }

    pub fn shared(&self) -> Arc<SpoolShared> {
        self.shared.clone()
    }

    pub fn replay_stats(&self) -> Arc<ReplayStats> {
        self.replay_stats.clone()
    }

    pub fn live_queue(&self) -> Arc<LiveQueue> {
        self.live.clone()
    }

    /// Stop every task, sync the spool and persist the replay cursor
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Node task ended abnormally: {}", e);
            }
        }
        let _ = self.producer.tx.send(WriterCommand::Shutdown).await;
        if let Some(writer) = self.writer.take() {
            tokio::task::spawn_blocking(move || writer.join())
                .await
                .context("joining spool writer")?
                .map_err(|_| anyhow::anyhow!("spool writer thread panicked"))?;
        }
        Ok(())
    }
}

async fn run_ticker(
    tx: mpsc::Sender<WriterCommand>,
    tick_interval: Duration,
    probe_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(tick_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut probe = tokio::time::interval(probe_interval);
    probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let command = tokio::select! {
            _ = tick.tick() => WriterCommand::Tick,
            _ = probe.tick() => WriterCommand::ProbeFreeSpace,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };
        if tx.send(command).await.is_err() {
            break;
        }
    }
    debug!("Spool ticker stopped");
}

async fn run_ack_listener(
    tracker: AckTracker,
    mut acks: mpsc::Receiver<Vec<u8>>,
    tx: mpsc::Sender<WriterCommand>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            payload = acks.recv() => {
                let Some(payload) = payload else {
                    warn!("Ack subscription closed");
                    break;
                };
                match tracker.on_ack_payload(&payload) {
                    Ok(AckOutcome::Advanced { .. }) => {
                        // The periodic tick applies it if the writer is busy
                        let _ = tx.try_send(WriterCommand::ApplyAcks);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Ignoring malformed ack: {}", e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Ack listener stopped");
}
