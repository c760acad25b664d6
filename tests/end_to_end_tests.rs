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

// End-to-end tests: node runtime, in-memory transport and controller ingest

mod common;

use common::*;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use telemetry_spool::clock::{system_clock, Clock};
use telemetry_spool::config::TelemetryConfig;
use telemetry_spool::controller::Ingestor;
use telemetry_spool::envelope::TimeQuality;
use telemetry_spool::fsprobe::{FixedProbe, FreeSpaceProbe};
use telemetry_spool::liveness::LivenessTracker;
use telemetry_spool::loss::LossReason;
use telemetry_spool::node::NodeRuntime;
use telemetry_spool::sink::MemorySink;
use telemetry_spool::transport::{MemoryTransport, Transport};
use tempfile::TempDir;

fn config(dir: &TempDir, max_frames: u64, rotation_frames: u64) -> TelemetryConfig {
    let mut config = TelemetryConfig::default();
    config.node.node_id = NODE.to_string();
    config.node.spool_dir = dir.path().to_string_lossy().to_string();
    config.spool.max_spool_bytes = Some(max_frames * frame_size());
    config.spool.segment_rotation_bytes = rotation_frames * frame_size();
    config.spool.keep_free_bytes = 0;
    config.spool.fsync_interval_seconds = 0.1;
    config.spool.free_space_probe_seconds = 1;
    config.replay.replay_msgs_per_sec = 1_000_000;
    config.replay.replay_bytes_per_sec = 1_000_000_000;
    config.replay.heartbeat_interval_ms = 100;
    config.replay.cursor_persist_interval_ms = 100;
    config
}

async fn start(config: &TelemetryConfig, transport: &Arc<MemoryTransport>) -> NodeRuntime {
    let transport: Arc<dyn Transport> = transport.clone();
    let probe: Arc<dyn FreeSpaceProbe> = Arc::new(FixedProbe::new(TIB, TIB));
    NodeRuntime::start(config, transport, probe, system_clock())
        .await
        .expect("start node")
}

struct Controller {
    sink: Arc<MemorySink>,
    liveness: Arc<LivenessTracker>,
    ingestor: Ingestor,
}

impl Controller {
    fn new() -> Self {
        let sink = Arc::new(MemorySink::new());
        let clock: Arc<dyn Clock> = system_clock();
        let liveness = Arc::new(LivenessTracker::new(
            Duration::from_secs(30),
            Duration::from_secs(120),
            clock,
        ));
        let ingestor = Ingestor::new(sink.clone(), liveness.clone(), 0);
        Self {
            sink,
            liveness,
            ingestor,
        }
    }

    /// One controller round: ingest data, apply heartbeats, send acks
    async fn pump(&self, transport: &MemoryTransport) {
        for payload in transport.take_published() {
            self.ingestor.ingest_payload(&payload).await.unwrap();
        }
        for status in transport.statuses() {
            self.ingestor.on_status(&status);
        }
        for ack in self.ingestor.ack_messages() {
            transport.deliver_ack(&ack).await.unwrap();
        }
    }
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn append(runtime: &NodeRuntime, range: std::ops::Range<u64>) {
    let producer = runtime.producer();
    for i in range {
        producer
            .append("temp", BASE_TS + i as i64, 21.5, TimeQuality::Synced)
            .await
            .unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_outage_overflow_then_recovery() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 1000, 500);
    let transport = Arc::new(MemoryTransport::new());
    transport.set_connected(false);
    let runtime = start(&config, &transport).await;

    // Outage: 1500 samples against a 1000-frame spool
    append(&runtime, 0..1500).await;
    let status = runtime.producer().status().await.unwrap();
    assert_eq!(status.last_written_seq, 1500);
    assert_eq!(status.loss_events.len(), 1);
    assert_eq!(status.loss_events[0].range_start_seq, 1);
    assert_eq!(status.loss_events[0].range_end_seq, 500);
    assert_eq!(status.loss_events[0].reason, LossReason::MaxSpoolBytes);
    assert!(status.spool_bytes <= 1000 * frame_size());

    let controller = Controller::new();
    transport.set_connected(true);
    let (c, t) = (&controller, &transport);
    eventually("ack to reach 1500", move || async move {
        c.pump(t).await;
        c.ingestor.acked_seq(NODE) == 1500
    })
    .await;

    let records = controller.sink.records();
    assert_eq!(records.len(), 1000);
    let seqs: Vec<u64> = records.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (501..=1500).collect::<Vec<_>>());
    assert!(controller.liveness.is_online(NODE));

    // Acks delete the backlog and retire the reported loss
    let shared = runtime.shared();
    eventually("spool to drain", || {
        let status = shared.status();
        async move {
            status.last_acked_seq == 1500
                && status.closed_segments == 0
                && status.loss_events.is_empty()
        }
    })
    .await;

    runtime.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_resumes_unacked_backlog() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 10_000, 40);
    let transport = Arc::new(MemoryTransport::new());
    transport.set_connected(false);

    let runtime = start(&config, &transport).await;
    append(&runtime, 0..100).await;
    runtime.shutdown().await.unwrap();

    // Node restarts with the link back up
    let transport = Arc::new(MemoryTransport::new());
    let runtime = start(&config, &transport).await;
    append(&runtime, 100..110).await;

    let controller = Controller::new();
    let (c, t) = (&controller, &transport);
    eventually("ack to reach 110", move || async move {
        c.pump(t).await;
        c.ingestor.acked_seq(NODE) == 110
    })
    .await;
    assert_eq!(controller.sink.len(), 110);

    let shared = runtime.shared();
    eventually("acked segments to be deleted", || {
        let status = shared.status();
        async move { status.last_acked_seq == 110 && status.closed_segments == 0 }
    })
    .await;
    runtime.shutdown().await.unwrap();

    // Acks survive the next restart: nothing is replayed again
    let transport = Arc::new(MemoryTransport::new());
    let runtime = start(&config, &transport).await;
    assert_eq!(runtime.shared().acked_seq(), 110);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(transport.published_payloads().is_empty());
    runtime.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connected_samples_flow_live() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 10_000, 1000);
    let transport = Arc::new(MemoryTransport::new());
    let runtime = start(&config, &transport).await;
    let controller = Controller::new();

    append(&runtime, 0..50).await;
    let (c, t) = (&controller, &transport);
    eventually("live samples to be stored", move || async move {
        c.pump(t).await;
        c.ingestor.acked_seq(NODE) == 50
    })
    .await;
    assert_eq!(controller.sink.len(), 50);
    assert_eq!(runtime.replay_stats().last_published_seq(), 50);

    let (pushed, _) = runtime.live_queue().stats();
    assert_eq!(pushed, 50);
    runtime.shutdown().await.unwrap();
}
