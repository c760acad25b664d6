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

// Liveness tests: node reachability follows arrivals, data freshness follows
// sample timestamps

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use telemetry_spool::clock::{Clock, ManualClock};
use telemetry_spool::controller::Ingestor;
use telemetry_spool::liveness::LivenessTracker;
use telemetry_spool::sink::MemorySink;

const MINUTE: i64 = 60_000;
const HOUR: i64 = 60 * MINUTE;

fn tracker(clock: &Arc<ManualClock>) -> LivenessTracker {
    let clock: Arc<dyn Clock> = clock.clone();
    LivenessTracker::new(Duration::from_secs(30), Duration::from_secs(120), clock)
}

#[test]
fn test_backlog_replay_keeps_node_online_while_data_is_stale() {
    let clock = ManualClock::new(BASE_TS + 2 * HOUR);
    let liveness = tracker(&clock);

    // Two hours of one-per-second samples spooled while the node was cut off,
    // replayed at 20x over six minutes
    let backlog: Vec<i64> = (0..7200).map(|i| BASE_TS + i * 1000).collect();
    let mut stale_seen = 0;
    for (i, ts) in backlog.iter().enumerate() {
        if i % 20 == 0 {
            clock.advance_ms(1000);
        }
        liveness.on_arrival(NODE, "temp", *ts);
        assert!(liveness.is_online(NODE), "node offline during replay at {}", i);
        if !liveness.is_fresh(NODE, "temp") {
            stale_seen += 1;
        }
    }

    assert!(stale_seen > 7000, "backlog must read as stale data");
    // The tail of the backlog is still more than two minutes old
    assert!(!liveness.is_fresh(NODE, "temp"));

    // First live sample after catching up
    liveness.on_arrival(NODE, "temp", clock.now_ms() - 500);
    assert!(liveness.is_fresh(NODE, "temp"));
    assert!(liveness.is_online(NODE));
}

#[test]
fn test_old_sample_does_not_regress_freshness() {
    let clock = ManualClock::new(BASE_TS);
    let liveness = tracker(&clock);

    liveness.on_arrival(NODE, "temp", BASE_TS - 1000);
    assert!(liveness.is_fresh(NODE, "temp"));

    clock.advance_ms(5000);
    liveness.on_arrival(NODE, "temp", BASE_TS - HOUR);
    let report = liveness.report(NODE, 0);
    assert_eq!(report.last_sample_ts, Some(BASE_TS - 1000));
    assert_eq!(report.last_rx_at, Some(BASE_TS + 5000), "rx time is receipt time");
    assert!(liveness.is_fresh(NODE, "temp"));
}

#[test]
fn test_silence_turns_node_offline() {
    let clock = ManualClock::new(BASE_TS);
    let liveness = tracker(&clock);

    liveness.on_arrival(NODE, "temp", BASE_TS);
    clock.advance_ms(29_000);
    assert!(liveness.is_online(NODE));
    clock.advance_ms(2_000);
    assert!(!liveness.is_online(NODE));

    // A heartbeat proves reachability but not freshness
    clock.advance_ms(200_000);
    liveness.on_heartbeat(NODE);
    assert!(liveness.is_online(NODE));
    assert!(!liveness.is_fresh(NODE, "temp"));
    assert_eq!(liveness.report(NODE, 0).stale_sensors, vec!["temp".to_string()]);
}

#[test]
fn test_same_sensor_name_on_two_nodes_is_tracked_separately() {
    let clock = ManualClock::new(BASE_TS + 2 * HOUR);
    let liveness = tracker(&clock);
    let now = clock.now_ms();

    liveness.on_arrival("node-b", "temp", now - HOUR);
    liveness.on_arrival("node-a", "temp", now);

    assert!(liveness.is_fresh("node-a", "temp"));
    assert!(!liveness.is_fresh("node-b", "temp"));
    assert!(liveness.report("node-a", 0).stale_sensors.is_empty());
    assert_eq!(liveness.report("node-b", 0).stale_sensors, vec!["temp".to_string()]);
    assert_eq!(liveness.report("node-b", 0).last_sample_ts, Some(now - HOUR));
}

#[test]
fn test_future_sample_ts_does_not_affect_online() {
    let clock = ManualClock::new(BASE_TS);
    let liveness = tracker(&clock);

    // Producer clock far ahead of the controller
    liveness.on_arrival(NODE, "temp", BASE_TS + 10 * HOUR);
    clock.advance_ms(31_000);
    assert!(!liveness.is_online(NODE));
    assert!(liveness.is_fresh(NODE, "temp"));
}

#[tokio::test]
async fn test_ingest_updates_liveness_for_replayed_data() {
    let clock = ManualClock::new(BASE_TS + 2 * HOUR);
    let liveness = Arc::new(tracker(&clock));
    let ingestor = Ingestor::new(Arc::new(MemorySink::new()), liveness.clone(), 0);

    for i in 1..=100u64 {
        let mut envelope = sample(i);
        envelope.seq = i;
        ingestor.ingest(&envelope).await.unwrap();
        clock.advance_ms(100);
    }

    let report = liveness.report(NODE, ingestor.acked_seq(NODE));
    assert!(report.online);
    assert_eq!(report.acked_seq, 100);
    assert_eq!(report.last_sample_ts, Some(BASE_TS + 100));
    assert_eq!(report.stale_sensors, vec!["temp".to_string()]);
    assert_eq!(liveness.known_nodes(), vec![NODE.to_string()]);
}
