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

// Spool manager tests: sequencing, recovery, rotation, caps and loss accounting

mod common;

use common::*;
use proptest::prelude::*;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use telemetry_spool::clock::{Clock, ManualClock};
use telemetry_spool::error::SpoolError;
use telemetry_spool::frame::encode_frame;
use telemetry_spool::fsprobe::{FixedProbe, FreeSpaceProbe};
use telemetry_spool::loss::LossReason;
use telemetry_spool::segment::SegmentName;
use telemetry_spool::spool::{Spool, SEGMENTS_DIR};
use tempfile::TempDir;

#[test]
fn test_append_assigns_monotonic_seq() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(BASE_TS);
    let mut spool = open_spool(options(dir.path(), 1000, 100), &clock);

    let mut last = 0;
    for i in 0..250 {
        let receipt = spool.append(sample(i)).unwrap();
        assert_eq!(receipt.seq, last + 1, "seq must advance by exactly one");
        assert_eq!(receipt.frame_len, frame_size());
        last = receipt.seq;
    }

    let status = spool.status();
    assert_eq!(status.last_written_seq, 250);
    assert_eq!(status.last_acked_seq, 0);
    assert_eq!(spool.total_bytes(), 250 * frame_size());
    assert_eq!(read_all(&spool.shared()), (1..=250).collect::<Vec<_>>());
}

#[test]
fn test_seq_continues_after_restart() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(BASE_TS);

    {
        let mut spool = open_spool(options(dir.path(), 1000, 10), &clock);
        append_samples(&mut spool, 0, 25);
        spool.sync().unwrap();
    }

    let mut spool = open_spool(options(dir.path(), 1000, 10), &clock);
    assert_eq!(spool.next_seq(), 26);
    assert_eq!(spool.closed_segments().count(), 2);
    let receipt = spool.append(sample(99)).unwrap();
    assert_eq!(receipt.seq, 26);
    assert_eq!(read_all(&spool.shared()), (1..=26).collect::<Vec<_>>());
}

#[test]
fn test_torn_tail_truncated_on_recovery() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(BASE_TS);

    {
        let mut spool = open_spool(options(dir.path(), 1000, 100), &clock);
        append_samples(&mut spool, 0, 5);
    }

    // A crash halfway through writing the sixth frame
    let mut torn = sample(5);
    torn.seq = 6;
    let frame = encode_frame(&torn.to_payload());
    let mut file = OpenOptions::new()
        .append(true)
        .open(open_segment_path(dir.path()))
        .unwrap();
    file.write_all(&frame[..frame.len() / 2]).unwrap();
    drop(file);

    let mut spool = open_spool(options(dir.path(), 1000, 100), &clock);
    assert_eq!(spool.next_seq(), 6, "torn frame must not be counted");
    assert_eq!(spool.total_bytes(), 5 * frame_size());
    assert_eq!(
        fs::metadata(open_segment_path(dir.path())).unwrap().len(),
        5 * frame_size(),
        "torn bytes must be cut from the file"
    );

    let receipt = spool.append(sample(5)).unwrap();
    assert_eq!(receipt.seq, 6);
    assert_eq!(read_all(&spool.shared()), vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn test_corrupt_frame_in_open_segment_truncates_from_there() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(BASE_TS);

    {
        let mut spool = open_spool(options(dir.path(), 1000, 100), &clock);
        append_samples(&mut spool, 0, 5);
        spool.sync().unwrap();
    }

    // Flip a payload byte of frame 3
    let path = open_segment_path(dir.path());
    let mut bytes = fs::read(&path).unwrap();
    let offset = (2 * frame_size() + 20) as usize;
    bytes[offset] ^= 0xff;
    fs::write(&path, &bytes).unwrap();

    let spool = open_spool(options(dir.path(), 1000, 100), &clock);
    assert_eq!(spool.next_seq(), 3);
    assert_eq!(read_all(&spool.shared()), vec![1, 2]);
}

#[test]
fn test_rotation_by_size() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(BASE_TS);
    let mut spool = open_spool(options(dir.path(), 1000, 10), &clock);

    append_samples(&mut spool, 0, 25);

    let closed: Vec<_> = spool.closed_segments().cloned().collect();
    assert_eq!(closed.len(), 2);
    assert_eq!((closed[0].first_seq, closed[0].last_seq), (1, Some(10)));
    assert_eq!((closed[1].first_seq, closed[1].last_seq), (11, Some(20)));
    assert_eq!(spool.open_segment().first_seq, 21);

    let names: Vec<_> = segment_files(dir.path())
        .iter()
        .map(|name| SegmentName::parse(name).expect("segment name"))
        .collect();
    assert!(matches!(
        names[0],
        SegmentName::Closed { first_seq: 1, last_seq: 10, .. }
    ));
    assert!(matches!(
        names[1],
        SegmentName::Closed { first_seq: 11, last_seq: 20, .. }
    ));
    assert!(matches!(names[2], SegmentName::Open { first_seq: 21, .. }));
}

#[test]
fn test_rotation_by_age() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(BASE_TS);
    let mut opts = options(dir.path(), 1000, 100);
    opts.segment_rotation_age = Duration::from_secs(60);
    let mut spool = open_spool(opts, &clock);

    append_samples(&mut spool, 0, 3);
    spool.tick().unwrap();
    assert_eq!(spool.closed_segments().count(), 0);

    clock.advance_ms(61_000);
    spool.tick().unwrap();
    assert_eq!(spool.closed_segments().count(), 1);

    // An empty open segment never rotates
    clock.advance_ms(61_000);
    spool.tick().unwrap();
    assert_eq!(spool.closed_segments().count(), 1);
}

#[test]
fn test_sample_ts_order_does_not_affect_storage() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(BASE_TS);
    let mut spool = open_spool(options(dir.path(), 1000, 4), &clock);

    // Producer clock jumps backwards mid-stream
    let stamps = [500, 400, 900, 100, 100, 300, 200, 800, 50, 700];
    for ts in stamps {
        spool.append(sample(ts)).unwrap();
    }

    let replayed: Vec<_> = read_all_envelopes(&spool.shared())
        .iter()
        .map(|e| (e.seq, e.sample_ts - BASE_TS))
        .collect();
    let expected: Vec<_> = stamps
        .iter()
        .enumerate()
        .map(|(i, ts)| (i as u64 + 1, *ts as i64))
        .collect();
    assert_eq!(replayed, expected);
}

#[test]
fn test_byte_cap_evicts_oldest_and_records_loss() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(BASE_TS);
    let opts = options(dir.path(), 1000, 500);
    let cap = opts.max_spool_bytes;
    let mut spool = open_spool(opts, &clock);

    for i in 0..1500 {
        spool.append(sample(i)).unwrap();
        assert!(spool.total_bytes() <= cap, "byte cap exceeded at sample {}", i);
    }

    let losses = spool.loss_events().to_vec();
    assert_eq!(losses.len(), 1);
    assert_eq!(losses[0].range_start_seq, 1);
    assert_eq!(losses[0].range_end_seq, 500);
    assert_eq!(losses[0].estimated_count, 500);
    assert_eq!(losses[0].reason, LossReason::MaxSpoolBytes);
    assert_eq!(read_all(&spool.shared()), (501..=1500).collect::<Vec<_>>());
}

#[test]
fn test_acked_segments_deleted_without_loss() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(BASE_TS);
    let mut spool = open_spool(options(dir.path(), 1000, 500), &clock);

    append_samples(&mut spool, 0, 1000);
    let deleted = spool.mark_acked(500).unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!(spool.total_bytes(), 500 * frame_size());

    append_samples(&mut spool, 1000, 500);
    assert!(spool.loss_events().is_empty(), "acked data is not loss");
    assert_eq!(read_all(&spool.shared()), (501..=1500).collect::<Vec<_>>());
}

#[test]
fn test_partial_ack_limits_reported_loss() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(BASE_TS);
    let mut spool = open_spool(options(dir.path(), 1000, 500), &clock);

    append_samples(&mut spool, 0, 1000);
    spool.mark_acked(200).unwrap();
    assert_eq!(spool.closed_segments().count(), 2, "partially acked segment stays");

    append_samples(&mut spool, 1000, 1);
    let losses = spool.loss_events();
    assert_eq!(losses.len(), 1);
    assert_eq!((losses[0].range_start_seq, losses[0].range_end_seq), (201, 500));
    assert_eq!(losses[0].estimated_count, 300);
}

#[test]
fn test_oldest_unacked_age_tracks_the_oldest_unacked_segment() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(BASE_TS);
    let mut spool = open_spool(options(dir.path(), 1000, 5), &clock);

    append_samples(&mut spool, 0, 4);
    clock.advance_ms(60_000);
    // Fills segment 1; segment 2 opens now
    append_samples(&mut spool, 4, 1);
    clock.advance_ms(30_000);
    append_samples(&mut spool, 5, 2);

    assert_eq!(spool.status().oldest_unacked_age_ms, Some(90_000));
    // Partially acked: still aged from its segment
    spool.mark_acked(3).unwrap();
    assert_eq!(spool.status().oldest_unacked_age_ms, Some(90_000));

    spool.mark_acked(5).unwrap();
    assert_eq!(spool.status().oldest_unacked_age_ms, Some(30_000));

    spool.mark_acked(7).unwrap();
    assert_eq!(spool.status().oldest_unacked_age_ms, None);
}

#[test]
fn test_ack_never_regresses() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(BASE_TS);
    let mut spool = open_spool(options(dir.path(), 1000, 10), &clock);

    append_samples(&mut spool, 0, 30);
    spool.mark_acked(20).unwrap();
    spool.mark_acked(5).unwrap();
    assert_eq!(spool.shared().acked_seq(), 20);
    assert_eq!(read_all(&spool.shared()), (21..=30).collect::<Vec<_>>());
}

#[test]
fn test_ack_and_loss_survive_restart() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(BASE_TS);

    {
        let mut spool = open_spool(options(dir.path(), 20, 10), &clock);
        append_samples(&mut spool, 0, 25);
        spool.mark_acked(22).unwrap();
        spool.sync().unwrap();
        assert_eq!(spool.loss_events().len(), 1);
    }

    let mut spool = open_spool(options(dir.path(), 20, 10), &clock);
    assert_eq!(spool.shared().acked_seq(), 22);
    assert_eq!(spool.next_seq(), 26);
    assert_eq!(spool.closed_segments().count(), 0);
    let losses = spool.loss_events().to_vec();
    assert_eq!(losses.len(), 1);
    assert_eq!((losses[0].range_start_seq, losses[0].range_end_seq), (1, 10));

    assert_eq!(spool.clear_loss_events(22).unwrap(), 1);
    drop(spool);
    let spool = open_spool(options(dir.path(), 20, 10), &clock);
    assert!(spool.loss_events().is_empty(), "cleared events stay cleared");
}

#[test]
fn test_max_age_evicts_old_segments() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(BASE_TS);
    let mut opts = options(dir.path(), 1000, 10);
    opts.max_spool_age = Some(Duration::from_secs(3600));
    let mut spool = open_spool(opts, &clock);

    append_samples(&mut spool, 0, 10);
    clock.advance_ms(1_800_000);
    append_samples(&mut spool, 10, 10);
    assert_eq!(spool.closed_segments().count(), 2);

    clock.advance_ms(1_900_000);
    let report = spool.enforce_caps().unwrap();
    assert_eq!(report.evicted.len(), 1);
    assert_eq!(report.loss_events.len(), 1);
    assert_eq!(report.loss_events[0].reason, LossReason::MaxSpoolAge);
    assert_eq!(report.loss_events[0].range_end_seq, 10);
    assert_eq!(spool.closed_segments().count(), 1);
}

#[test]
fn test_keep_free_bytes_evicts_until_satisfied() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(BASE_TS);
    let probe = Arc::new(FixedProbe::new(TIB, TIB));
    let mut opts = options(dir.path(), 1000, 10);
    opts.keep_free_bytes = 15 * frame_size();

    let dyn_probe: Arc<dyn FreeSpaceProbe> = probe.clone();
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let mut spool = Spool::open(NODE, opts, dyn_probe, dyn_clock).unwrap();
    append_samples(&mut spool, 0, 35);
    assert_eq!(spool.closed_segments().count(), 3);

    // Each evicted segment frees ten frames
    probe.set_available(0);
    let report = spool.probe_free_space().unwrap();
    assert_eq!(report.evicted.len(), 2);
    assert!(report
        .loss_events
        .iter()
        .all(|e| e.reason == LossReason::KeepFreeBytes));
    assert_eq!(report.loss_events[0].range_start_seq, 1);
    assert_eq!(report.loss_events[1].range_end_seq, 20);
    assert_eq!(spool.status().available_bytes, Some(20 * frame_size()));
}

#[test]
fn test_write_fault_halts_acceptance() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(BASE_TS);
    let mut spool = open_spool(options(dir.path(), 1000, 100), &clock);
    append_samples(&mut spool, 0, 3);

    fs::remove_dir_all(dir.path().join(SEGMENTS_DIR)).unwrap();
    let err = spool.rotate().unwrap_err();
    assert!(err.is_write_fault(), "unexpected error: {}", err);

    let status = spool.status();
    assert!(status.health_fault.is_some());
    match spool.append(sample(3)) {
        Err(SpoolError::Unavailable(_)) => {}
        other => panic!("expected Unavailable, got {:?}", other),
    }
}

#[test]
fn test_rotation_larger_than_half_cap_rejected() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(BASE_TS);
    let probe: Arc<dyn FreeSpaceProbe> = big_probe();
    let dyn_clock: Arc<dyn Clock> = clock;
    let result = Spool::open(NODE, options(dir.path(), 100, 60), probe, dyn_clock);
    assert!(matches!(result, Err(SpoolError::Config(_))));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn torn_tail_recovers_whole_frames(frames in 1u64..20, cut in 1u64..32) {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(BASE_TS);
        {
            let mut spool = open_spool(options(dir.path(), 1000, 100), &clock);
            append_samples(&mut spool, 0, frames);
        }

        let cut = cut.min(frame_size() - 1);
        let path = open_segment_path(dir.path());
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(frames * frame_size() - cut).unwrap();
        drop(file);

        let spool = open_spool(options(dir.path(), 1000, 100), &clock);
        prop_assert_eq!(spool.next_seq(), frames);
        prop_assert_eq!(spool.total_bytes(), (frames - 1) * frame_size());
        prop_assert_eq!(read_all(&spool.shared()), (1..frames).collect::<Vec<_>>());
    }

    #[test]
    fn trailing_garbage_is_cut_back_to_whole_frames(
        frames in 1u64..20,
        garbage in prop::collection::vec(any::<u8>(), 1..64)
    ) {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(BASE_TS);
        {
            let mut spool = open_spool(options(dir.path(), 1000, 100), &clock);
            append_samples(&mut spool, 0, frames);
        }

        let path = open_segment_path(dir.path());
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&garbage).unwrap();
        drop(file);

        let mut spool = open_spool(options(dir.path(), 1000, 100), &clock);
        prop_assert_eq!(spool.next_seq(), frames + 1);
        prop_assert_eq!(spool.total_bytes(), frames * frame_size());
        prop_assert_eq!(fs::metadata(&path).unwrap().len(), frames * frame_size());
        prop_assert_eq!(read_all(&spool.shared()), (1..=frames).collect::<Vec<_>>());

        let receipt = spool.append(sample(frames)).unwrap();
        prop_assert_eq!(receipt.seq, frames + 1);
    }

    #[test]
    fn unacked_frames_are_never_deleted_silently(
        ops in prop::collection::vec((0u8..3, 1u64..40), 1..30)
    ) {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(BASE_TS);
        let mut spool = open_spool(options(dir.path(), 100_000, 16), &clock);
        let mut next_sample = 0;
        let mut max_ack = 0;

        for (kind, n) in ops {
            match kind {
                0 => {
                    append_samples(&mut spool, next_sample, n);
                    next_sample += n;
                }
                1 => {
                    let ack = spool.status().last_written_seq.saturating_sub(n);
                    max_ack = max_ack.max(ack);
                    spool.mark_acked(ack).unwrap();
                }
                _ => {
                    spool.rotate().unwrap();
                }
            }

            let acked = spool.shared().acked_seq();
            prop_assert_eq!(acked, max_ack);
            let last_written = spool.status().last_written_seq;
            let segments: Vec<_> = spool
                .closed_segments()
                .cloned()
                .chain(std::iter::once(spool.open_segment()))
                .collect();
            for seq in acked + 1..=last_written {
                let covered = segments.iter().any(|m| {
                    m.first_seq <= seq && m.last_seq.is_some_and(|last| seq <= last)
                });
                prop_assert!(covered, "unacked seq {} no longer stored", seq);
            }
            prop_assert!(spool.loss_events().is_empty());
        }

        let expected: Vec<u64> = (max_ack + 1..=spool.status().last_written_seq).collect();
        prop_assert_eq!(read_all(&spool.shared()), expected);
    }
}
