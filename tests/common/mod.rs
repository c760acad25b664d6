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

// Shared fixtures for the integration tests

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use telemetry_spool::clock::{Clock, ManualClock};
use telemetry_spool::envelope::{Envelope, TimeQuality};
use telemetry_spool::frame;
use telemetry_spool::fsprobe::{FixedProbe, FreeSpaceProbe};
use telemetry_spool::replay::{ReplayCursor, ReplayReader};
use telemetry_spool::spool::{Spool, SpoolOptions, SpoolShared, SEGMENTS_DIR};

pub const NODE: &str = "node-a";
pub const BASE_TS: i64 = 1_700_000_000_000;
pub const TIB: u64 = 1024 * 1024 * 1024 * 1024;

/// Sample `i` of the "temp" sensor. Nonzero fields keep every frame the same size.
pub fn sample(i: u64) -> Envelope {
    Envelope::sample(NODE, "temp", BASE_TS + i as i64, 21.5, TimeQuality::Synced)
}

/// On-disk size of one frame produced by [`sample`]
pub fn frame_size() -> u64 {
    let mut envelope = sample(1);
    envelope.seq = 1;
    frame::frame_len(envelope.to_payload().len())
}

/// Caps and rotation expressed in frames; fsync is left to explicit calls
pub fn options(dir: &Path, max_frames: u64, rotation_frames: u64) -> SpoolOptions {
    let f = frame_size();
    SpoolOptions {
        dir: dir.to_path_buf(),
        max_spool_bytes: max_frames * f,
        keep_free_bytes: 0,
        max_spool_age: None,
        segment_rotation_bytes: rotation_frames * f,
        segment_rotation_age: Duration::from_secs(3600),
        fsync_interval: Duration::from_secs(3600),
    }
}

pub fn big_probe() -> Arc<FixedProbe> {
    Arc::new(FixedProbe::new(TIB, TIB))
}

pub fn open_spool(opts: SpoolOptions, clock: &Arc<ManualClock>) -> Spool {
    let probe: Arc<dyn FreeSpaceProbe> = big_probe();
    let clock: Arc<dyn Clock> = clock.clone();
    Spool::open(NODE, opts, probe, clock).expect("open spool")
}

/// Append `count` samples numbered from `start`
pub fn append_samples(spool: &mut Spool, start: u64, count: u64) {
    for i in start..start + count {
        spool.append(sample(i)).expect("append");
    }
}

/// Every deliverable seq, in replay order
pub fn read_all(shared: &Arc<SpoolShared>) -> Vec<u64> {
    read_all_envelopes(shared).iter().map(|e| e.seq).collect()
}

pub fn read_all_envelopes(shared: &Arc<SpoolShared>) -> Vec<Envelope> {
    let reader = ReplayReader::new(shared.clone());
    let mut cursor = ReplayCursor::start(0);
    let mut out = Vec::new();
    loop {
        let chunk = reader.read_chunk(&cursor, 64).expect("read chunk");
        if chunk.is_empty(&cursor) {
            break;
        }
        for frame in &chunk.frames {
            out.push(Envelope::from_payload(&frame.payload).expect("decode"));
        }
        cursor = chunk.end;
    }
    out
}

/// Segment file names, sorted
pub fn segment_files(spool_dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(spool_dir.join(SEGMENTS_DIR))
        .expect("list segments")
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

/// Path of the one open segment
pub fn open_segment_path(spool_dir: &Path) -> std::path::PathBuf {
    let name = segment_files(spool_dir)
        .into_iter()
        .find(|name| name.ends_with(".open"))
        .expect("open segment");
    spool_dir.join(SEGMENTS_DIR).join(name)
}
