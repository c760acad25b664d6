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

//! Replay of spooled frames to the transport.
//!
//! [`ReplayReader`] walks the shared segment catalog from a [`ReplayCursor`]
//! in creation order, and frames within a segment in write order. It never
//! looks at `sample_ts`. [`ReplayPublisher`] interleaves replay chunks with
//! live batches, throttles replay through [`ReplayThrottle`] and only moves
//! the cursor past a frame once the transport accepted it.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ReplaySettings;
use crate::envelope::Envelope;
use crate::error::{SpoolError, SpoolResult};
use crate::frame::{FrameRead, FrameReader};
use crate::live::{LiveItem, LiveQueue};
use crate::loss::{LossEvent, LossReason};
use crate::protocol::{NodeStatus, ReplayState};
use crate::rate_limit::ReplayThrottle;
use crate::segment::SegmentId;
use crate::spool::{SpoolShared, CURSOR_FILE};
use crate::transport::Transport;

/// How long the publisher sleeps when there is nothing to do
const IDLE_POLL: std::time::Duration = std::time::Duration::from_millis(500);

/// Lookups retried while rotation renames the open segment
const ROTATION_RETRIES: u32 = 5;
const ROTATION_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(2);

/// Position of the next frame to replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayCursor {
    pub segment_id: SegmentId,
    /// Byte offset within the segment
    pub offset: u64,
    /// Frames below this seq have been delivered
    pub next_seq: u64,
    /// A corrupt frame was passed over since the last delivered one
    #[serde(default)]
    pub after_corrupt: bool,
}

impl ReplayCursor {
    /// Start of the spool, skipping everything already acknowledged
    pub fn start(acked_seq: u64) -> Self {
        Self {
            segment_id: SegmentId(0),
            offset: 0,
            next_seq: acked_seq + 1,
            after_corrupt: false,
        }
    }

    pub fn load(path: &Path) -> SpoolResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path).map_err(|e| SpoolError::io(path, e))?;
        match serde_json::from_slice(&bytes) {
            Ok(cursor) => Ok(Some(cursor)),
            Err(e) => {
                warn!("Ignoring unreadable replay cursor {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    pub fn store(&self, path: &Path) -> SpoolResult<()> {
        let tmp_path = path.with_extension("tmp");
        let bytes = serde_json::to_vec(self)?;
        fs::write(&tmp_path, bytes).map_err(|e| SpoolError::write_fault(&tmp_path, e))?;
        fs::rename(&tmp_path, path).map_err(|e| SpoolError::write_fault(path, e))?;
        Ok(())
    }
}

/// One frame ready to publish
#[derive(Debug, Clone)]
pub struct ReplayFrame {
    pub seq: u64,
    pub payload: Vec<u8>,
    pub frame_len: u64,
    /// Cursor once this frame is delivered
    pub after: ReplayCursor,
}

/// Frames read from one cursor position
#[derive(Debug, Clone)]
pub struct ReplayChunk {
    pub frames: Vec<ReplayFrame>,
    /// Cursor once every frame in the chunk is delivered
    pub end: ReplayCursor,
    /// Corrupt frames passed over while reading
    pub skipped: u64,
    /// Seq ranges that were lost to those corrupt frames
    pub gaps: Vec<(u64, u64)>,
}

impl ReplayChunk {
    /// True when reading made no progress at all
    pub fn is_empty(&self, from: &ReplayCursor) -> bool {
        self.frames.is_empty() && self.end == *from
    }
}

/// Stateless reader over the shared segment catalog
#[derive(Clone)]
pub struct ReplayReader {
    shared: Arc<SpoolShared>,
}

enum Step {
    Next(SegmentId),
    Stop,
}

impl ReplayReader {
    pub fn new(shared: Arc<SpoolShared>) -> Self {
        Self { shared }
    }

    /// Read up to `max_frames` deliverable frames starting at `from`.
    ///
    /// Frames at or below the acked seq, or below `from.next_seq`, are passed
    /// over silently. Frames failing their checksum are skipped and counted;
    /// an unreadable header abandons the rest of that segment. When the
    /// cursor's segment has been deleted the read continues at the next
    /// segment in the catalog.
    pub fn read_chunk(&self, from: &ReplayCursor, max_frames: usize) -> SpoolResult<ReplayChunk> {
        let mut pos = *from;
        let mut frames = Vec::new();
        let mut skipped = 0;
        let mut gaps = Vec::new();
        let acked = self.shared.acked_seq();
        let mut rotation_retries = 0;

        'segments: loop {
            let entry = {
                let catalog = self.shared.catalog();
                match catalog.get(pos.segment_id) {
                    Some(entry) => entry,
                    None => match catalog.next_after(pos.segment_id) {
                        Some(entry) => {
                            if pos.segment_id.0 != 0 || pos.offset != 0 {
                                debug!(
                                    "Replay segment {} is gone, continuing at {}",
                                    pos.segment_id, entry.id
                                );
                            }
                            pos.segment_id = entry.id;
                            pos.offset = 0;
                            entry
                        }
                        None => break,
                    },
                }
            };

            let limit = entry.readable_len();
            if pos.offset >= limit {
                if entry.is_open() {
                    break;
                }
                match self.step_past(entry.id) {
                    Step::Next(id) => {
                        pos.segment_id = id;
                        pos.offset = 0;
                        continue;
                    }
                    Step::Stop => break,
                }
            }

            let mut file = match File::open(&entry.path) {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // Renamed by rotation or deleted by eviction since the lookup
                    match self.shared.catalog().get(entry.id) {
                        Some(current) if current.path != entry.path => continue,
                        // Renamed on disk, closed path not published yet
                        Some(current) if current.is_open() => {
                            if rotation_retries < ROTATION_RETRIES {
                                rotation_retries += 1;
                                std::thread::sleep(ROTATION_RETRY_DELAY);
                                continue;
                            }
                            debug!(
                                "Open segment {} vanished mid-rotation, ending chunk at offset {}",
                                entry.id, pos.offset
                            );
                            break;
                        }
                        Some(_) => return Err(SpoolError::io(&entry.path, e)),
                        None => continue,
                    }
                }
                Err(e) => return Err(SpoolError::io(&entry.path, e)),
            };
            file.seek(SeekFrom::Start(pos.offset))
                .map_err(|e| SpoolError::io(&entry.path, e))?;
            let mut reader = FrameReader::new(BufReader::new(file), pos.offset, limit);

            let step = loop {
                if frames.len() >= max_frames {
                    break 'segments;
                }
                let read = reader
                    .next_frame()
                    .map_err(|e| SpoolError::io(&entry.path, e))?;
                match read {
                    FrameRead::Frame {
                        payload,
                        offset,
                        len,
                    } => {
                        pos.offset = offset + len;
                        match Envelope::from_payload(&payload) {
                            Ok(env) if env.seq < pos.next_seq || env.seq <= acked => {
                                pos.after_corrupt = false;
                            }
                            Ok(env) => {
                                let expected = pos.next_seq.max(acked + 1);
                                if pos.after_corrupt && env.seq > expected {
                                    gaps.push((expected, env.seq - 1));
                                }
                                pos.after_corrupt = false;
                                pos.next_seq = env.seq + 1;
                                frames.push(ReplayFrame {
                                    seq: env.seq,
                                    payload,
                                    frame_len: len,
                                    after: pos,
                                });
                            }
                            Err(e) => {
                                skipped += 1;
                                pos.after_corrupt = true;
                                warn!(
                                    "Skipping undecodable frame in segment {} at offset {}: {}",
                                    entry.id, offset, e
                                );
                            }
                        }
                    }
                    FrameRead::End => {
                        if entry.is_open() {
                            break 'segments;
                        }
                        break self.step_past(entry.id);
                    }
                    FrameRead::Incomplete { offset } => {
                        if entry.is_open() {
                            break 'segments;
                        }
                        skipped += 1;
                        pos.after_corrupt = true;
                        warn!(
                            "Segment {} ends with a partial frame at offset {}, skipping it",
                            entry.id, offset
                        );
                        break self.step_past(entry.id);
                    }
                    FrameRead::Invalid {
                        offset,
                        reason,
                        next_offset: Some(next),
                    } => {
                        skipped += 1;
                        pos.after_corrupt = true;
                        warn!(
                            "Skipping corrupt frame in segment {} at offset {}: {}",
                            entry.id, offset, reason
                        );
                        pos.offset = next;
                    }
                    FrameRead::Invalid {
                        offset,
                        reason,
                        next_offset: None,
                    } => {
                        skipped += 1;
                        pos.after_corrupt = true;
                        warn!(
                            "Unreadable frame header in segment {} at offset {} ({}), skipping rest of segment",
                            entry.id, offset, reason
                        );
                        if entry.is_open() {
                            pos.offset = limit;
                            break 'segments;
                        }
                        break self.step_past(entry.id);
                    }
                }
            };

            match step {
                Step::Next(id) => {
                    pos.segment_id = id;
                    pos.offset = 0;
                }
                Step::Stop => break,
            }
        }

        Ok(ReplayChunk {
            frames,
            end: pos,
            skipped,
            gaps,
        })
    }

    fn step_past(&self, id: SegmentId) -> Step {
        match self.shared.catalog().next_after(id) {
            Some(next) => Step::Next(next.id),
            None => Step::Stop,
        }
    }

    /// Frames and bytes not yet replayed past `cursor`
    pub fn backlog(&self, cursor: &ReplayCursor) -> (u64, u64) {
        let last_written = self.shared.last_written_seq();
        let first_pending = cursor.next_seq.max(self.shared.acked_seq() + 1);
        let frames = (last_written + 1).saturating_sub(first_pending);

        let bytes = self
            .shared
            .catalog()
            .snapshot()
            .iter()
            .filter(|entry| entry.id >= cursor.segment_id)
            .map(|entry| {
                let len = entry.readable_len();
                if entry.id == cursor.segment_id {
                    len.saturating_sub(cursor.offset)
                } else {
                    len
                }
            })
            .sum();
        (frames, bytes)
    }
}

/// Publisher figures surfaced in node status
#[derive(Debug, Default)]
pub struct ReplayStats {
    pub last_published_seq: AtomicU64,
    pub corrupt_frames_skipped: AtomicU64,
    pub estimated_drain_ms: AtomicU64,
    draining: AtomicBool,
    unreadable: Mutex<Vec<LossEvent>>,
}

impl ReplayStats {
    pub fn state(&self) -> ReplayState {
        if self.draining.load(Ordering::Acquire) {
            ReplayState::Draining
        } else {
            ReplayState::Idle
        }
    }

    pub fn last_published_seq(&self) -> u64 {
        self.last_published_seq.load(Ordering::Acquire)
    }

    pub fn corrupt_frames_skipped(&self) -> u64 {
        self.corrupt_frames_skipped.load(Ordering::Acquire)
    }

    /// Seq ranges lost to corrupt frames that the controller has not yet
    /// acknowledged past
    pub fn unreadable_ranges(&self) -> Vec<LossEvent> {
        self.unreadable
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn record_unreadable(&self, start: u64, end: u64, now_ms: i64) {
        let mut ranges = self.unreadable.lock().unwrap_or_else(|p| p.into_inner());
        if ranges
            .iter()
            .any(|e| e.range_start_seq == start && e.range_end_seq == end)
        {
            return;
        }
        warn!("Frames {}..={} are unreadable and will never be delivered", start, end);
        ranges.push(LossEvent::new(start, end, LossReason::CorruptFrame, now_ms));
    }

    fn prune_unreadable(&self, acked_seq: u64) {
        self.unreadable
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|e| e.range_end_seq > acked_seq);
    }
}

/// Assemble a status heartbeat from spool and publisher state
pub fn node_status(
    node_id: &str,
    shared: &SpoolShared,
    stats: &ReplayStats,
    now_ms: i64,
) -> NodeStatus {
    let spool = shared.status();
    let state = stats.state();
    let mut loss_events = spool.loss_events;
    loss_events.extend(stats.unreadable_ranges());
    NodeStatus {
        node_id: node_id.to_string(),
        published_at: now_ms,
        spool_bytes: spool.spool_bytes,
        open_segments: spool.open_segments,
        closed_segments: spool.closed_segments,
        oldest_unacked_age_ms: spool.oldest_unacked_age_ms,
        last_acked_seq: shared.acked_seq(),
        last_written_seq: shared.last_written_seq(),
        last_published_seq: stats.last_published_seq(),
        loss_events,
        replay_state: state,
        estimated_drain_ms: match state {
            ReplayState::Draining => Some(stats.estimated_drain_ms.load(Ordering::Acquire)),
            ReplayState::Idle => None,
        },
        health_fault: spool.health_fault,
        corrupt_frames_skipped: stats.corrupt_frames_skipped(),
    }
}

/// Publishes live envelopes and replays the backlog for one node
pub struct ReplayPublisher {
    node_id: String,
    transport: Arc<dyn Transport>,
    shared: Arc<SpoolShared>,
    live: Arc<LiveQueue>,
    reader: ReplayReader,
    throttle: ReplayThrottle,
    settings: ReplaySettings,
    clock: Arc<dyn Clock>,
    cursor: ReplayCursor,
    cursor_path: PathBuf,
    cursor_dirty: bool,
    last_cursor_persist: Instant,
    next_heartbeat: Instant,
    last_seen_ack: u64,
    ack_changed_at: Instant,
    stats: Arc<ReplayStats>,
}

impl ReplayPublisher {
    pub fn new(
        node_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        shared: Arc<SpoolShared>,
        live: Arc<LiveQueue>,
        settings: ReplaySettings,
        clock: Arc<dyn Clock>,
    ) -> SpoolResult<Self> {
        let node_id = node_id.into();
        let cursor_path = shared.dir().join(CURSOR_FILE);
        let cursor = Self::initial_cursor(&cursor_path, &shared)?;
        info!(
            "Replay for node '{}' resumes at segment {} offset {} (seq {})",
            node_id, cursor.segment_id, cursor.offset, cursor.next_seq
        );

        let now = Instant::now();
        let acked = shared.acked_seq();
        Ok(Self {
            node_id,
            transport,
            reader: ReplayReader::new(shared.clone()),
            shared,
            live,
            throttle: ReplayThrottle::new(settings.replay_msgs_per_sec, settings.replay_bytes_per_sec),
            settings,
            clock,
            cursor,
            cursor_path,
            cursor_dirty: false,
            last_cursor_persist: now,
            next_heartbeat: now,
            last_seen_ack: acked,
            ack_changed_at: now,
            stats: Arc::new(ReplayStats::default()),
        })
    }

    /// Load the persisted cursor, clamped to what the spool actually holds.
    ///
    /// A crash can truncate an unsynced tail that was already published; the
    /// rewritten frames reuse those seqs and offsets and must not be skipped.
    fn initial_cursor(path: &Path, shared: &SpoolShared) -> SpoolResult<ReplayCursor> {
        let acked = shared.acked_seq();
        let Some(mut cursor) = ReplayCursor::load(path)? else {
            return Ok(ReplayCursor::start(acked));
        };

        let resume_seq = shared.last_written_seq() + 1;
        if cursor.next_seq > resume_seq {
            warn!(
                "Replay cursor is ahead of the spool (seq {} > {}), rewinding",
                cursor.next_seq, resume_seq
            );
            cursor.next_seq = resume_seq.max(acked + 1);
        }
        if let Some(entry) = shared.catalog().get(cursor.segment_id) {
            if cursor.offset > entry.readable_len() {
                warn!(
                    "Replay cursor offset {} beyond segment {} length {}, rescanning segment",
                    cursor.offset,
                    cursor.segment_id,
                    entry.readable_len()
                );
                cursor.offset = 0;
            }
        }
        Ok(cursor)
    }

    pub fn stats(&self) -> Arc<ReplayStats> {
        self.stats.clone()
    }

    pub fn cursor(&self) -> ReplayCursor {
        self.cursor
    }

    pub fn state(&self) -> ReplayState {
        self.stats.state()
    }

    fn set_state(&self, state: ReplayState) {
        let draining = state == ReplayState::Draining;
        if self.stats.draining.swap(draining, Ordering::AcqRel) != draining {
            match state {
                ReplayState::Draining => info!(
                    "Replay draining from segment {} offset {} (seq {})",
                    self.cursor.segment_id, self.cursor.offset, self.cursor.next_seq
                ),
                ReplayState::Idle => info!(
                    "Replay idle at segment {} offset {} (seq {})",
                    self.cursor.segment_id, self.cursor.offset, self.cursor.next_seq
                ),
            }
        }
    }

    /// Run until `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            "Replay publisher started for node '{}' over {} transport",
            self.node_id,
            self.transport.transport_type()
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            let progressed = match self.step().await {
                Ok(progressed) => progressed,
                Err(e) => {
                    warn!("Replay step failed: {}", e);
                    false
                }
            };
            if progressed {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep_until(self.next_heartbeat) => {}
                _ = self.live.wait_ready() => {}
                _ = self.shared.wait_written() => {}
                _ = tokio::time::sleep(IDLE_POLL) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.persist_cursor();
        info!("Replay publisher for node '{}' stopped", self.node_id);
        Ok(())
    }

    /// One scheduling round: heartbeat if due, at most one live batch, then
    /// one replay chunk. Returns whether any work was done.
    pub async fn step(&mut self) -> Result<bool> {
        if Instant::now() >= self.next_heartbeat {
            self.publish_heartbeat().await;
        }

        if !self.transport.is_connected().await {
            self.suspend("transport disconnected");
            let discarded = self.live.pop_batch(self.settings.live_batch_size);
            if !discarded.is_empty() {
                debug!(
                    "Disconnected, leaving {} live envelope(s) to replay",
                    discarded.len()
                );
            }
            return Ok(false);
        }

        let live_published = self.publish_live_batch().await;
        let replayed = self.replay_chunk().await?;
        if !replayed {
            self.check_ack_stall();
        }

        if self.cursor_dirty
            && self.last_cursor_persist.elapsed() >= self.settings.cursor_persist_interval()
        {
            self.persist_cursor();
        }
        Ok(live_published || replayed)
    }

    async fn publish_heartbeat(&mut self) {
        self.next_heartbeat = Instant::now() + self.settings.heartbeat_interval();
        let status = node_status(&self.node_id, &self.shared, &self.stats, self.clock.now_ms());
        if let Err(e) = self.transport.publish_status(&status).await {
            debug!("Status heartbeat not delivered: {}", e);
        }
    }

    /// Publish one live batch. Live copies never wait on the throttle; they
    /// debit it so replay yields the bandwidth.
    async fn publish_live_batch(&mut self) -> bool {
        let batch = self.live.pop_batch(self.settings.live_batch_size);
        if batch.is_empty() {
            return false;
        }

        let mut items = batch.into_iter();
        while let Some(LiveItem { envelope, receipt }) = items.next() {
            self.throttle.debit_live(receipt.frame_len);
            match self.transport.publish_data(envelope.to_payload()).await {
                Ok(()) => {
                    self.stats
                        .last_published_seq
                        .fetch_max(receipt.seq, Ordering::AcqRel);
                    // Caught up: replay has nothing before this frame left to send
                    if receipt.seq == self.cursor.next_seq {
                        self.cursor = ReplayCursor {
                            segment_id: receipt.segment_id,
                            offset: receipt.end_offset,
                            next_seq: receipt.seq + 1,
                            after_corrupt: false,
                        };
                        self.cursor_dirty = true;
                    }
                }
                Err(e) => {
                    let remaining = items.len();
                    warn!(
                        "Live publish of seq {} failed: {} ({} more left to replay)",
                        receipt.seq, e, remaining
                    );
                    self.suspend("live publish failed");
                    break;
                }
            }
        }
        true
    }

    /// Replay one chunk; false when there was nothing to replay or the
    /// transport failed.
    async fn replay_chunk(&mut self) -> Result<bool> {
        let reader = self.reader.clone();
        let from = self.cursor;
        let max_frames = self.settings.chunk_frames;
        let chunk = tokio::task::spawn_blocking(move || reader.read_chunk(&from, max_frames))
            .await
            .map_err(|e| anyhow::anyhow!("replay read task failed: {}", e))??;

        if chunk.is_empty(&from) {
            if self.state() == ReplayState::Draining {
                self.persist_cursor();
            }
            self.set_state(ReplayState::Idle);
            return Ok(false);
        }

        if !chunk.frames.is_empty() {
            self.set_state(ReplayState::Draining);
        }

        let ReplayChunk {
            frames,
            end,
            skipped,
            gaps,
        } = chunk;
        let now_ms = self.clock.now_ms();
        for (gap_start, gap_end) in gaps {
            self.stats.record_unreadable(gap_start, gap_end, now_ms);
        }
        for frame in frames {
            self.throttle.acquire(frame.frame_len).await;
            if let Err(e) = self.transport.publish_data(frame.payload).await {
                warn!("Replay publish of seq {} failed: {}", frame.seq, e);
                self.suspend("replay publish failed");
                return Ok(false);
            }
            self.cursor = frame.after;
            self.cursor_dirty = true;
            self.stats
                .last_published_seq
                .fetch_max(frame.seq, Ordering::AcqRel);

            if Instant::now() >= self.next_heartbeat {
                self.publish_heartbeat().await;
            }
        }

        self.cursor = end;
        self.cursor_dirty = true;
        if skipped > 0 {
            self.stats
                .corrupt_frames_skipped
                .fetch_add(skipped, Ordering::AcqRel);
        }

        let (frames_left, bytes_left) = self.reader.backlog(&self.cursor);
        let drain = self.throttle.estimate_drain(frames_left, bytes_left);
        self.stats
            .estimated_drain_ms
            .store(drain.as_millis() as u64, Ordering::Release);
        Ok(true)
    }

    /// Re-send from the acked position when acknowledgements stopped
    /// advancing although published frames remain unacknowledged. Covers
    /// deliveries lost in transit after the cursor moved past them.
    fn check_ack_stall(&mut self) {
        let acked = self.shared.acked_seq();
        if acked != self.last_seen_ack {
            self.last_seen_ack = acked;
            self.ack_changed_at = Instant::now();
            self.stats.prune_unreadable(acked);
            return;
        }
        if self.stats.last_published_seq() <= acked
            || self.ack_changed_at.elapsed() < self.settings.ack_stall_timeout()
        {
            return;
        }
        warn!(
            "Acks stalled at seq {} with seq {} published, replaying from the acked position",
            acked,
            self.stats.last_published_seq()
        );
        self.cursor = ReplayCursor::start(acked);
        self.cursor_dirty = true;
        self.ack_changed_at = Instant::now();
    }

    /// Stop draining, keeping the cursor where the last delivery left it
    fn suspend(&mut self, reason: &str) {
        if self.state() == ReplayState::Draining {
            info!("Suspending replay: {}", reason);
        }
        self.set_state(ReplayState::Idle);
        self.persist_cursor();
    }

    fn persist_cursor(&mut self) {
        if !self.cursor_dirty {
            return;
        }
        match self.cursor.store(&self.cursor_path) {
            Ok(()) => {
                self.cursor_dirty = false;
                self.last_cursor_persist = Instant::now();
            }
            Err(e) => warn!("Failed to persist replay cursor: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cursor_store_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CURSOR_FILE);
        assert_eq!(ReplayCursor::load(&path).unwrap(), None);

        let cursor = ReplayCursor {
            segment_id: SegmentId(3),
            offset: 4096,
            next_seq: 77,
            after_corrupt: true,
        };
        cursor.store(&path).unwrap();
        assert_eq!(ReplayCursor::load(&path).unwrap(), Some(cursor));
    }

    #[test]
    fn test_garbage_cursor_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CURSOR_FILE);
        fs::write(&path, b"{not json").unwrap();
        assert_eq!(ReplayCursor::load(&path).unwrap(), None);
    }

    #[test]
    fn test_start_cursor_skips_acked() {
        let cursor = ReplayCursor::start(41);
        assert_eq!(cursor.next_seq, 42);
        assert_eq!(cursor.segment_id, SegmentId(0));
    }
}
