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

//! Segmented on-disk spool for one node.
//!
//! [`Spool`] is the single owner of the segment set: it holds the exclusive
//! [`SegmentWriter`] for the open segment, the ordered index of closed
//! segments, and incremental byte / free-space counters so cap checks never
//! rescan the filesystem. Everything other tasks need (segment catalog,
//! ack state, last written seq, status) lives in [`SpoolShared`].
//!
//! Directory layout:
//!
//! ```text
//! <dir>/segments/<id>-<first_seq>.open
//! <dir>/segments/<id>-<first_seq>-<last_seq>.seg
//! <dir>/ack.json
//! <dir>/loss.log
//! <dir>/replay.cursor
//! ```

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::ack::{load_acked_seq, store_acked_seq, AckState};
use crate::catalog::{CatalogEntry, SegmentCatalog};
use crate::clock::Clock;
use crate::config::SpoolSettings;
use crate::envelope::Envelope;
use crate::error::{SpoolError, SpoolResult};
use crate::frame::encode_frame;
use crate::fsprobe::{default_max_spool_bytes, FreeSpaceProbe, FsUsage};
use crate::loss::{LossEvent, LossLog, LossReason};
use crate::segment::{modified_ms, sync_dir, SegmentId, SegmentMeta, SegmentName, SegmentState, SegmentWriter};

pub const SEGMENTS_DIR: &str = "segments";
pub const ACK_FILE: &str = "ack.json";
pub const LOSS_FILE: &str = "loss.log";
pub const CURSOR_FILE: &str = "replay.cursor";

/// Resolved spool limits
#[derive(Debug, Clone)]
pub struct SpoolOptions {
    pub dir: PathBuf,
    pub max_spool_bytes: u64,
    pub keep_free_bytes: u64,
    pub max_spool_age: Option<Duration>,
    pub segment_rotation_bytes: u64,
    pub segment_rotation_age: Duration,
    pub fsync_interval: Duration,
}

impl SpoolOptions {
    /// Resolve settings, sizing `max_spool_bytes` from the filesystem when unset
    pub fn from_settings(
        dir: impl Into<PathBuf>,
        settings: &SpoolSettings,
        probe: &dyn FreeSpaceProbe,
    ) -> SpoolResult<Self> {
        let dir = dir.into();
        let max_spool_bytes = match settings.max_spool_bytes {
            Some(bytes) => bytes,
            None => {
                fs::create_dir_all(&dir).map_err(|e| SpoolError::write_fault(&dir, e))?;
                let usage = probe.probe(&dir).map_err(|e| SpoolError::io(&dir, e))?;
                let bytes = default_max_spool_bytes(usage.total_bytes);
                info!(
                    "max_spool_bytes not set, using {} bytes for a {} byte filesystem",
                    bytes, usage.total_bytes
                );
                bytes
            }
        };

        let options = Self {
            dir,
            max_spool_bytes,
            keep_free_bytes: settings.keep_free_bytes,
            max_spool_age: settings.max_spool_age_seconds.map(Duration::from_secs),
            segment_rotation_bytes: settings.segment_rotation_bytes,
            segment_rotation_age: Duration::from_secs(settings.segment_rotation_seconds),
            fsync_interval: Duration::from_millis(settings.fsync_interval_ms()),
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> SpoolResult<()> {
        if self.segment_rotation_bytes == 0 {
            return Err(SpoolError::Config("segment_rotation_bytes must be > 0".into()));
        }
        if self.segment_rotation_age.is_zero() {
            return Err(SpoolError::Config("segment_rotation_seconds must be > 0".into()));
        }
        // The open segment can never be evicted, so it must fit twice over
        if self.segment_rotation_bytes > self.max_spool_bytes / 2 {
            return Err(SpoolError::Config(format!(
                "segment_rotation_bytes ({}) must be at most half of max_spool_bytes ({})",
                self.segment_rotation_bytes, self.max_spool_bytes
            )));
        }
        Ok(())
    }
}

/// Where an appended frame landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendReceipt {
    pub seq: u64,
    pub segment_id: SegmentId,
    pub end_offset: u64,
    pub frame_len: u64,
}

/// Segments removed by one cap enforcement pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapReport {
    pub evicted: Vec<SegmentId>,
    pub loss_events: Vec<LossEvent>,
    pub freed_bytes: u64,
}

impl CapReport {
    fn merge(&mut self, other: CapReport) {
        self.evicted.extend(other.evicted);
        self.loss_events.extend(other.loss_events);
        self.freed_bytes += other.freed_bytes;
    }
}

/// Point-in-time spool figures surfaced in node status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpoolStatus {
    pub spool_bytes: u64,
    pub open_segments: usize,
    pub closed_segments: usize,
    /// Age of the oldest segment still holding unacknowledged frames. Frame
    /// times are not indexed, so this approximates the oldest unacknowledged
    /// sample's age at segment granularity: it is measured from segment
    /// creation, or from the file mtime for segments found at startup.
    pub oldest_unacked_age_ms: Option<i64>,
    pub last_acked_seq: u64,
    pub last_written_seq: u64,
    pub unacked_bytes: u64,
    pub loss_events: Vec<LossEvent>,
    pub health_fault: Option<String>,
    pub available_bytes: Option<u64>,
}

/// State shared between the writer context and readers
#[derive(Debug)]
pub struct SpoolShared {
    catalog: RwLock<SegmentCatalog>,
    ack: Arc<AckState>,
    last_written_seq: AtomicU64,
    written: Notify,
    status: RwLock<SpoolStatus>,
    dir: PathBuf,
}

impl SpoolShared {
    pub fn catalog(&self) -> RwLockReadGuard<'_, SegmentCatalog> {
        self.catalog.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn catalog_mut(&self) -> RwLockWriteGuard<'_, SegmentCatalog> {
        self.catalog.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn ack(&self) -> Arc<AckState> {
        self.ack.clone()
    }

    pub fn acked_seq(&self) -> u64 {
        self.ack.acked_seq()
    }

    pub fn last_written_seq(&self) -> u64 {
        self.last_written_seq.load(Ordering::Acquire)
    }

    /// Resolves after the next successful append
    pub async fn wait_written(&self) {
        self.written.notified().await;
    }

    pub fn status(&self) -> SpoolStatus {
        self.status
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

pub struct Spool {
    node_id: String,
    opts: SpoolOptions,
    segments_dir: PathBuf,
    ack_path: PathBuf,
    closed: VecDeque<SegmentMeta>,
    writer: SegmentWriter,
    next_seq: u64,
    total_bytes: u64,
    persisted_ack: u64,
    loss_log: LossLog,
    usage: Option<FsUsage>,
    probe: Arc<dyn FreeSpaceProbe>,
    clock: Arc<dyn Clock>,
    shared: Arc<SpoolShared>,
    fault: Option<String>,
}

impl Spool {
    /// Open (or create) the spool, recovering the open segment's tail
    pub fn open(
        node_id: impl Into<String>,
        opts: SpoolOptions,
        probe: Arc<dyn FreeSpaceProbe>,
        clock: Arc<dyn Clock>,
    ) -> SpoolResult<Self> {
        opts.validate()?;
        let node_id = node_id.into();
        let segments_dir = opts.dir.join(SEGMENTS_DIR);
        fs::create_dir_all(&segments_dir).map_err(|e| SpoolError::write_fault(&segments_dir, e))?;

        let ack_path = opts.dir.join(ACK_FILE);
        let acked_seq = load_acked_seq(&ack_path)?;
        let loss_log = LossLog::open(opts.dir.join(LOSS_FILE))?;
        let now = clock.now_ms();

        let (mut closed, mut opens) = list_segments(&segments_dir)?;

        // Only the newest open segment is live; anything older is left over
        // from a crash between creating a new segment and closing the old one.
        let newest_open = opens.pop();
        for (id, first_seq, path) in opens {
            warn!("Found stale open segment {}, closing it", path.display());
            let (writer, _) = SegmentWriter::recover(&path, id, first_seq, now)?;
            if writer.is_empty() {
                fs::remove_file(&path).map_err(|e| SpoolError::write_fault(&path, e))?;
            } else {
                closed.push(writer.close()?);
            }
        }
        closed.sort_by_key(|m| m.id);

        let max_closed_id = closed.last().map(|m| m.id.0).unwrap_or(0);
        let mut next_seq = closed
            .last()
            .and_then(|m| m.last_seq)
            .map(|last| last + 1)
            .unwrap_or(1)
            .max(acked_seq + 1);

        let writer = match newest_open {
            Some((id, first_seq, path)) if id.0 > max_closed_id => {
                let (writer, report) = SegmentWriter::recover(&path, id, first_seq, now)?;
                info!(
                    "Recovered open segment {}: {} frames, {} bytes truncated",
                    id, report.valid_frames, report.truncated_bytes
                );
                match writer.last_seq() {
                    Some(last) if last + 1 >= next_seq => {
                        next_seq = last + 1;
                        writer
                    }
                    Some(last) => {
                        warn!(
                            "Open segment {} ends at seq {} but spool resumes at {}, closing it",
                            id, last, next_seq
                        );
                        closed.push(writer.close()?);
                        SegmentWriter::create(&segments_dir, SegmentId(id.0 + 1), next_seq, now)?
                    }
                    None if first_seq >= next_seq => {
                        next_seq = first_seq;
                        writer
                    }
                    None => {
                        drop(writer);
                        fs::remove_file(&path).map_err(|e| SpoolError::write_fault(&path, e))?;
                        SegmentWriter::create(&segments_dir, SegmentId(id.0 + 1), next_seq, now)?
                    }
                }
            }
            Some((id, _, path)) => {
                let orphan = path.with_extension("orphan");
                error!(
                    "Open segment {} predates closed segment {}, moving it to {}",
                    id,
                    max_closed_id,
                    orphan.display()
                );
                fs::rename(&path, &orphan).map_err(|e| SpoolError::write_fault(&path, e))?;
                SegmentWriter::create(&segments_dir, SegmentId(max_closed_id + 1), next_seq, now)?
            }
            None => SegmentWriter::create(&segments_dir, SegmentId(max_closed_id + 1), next_seq, now)?,
        };

        let closed: VecDeque<SegmentMeta> = closed.into();
        let total_bytes = closed.iter().map(|m| m.bytes).sum::<u64>() + writer.len();

        let mut catalog = SegmentCatalog::new();
        for meta in &closed {
            catalog.push(CatalogEntry::closed(meta.id, meta.path.clone(), meta.first_seq, meta.bytes));
        }
        catalog.push(CatalogEntry::new(
            writer.id(),
            writer.path().to_path_buf(),
            SegmentState::Open,
            writer.first_seq(),
            writer.committed_len(),
        ));

        let shared = Arc::new(SpoolShared {
            catalog: RwLock::new(catalog),
            ack: Arc::new(AckState::new(acked_seq)),
            last_written_seq: AtomicU64::new(next_seq - 1),
            written: Notify::new(),
            status: RwLock::new(SpoolStatus::default()),
            dir: opts.dir.clone(),
        });

        info!(
            "Opened spool for node '{}' at {}: {} closed segment(s), {} bytes, next seq {}, acked {}",
            node_id,
            opts.dir.display(),
            closed.len(),
            total_bytes,
            next_seq,
            acked_seq
        );

        let mut spool = Self {
            node_id,
            opts,
            segments_dir,
            ack_path,
            closed,
            writer,
            next_seq,
            total_bytes,
            persisted_ack: acked_seq,
            loss_log,
            usage: None,
            probe,
            clock,
            shared,
            fault: None,
        };
        spool.probe_free_space()?;
        spool.publish_status();
        Ok(spool)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn shared(&self) -> Arc<SpoolShared> {
        self.shared.clone()
    }

    pub fn options(&self) -> &SpoolOptions {
        &self.opts
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn closed_segments(&self) -> impl Iterator<Item = &SegmentMeta> {
        self.closed.iter()
    }

    pub fn open_segment(&self) -> SegmentMeta {
        self.writer.meta()
    }

    pub fn loss_events(&self) -> &[LossEvent] {
        self.loss_log.active()
    }

    pub fn health_fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    /// Assign the next seq to `envelope` and write it to the open segment
    pub fn append(&mut self, mut envelope: Envelope) -> SpoolResult<AppendReceipt> {
        if let Some(fault) = &self.fault {
            return Err(SpoolError::Unavailable(fault.clone()));
        }

        let seq = self.next_seq;
        envelope.seq = seq;
        let frame = encode_frame(&envelope.to_payload());
        let frame_len = frame.len() as u64;

        if self.total_bytes + frame_len > self.opts.max_spool_bytes {
            let report = self.evict_for_incoming(frame_len)?;
            if !report.evicted.is_empty() {
                self.publish_status();
            }
        }

        let now = self.clock.now_ms();
        let end_offset = match self.writer.append(&frame, seq, now) {
            Ok(offset) => offset,
            Err(e) => return Err(self.record_fault(e)),
        };
        self.next_seq += 1;
        self.total_bytes += frame_len;
        if let Some(usage) = &mut self.usage {
            usage.available_bytes = usage.available_bytes.saturating_sub(frame_len);
        }
        self.shared.last_written_seq.store(seq, Ordering::Release);
        self.shared.written.notify_waiters();

        let receipt = AppendReceipt {
            seq,
            segment_id: self.writer.id(),
            end_offset,
            frame_len,
        };
        debug!("Appended seq {} to segment {}", seq, receipt.segment_id);

        if let Err(e) = self.writer.sync_if_due(self.opts.fsync_interval) {
            return Err(self.record_fault(e));
        }
        if self.rotation_due(now) {
            self.rotate()?;
            self.enforce_caps()?;
        }
        Ok(receipt)
    }

    fn rotation_due(&self, now_ms: i64) -> bool {
        if self.writer.is_empty() {
            return false;
        }
        self.writer.len() >= self.opts.segment_rotation_bytes
            || self.writer.age_ms(now_ms) >= self.opts.segment_rotation_age.as_millis() as i64
    }

    /// Close the open segment and start a new one. No-op when it is empty.
    pub fn rotate(&mut self) -> SpoolResult<Option<SegmentId>> {
        if self.writer.is_empty() {
            return Ok(None);
        }
        let now = self.clock.now_ms();
        let new_id = SegmentId(self.writer.id().0 + 1);
        let new_writer = match SegmentWriter::create(&self.segments_dir, new_id, self.next_seq, now) {
            Ok(writer) => writer,
            Err(e) => return Err(self.record_fault(e)),
        };
        let old = std::mem::replace(&mut self.writer, new_writer);
        let old_id = old.id();
        let meta = match old.close() {
            Ok(meta) => meta,
            Err(e) => return Err(self.record_fault(e)),
        };

        {
            let mut catalog = self.shared.catalog_mut();
            catalog.mark_closed(old_id, meta.path.clone());
            catalog.push(CatalogEntry::new(
                self.writer.id(),
                self.writer.path().to_path_buf(),
                SegmentState::Open,
                self.writer.first_seq(),
                self.writer.committed_len(),
            ));
        }
        self.closed.push_back(meta);
        Ok(Some(old_id))
    }

    /// Periodic maintenance: batched fsync and age-based rotation
    pub fn tick(&mut self) -> SpoolResult<()> {
        if self.fault.is_some() {
            return Ok(());
        }
        if let Err(e) = self.writer.sync_if_due(self.opts.fsync_interval) {
            return Err(self.record_fault(e));
        }
        if self.rotation_due(self.clock.now_ms()) {
            self.rotate()?;
            self.enforce_caps()?;
        }
        Ok(())
    }

    /// Flush the open segment to stable storage now
    pub fn sync(&mut self) -> SpoolResult<()> {
        if let Err(e) = self.writer.sync() {
            return Err(self.record_fault(e));
        }
        Ok(())
    }

    /// Record a new acknowledgement and delete the fully acknowledged prefix
    pub fn mark_acked(&mut self, acked_seq: u64) -> SpoolResult<Vec<SegmentId>> {
        self.shared.ack.advance(acked_seq);
        self.apply_acks()
    }

    /// Apply whatever the ack tracker has published since the last call
    pub fn apply_acks(&mut self) -> SpoolResult<Vec<SegmentId>> {
        let acked = self.shared.ack.acked_seq();
        if acked > self.persisted_ack {
            if let Err(e) = store_acked_seq(&self.ack_path, acked) {
                return Err(self.record_fault(e));
            }
            self.persisted_ack = acked;
        }

        let prefix = self.deletable_prefix();
        for id in &prefix {
            if let Some(meta) = self.closed.pop_front() {
                debug_assert_eq!(meta.id, *id);
                self.remove_segment(&meta)?;
                debug!(
                    "Deleted acknowledged segment {} (seq {}..={:?})",
                    meta.id, meta.first_seq, meta.last_seq
                );
            }
        }
        if !prefix.is_empty() {
            info!(
                "Deleted {} acknowledged segment(s) up to seq {}",
                prefix.len(),
                acked
            );
        }
        Ok(prefix)
    }

    /// Closed segments, oldest first, whose frames are all `<= acked_seq`
    pub fn deletable_prefix(&self) -> Vec<SegmentId> {
        let acked = self.shared.ack.acked_seq();
        self.closed
            .iter()
            .take_while(|meta| meta.fully_acked(acked))
            .map(|meta| meta.id)
            .collect()
    }

    /// Probe filesystem free space, then enforce caps
    pub fn probe_free_space(&mut self) -> SpoolResult<CapReport> {
        match self.probe.probe(&self.opts.dir) {
            Ok(usage) => self.usage = Some(usage),
            Err(e) => warn!("Free space probe failed on {}: {}", self.opts.dir.display(), e),
        }
        self.enforce_caps()
    }

    /// Evict oldest closed segments until every cap holds.
    ///
    /// Pending acknowledgements are applied first so acknowledged data is
    /// deleted without being reported as lost.
    pub fn enforce_caps(&mut self) -> SpoolResult<CapReport> {
        self.apply_acks()?;
        let mut report = CapReport::default();

        while self.total_bytes > self.opts.max_spool_bytes && !self.closed.is_empty() {
            report.merge(self.evict_oldest(LossReason::MaxSpoolBytes)?);
        }

        if let Some(max_age) = self.opts.max_spool_age {
            let now = self.clock.now_ms();
            let max_age_ms = max_age.as_millis() as i64;
            while self
                .closed
                .front()
                .is_some_and(|front| now - front.last_write_ms > max_age_ms)
            {
                report.merge(self.evict_oldest(LossReason::MaxSpoolAge)?);
            }
        }

        let keep_free = self.opts.keep_free_bytes;
        while self
            .usage
            .is_some_and(|usage| usage.available_bytes < keep_free)
            && !self.closed.is_empty()
        {
            let evicted = self.evict_oldest(LossReason::KeepFreeBytes)?;
            if let Some(usage) = &mut self.usage {
                usage.available_bytes += evicted.freed_bytes;
            }
            report.merge(evicted);
        }
        if self.usage.is_some_and(|usage| usage.available_bytes < keep_free) {
            warn!(
                "Free space below keep_free_bytes ({}) with no closed segments left to evict",
                keep_free
            );
        }

        if !report.evicted.is_empty() {
            self.publish_status();
        }
        Ok(report)
    }

    fn evict_for_incoming(&mut self, incoming: u64) -> SpoolResult<CapReport> {
        self.apply_acks()?;
        let mut report = CapReport::default();
        while self.total_bytes + incoming > self.opts.max_spool_bytes && !self.closed.is_empty() {
            report.merge(self.evict_oldest(LossReason::MaxSpoolBytes)?);
        }
        Ok(report)
    }

    fn evict_oldest(&mut self, reason: LossReason) -> SpoolResult<CapReport> {
        let mut report = CapReport::default();
        let Some(meta) = self.closed.pop_front() else {
            return Ok(report);
        };

        let acked = self.shared.ack.acked_seq();
        if let Some((start, end)) = meta.unacked_range(acked) {
            let event = LossEvent::new(start, end, reason, self.clock.now_ms());
            // Disclose before deleting so a crash cannot hide the loss
            if let Err(e) = self.loss_log.record(event.clone()) {
                self.closed.push_front(meta);
                return Err(self.record_fault(e));
            }
            report.loss_events.push(event);
        }

        self.remove_segment(&meta)?;
        info!(
            "Evicted segment {} ({} bytes, seq {}..={:?}) for {:?}",
            meta.id, meta.bytes, meta.first_seq, meta.last_seq, reason
        );
        report.evicted.push(meta.id);
        report.freed_bytes += meta.bytes;
        Ok(report)
    }

    fn remove_segment(&mut self, meta: &SegmentMeta) -> SpoolResult<()> {
        self.shared.catalog_mut().remove(meta.id);
        self.total_bytes = self.total_bytes.saturating_sub(meta.bytes);
        match fs::remove_file(&meta.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Segment {} already gone", meta.path.display());
            }
            Err(e) => return Err(self.record_fault(SpoolError::write_fault(&meta.path, e))),
        }
        sync_dir(&self.segments_dir);
        Ok(())
    }

    /// Drop reported loss events whose range ends at or before `through_seq`
    pub fn clear_loss_events(&mut self, through_seq: u64) -> SpoolResult<usize> {
        let cleared = self.loss_log.clear_through(through_seq)?;
        if cleared > 0 {
            self.publish_status();
        }
        Ok(cleared)
    }

    pub fn status(&self) -> SpoolStatus {
        let acked = self.shared.ack.acked_seq();
        let now = self.clock.now_ms();
        let open = self.writer.meta();

        let oldest_unacked_age_ms = self
            .closed
            .iter()
            .chain(std::iter::once(&open))
            .find(|meta| meta.unacked_range(acked).is_some())
            .map(|meta| now - meta.created_at_ms);

        let unacked_bytes = self
            .closed
            .iter()
            .chain(std::iter::once(&open))
            .filter(|meta| meta.unacked_range(acked).is_some())
            .map(|meta| meta.bytes)
            .sum();

        SpoolStatus {
            spool_bytes: self.total_bytes,
            open_segments: 1,
            closed_segments: self.closed.len(),
            oldest_unacked_age_ms,
            last_acked_seq: acked,
            last_written_seq: self.next_seq - 1,
            unacked_bytes,
            loss_events: self.loss_log.active().to_vec(),
            health_fault: self.fault.clone(),
            available_bytes: self.usage.map(|u| u.available_bytes),
        }
    }

    /// Refresh the status snapshot readers see
    pub fn publish_status(&self) {
        let status = self.status();
        *self
            .shared
            .status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = status;
    }

    /// Latch a write fault: the writer refuses further appends
    fn record_fault(&mut self, err: SpoolError) -> SpoolError {
        if err.is_write_fault() && self.fault.is_none() {
            error!("Spool write fault, halting sample acceptance: {}", err);
            self.fault = Some(err.to_string());
            self.publish_status();
        }
        err
    }
}

type OpenSegment = (SegmentId, u64, PathBuf);

/// Directory listing only: closed segment metadata comes from the file name
/// and inode, never from reading frames.
fn list_segments(dir: &Path) -> SpoolResult<(Vec<SegmentMeta>, Vec<OpenSegment>)> {
    let mut closed = Vec::new();
    let mut opens = Vec::new();

    let entries = fs::read_dir(dir).map_err(|e| SpoolError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| SpoolError::io(dir, e))?;
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match SegmentName::parse(file_name) {
            Some(SegmentName::Closed {
                id,
                first_seq,
                last_seq,
            }) => {
                let bytes = entry
                    .metadata()
                    .map_err(|e| SpoolError::io(&path, e))?
                    .len();
                let mtime = modified_ms(&path).unwrap_or(0);
                closed.push(SegmentMeta {
                    id,
                    path: path.clone(),
                    state: SegmentState::Closed,
                    first_seq,
                    last_seq: Some(last_seq),
                    bytes,
                    created_at_ms: mtime,
                    last_write_ms: mtime,
                });
            }
            Some(SegmentName::Open { id, first_seq }) => opens.push((id, first_seq, path.clone())),
            None => debug!("Ignoring unrecognized file {}", path.display()),
        }
    }

    closed.sort_by_key(|m| m.id);
    opens.sort_by_key(|(id, _, _)| *id);
    Ok((closed, opens))
}
