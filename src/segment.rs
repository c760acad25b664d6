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

//! Segment files and the single-writer handle for the open segment
//!
//! File names carry everything the spool index needs, so startup only lists
//! the directory and scans the one open segment:
//!
//! - open:   `<id:010>-<first_seq:020>.open`
//! - closed: `<id:010>-<first_seq:020>-<last_seq:020>.seg`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::envelope::Envelope;
use crate::error::{SpoolError, SpoolResult};
use crate::frame::{FrameRead, FrameReader};

const OPEN_SUFFIX: &str = "open";
const CLOSED_SUFFIX: &str = "seg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub u64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:010}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentState {
    Open,
    Closed,
}

/// Parsed segment file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentName {
    Open {
        id: SegmentId,
        first_seq: u64,
    },
    Closed {
        id: SegmentId,
        first_seq: u64,
        last_seq: u64,
    },
}

impl SegmentName {
    pub fn id(&self) -> SegmentId {
        match self {
            SegmentName::Open { id, .. } | SegmentName::Closed { id, .. } => *id,
        }
    }

    pub fn file_name(&self) -> String {
        match self {
            SegmentName::Open { id, first_seq } => {
                format!("{}-{:020}.{}", id, first_seq, OPEN_SUFFIX)
            }
            SegmentName::Closed {
                id,
                first_seq,
                last_seq,
            } => format!("{}-{:020}-{:020}.{}", id, first_seq, last_seq, CLOSED_SUFFIX),
        }
    }

    pub fn parse(file_name: &str) -> Option<Self> {
        let (stem, suffix) = file_name.rsplit_once('.')?;
        let parts: Vec<&str> = stem.split('-').collect();
        match (suffix, parts.as_slice()) {
            (OPEN_SUFFIX, [id, first]) => Some(SegmentName::Open {
                id: SegmentId(id.parse().ok()?),
                first_seq: first.parse().ok()?,
            }),
            (CLOSED_SUFFIX, [id, first, last]) => {
                let first_seq: u64 = first.parse().ok()?;
                let last_seq: u64 = last.parse().ok()?;
                if last_seq < first_seq {
                    return None;
                }
                Some(SegmentName::Closed {
                    id: SegmentId(id.parse().ok()?),
                    first_seq,
                    last_seq,
                })
            }
            _ => None,
        }
    }
}

/// Index entry for one segment, kept by the spool manager
#[derive(Debug, Clone)]
pub struct SegmentMeta {
    pub id: SegmentId,
    pub path: PathBuf,
    pub state: SegmentState,
    pub first_seq: u64,
    /// None while an open segment holds no frames
    pub last_seq: Option<u64>,
    pub bytes: u64,
    pub created_at_ms: i64,
    pub last_write_ms: i64,
}

impl SegmentMeta {
    pub fn frame_count(&self) -> u64 {
        self.last_seq
            .map(|last| last - self.first_seq + 1)
            .unwrap_or(0)
    }

    /// True when every frame in the segment is covered by `acked_seq`
    pub fn fully_acked(&self, acked_seq: u64) -> bool {
        self.last_seq.map_or(true, |last| last <= acked_seq)
    }

    /// Seq range of frames above `acked_seq`, if any
    pub fn unacked_range(&self, acked_seq: u64) -> Option<(u64, u64)> {
        let last = self.last_seq?;
        if last <= acked_seq {
            return None;
        }
        Some((self.first_seq.max(acked_seq + 1), last))
    }
}

/// Outcome of scanning the open segment at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub valid_frames: u64,
    pub valid_len: u64,
    pub truncated_bytes: u64,
    pub last_seq: Option<u64>,
}

/// Exclusive write handle for the open segment.
///
/// Only one exists per spool. Readers see the prefix published through
/// `committed_len`, which is advanced after each frame reaches the kernel.
pub struct SegmentWriter {
    id: SegmentId,
    dir: PathBuf,
    path: PathBuf,
    file: File,
    len: u64,
    first_seq: u64,
    last_seq: Option<u64>,
    created_at_ms: i64,
    last_write_ms: i64,
    last_sync: Instant,
    dirty: bool,
    committed_len: Arc<AtomicU64>,
}

impl SegmentWriter {
    /// Create a fresh, empty open segment
    pub fn create(dir: &Path, id: SegmentId, first_seq: u64, now_ms: i64) -> SpoolResult<Self> {
        let name = SegmentName::Open { id, first_seq };
        let path = dir.join(name.file_name());
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|e| SpoolError::write_fault(&path, e))?;
        sync_dir(dir);

        debug!("Created open segment {}", path.display());

        Ok(Self {
            id,
            dir: dir.to_path_buf(),
            path,
            file,
            len: 0,
            first_seq,
            last_seq: None,
            created_at_ms: now_ms,
            last_write_ms: now_ms,
            last_sync: Instant::now(),
            dirty: false,
            committed_len: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Reopen an existing open segment, truncating any torn tail.
    ///
    /// Frames are validated in order (header, CRC, decodable payload,
    /// contiguous seq starting at `first_seq`). The file is cut at the first
    /// frame that fails and appending resumes from there.
    pub fn recover(
        path: &Path,
        id: SegmentId,
        first_seq: u64,
        now_ms: i64,
    ) -> SpoolResult<(Self, RecoveryReport)> {
        let file_len = fs::metadata(path)
            .map_err(|e| SpoolError::io(path, e))?
            .len();
        let reader_file = File::open(path).map_err(|e| SpoolError::io(path, e))?;
        let mut reader = FrameReader::new(BufReader::new(reader_file), 0, file_len);

        let mut report = RecoveryReport::default();
        let mut expected_seq = first_seq;
        loop {
            let read = reader
                .next_frame()
                .map_err(|e| SpoolError::io(path, e))?;
            match read {
                FrameRead::Frame { payload, len, .. } => {
                    let seq = match Envelope::from_payload(&payload) {
                        Ok(env) => env.seq,
                        Err(e) => {
                            warn!("Undecodable frame in {}: {}", path.display(), e);
                            break;
                        }
                    };
                    if seq != expected_seq {
                        warn!(
                            "Out-of-order seq {} (expected {}) in {}",
                            seq,
                            expected_seq,
                            path.display()
                        );
                        break;
                    }
                    expected_seq += 1;
                    report.valid_frames += 1;
                    report.valid_len += len;
                    report.last_seq = Some(seq);
                }
                FrameRead::End => break,
                FrameRead::Incomplete { offset } => {
                    debug!("Torn frame at offset {} in {}", offset, path.display());
                    break;
                }
                FrameRead::Invalid { offset, reason, .. } => {
                    warn!(
                        "Invalid frame at offset {} in {}: {}",
                        offset,
                        path.display(),
                        reason
                    );
                    break;
                }
            }
        }

        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| SpoolError::write_fault(path, e))?;

        if report.valid_len < file_len {
            report.truncated_bytes = file_len - report.valid_len;
            file.set_len(report.valid_len)
                .map_err(|e| SpoolError::write_fault(path, e))?;
            file.sync_data()
                .map_err(|e| SpoolError::write_fault(path, e))?;
            warn!(
                "Truncated {} trailing bytes from {} ({} valid frames kept)",
                report.truncated_bytes,
                path.display(),
                report.valid_frames
            );
        }

        let mtime_ms = modified_ms(path).unwrap_or(now_ms);
        let created_at_ms = if report.valid_frames == 0 { now_ms } else { mtime_ms };

        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok((
            Self {
                id,
                dir,
                path: path.to_path_buf(),
                file,
                len: report.valid_len,
                first_seq,
                last_seq: report.last_seq,
                created_at_ms,
                last_write_ms: mtime_ms,
                last_sync: Instant::now(),
                dirty: false,
                committed_len: Arc::new(AtomicU64::new(report.valid_len)),
            },
            report,
        ))
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.last_seq.is_none()
    }

    pub fn first_seq(&self) -> u64 {
        self.first_seq
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    pub fn committed_len(&self) -> Arc<AtomicU64> {
        self.committed_len.clone()
    }

    pub fn meta(&self) -> SegmentMeta {
        SegmentMeta {
            id: self.id,
            path: self.path.clone(),
            state: SegmentState::Open,
            first_seq: self.first_seq,
            last_seq: self.last_seq,
            bytes: self.len,
            created_at_ms: self.created_at_ms,
            last_write_ms: self.last_write_ms,
        }
    }

    /// Write one encoded frame carrying `seq`; returns the end offset
    pub fn append(&mut self, frame: &[u8], seq: u64, now_ms: i64) -> SpoolResult<u64> {
        if let Err(e) = self.file.write_all(frame) {
            // Drop whatever part of the frame landed so the tail stays clean
            let _ = self.file.set_len(self.len);
            return Err(SpoolError::write_fault(&self.path, e));
        }
        self.len += frame.len() as u64;
        self.last_seq = Some(seq);
        self.last_write_ms = now_ms;
        self.dirty = true;
        self.committed_len.store(self.len, Ordering::Release);
        Ok(self.len)
    }

    /// fdatasync if there are unsynced writes and the interval has elapsed
    pub fn sync_if_due(&mut self, interval: Duration) -> SpoolResult<bool> {
        if self.dirty && self.last_sync.elapsed() >= interval {
            self.sync()?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn sync(&mut self) -> SpoolResult<()> {
        if self.dirty {
            self.file
                .sync_data()
                .map_err(|e| SpoolError::write_fault(&self.path, e))?;
            self.dirty = false;
        }
        self.last_sync = Instant::now();
        Ok(())
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.created_at_ms
    }

    /// Sync, then rename to the closed name. Must hold at least one frame.
    pub fn close(mut self) -> SpoolResult<SegmentMeta> {
        let last_seq = self.last_seq.ok_or_else(|| {
            SpoolError::Corrupt(format!("refusing to close empty segment {}", self.id))
        })?;
        self.sync()?;

        let name = SegmentName::Closed {
            id: self.id,
            first_seq: self.first_seq,
            last_seq,
        };
        let closed_path = self.dir.join(name.file_name());
        fs::rename(&self.path, &closed_path)
            .map_err(|e| SpoolError::write_fault(&closed_path, e))?;
        sync_dir(&self.dir);

        info!(
            "Closed segment {} (seq {}..={}, {} bytes)",
            self.id, self.first_seq, last_seq, self.len
        );

        Ok(SegmentMeta {
            id: self.id,
            path: closed_path,
            state: SegmentState::Closed,
            first_seq: self.first_seq,
            last_seq: Some(last_seq),
            bytes: self.len,
            created_at_ms: self.created_at_ms,
            last_write_ms: self.last_write_ms,
        })
    }
}

/// Best-effort directory fsync so renames and creations survive power loss
pub(crate) fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        if let Err(e) = handle.sync_all() {
            debug!("Directory sync failed for {}: {}", dir.display(), e);
        }
    }
}

pub(crate) fn modified_ms(path: &Path) -> Option<i64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(std::time::UNIX_EPOCH).ok()?;
    Some(since_epoch.as_millis() as i64)
}
