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

// Durable record of samples discarded by capacity eviction

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::error::{SpoolError, SpoolResult};

/// Why the frames are gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossReason {
    MaxSpoolBytes,
    MaxSpoolAge,
    KeepFreeBytes,
    /// Unreadable frames passed over during replay
    CorruptFrame,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossEvent {
    pub range_start_seq: u64,
    pub range_end_seq: u64,
    pub estimated_count: u64,
    pub reason: LossReason,
    /// Epoch milliseconds
    pub occurred_at: i64,
}

impl LossEvent {
    pub fn new(range_start_seq: u64, range_end_seq: u64, reason: LossReason, occurred_at: i64) -> Self {
        Self {
            range_start_seq,
            range_end_seq,
            estimated_count: range_end_seq - range_start_seq + 1,
            reason,
            occurred_at,
        }
    }
}

/// Append-only JSON-lines log of loss events.
///
/// Each record is fsynced before `record` returns. Events stay active until
/// `clear_through` drops them after they have been reported.
pub struct LossLog {
    path: PathBuf,
    active: Vec<LossEvent>,
}

impl LossLog {
    pub fn open(path: impl Into<PathBuf>) -> SpoolResult<Self> {
        let path = path.into();
        let active = if path.exists() {
            Self::load(&path)?
        } else {
            Vec::new()
        };
        let log = Self { path, active };
        if log.has_torn_tail()? {
            log.rewrite()?;
        }
        if !log.active.is_empty() {
            warn!(
                "{} unreported loss event(s) loaded from {}",
                log.active.len(),
                log.path.display()
            );
        }
        Ok(log)
    }

    fn has_torn_tail(&self) -> SpoolResult<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let bytes = fs::read(&self.path).map_err(|e| SpoolError::io(&self.path, e))?;
        Ok(bytes.last().is_some_and(|b| *b != b'\n'))
    }

    /// Atomically replace the log with the active events
    fn rewrite(&self) -> SpoolResult<()> {
        let tmp_path = self.path.with_extension("tmp");
        let mut buf = Vec::new();
        for event in &self.active {
            serde_json::to_writer(&mut buf, event)?;
            buf.push(b'\n');
        }
        fs::write(&tmp_path, &buf).map_err(|e| SpoolError::write_fault(&tmp_path, e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| SpoolError::write_fault(&self.path, e))?;
        Ok(())
    }

    fn load(path: &Path) -> SpoolResult<Vec<LossEvent>> {
        let file = File::open(path).map_err(|e| SpoolError::io(path, e))?;
        let mut events = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| SpoolError::io(path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LossEvent>(&line) {
                Ok(event) => events.push(event),
                // A torn trailing line from a crash mid-append
                Err(e) => warn!(
                    "Skipping unreadable loss record {} in {}: {}",
                    line_no + 1,
                    path.display(),
                    e
                ),
            }
        }
        Ok(events)
    }

    pub fn record(&mut self, event: LossEvent) -> SpoolResult<()> {
        error!(
            "Data loss: seq {}..={} ({} samples) evicted, reason {:?}",
            event.range_start_seq, event.range_end_seq, event.estimated_count, event.reason
        );

        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SpoolError::write_fault(&self.path, e))?;
        file.write_all(&line)
            .map_err(|e| SpoolError::write_fault(&self.path, e))?;
        file.sync_data()
            .map_err(|e| SpoolError::write_fault(&self.path, e))?;

        self.active.push(event);
        Ok(())
    }

    pub fn active(&self) -> &[LossEvent] {
        &self.active
    }

    /// Drop events whose range ends at or before `through_seq`
    pub fn clear_through(&mut self, through_seq: u64) -> SpoolResult<usize> {
        let before = self.active.len();
        self.active.retain(|e| e.range_end_seq > through_seq);
        let cleared = before - self.active.len();
        if cleared == 0 {
            return Ok(0);
        }

        self.rewrite()?;

        info!("Cleared {} reported loss event(s)", cleared);
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("loss.log");

        let mut log = LossLog::open(&path).unwrap();
        log.record(LossEvent::new(1, 500, LossReason::MaxSpoolBytes, 10)).unwrap();
        log.record(LossEvent::new(501, 600, LossReason::KeepFreeBytes, 20)).unwrap();

        let reopened = LossLog::open(&path).unwrap();
        assert_eq!(reopened.active().len(), 2);
        assert_eq!(reopened.active()[0].estimated_count, 500);
        assert_eq!(reopened.active()[1].reason, LossReason::KeepFreeBytes);
    }

    #[test]
    fn test_torn_trailing_line_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("loss.log");

        let mut log = LossLog::open(&path).unwrap();
        log.record(LossEvent::new(1, 9, LossReason::MaxSpoolAge, 10)).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"range_start_seq\":10,\"range_en").unwrap();

        let mut reopened = LossLog::open(&path).unwrap();
        assert_eq!(reopened.active().len(), 1);

        // Appends after recovery start on a fresh line
        reopened.record(LossEvent::new(10, 19, LossReason::MaxSpoolAge, 11)).unwrap();
        assert_eq!(LossLog::open(&path).unwrap().active().len(), 2);
    }

    #[test]
    fn test_clear_through_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("loss.log");

        let mut log = LossLog::open(&path).unwrap();
        log.record(LossEvent::new(1, 10, LossReason::MaxSpoolBytes, 1)).unwrap();
        log.record(LossEvent::new(11, 20, LossReason::MaxSpoolBytes, 2)).unwrap();

        assert_eq!(log.clear_through(10).unwrap(), 1);
        assert_eq!(log.clear_through(10).unwrap(), 0);

        let reopened = LossLog::open(&path).unwrap();
        assert_eq!(reopened.active(), &[LossEvent::new(11, 20, LossReason::MaxSpoolBytes, 2)]);
    }
}
