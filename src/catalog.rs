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

// Shared segment catalog
//
// The spool manager mutates the catalog under a short write lock (no I/O
// while held). Replay readers take cheap snapshots and read files through
// their own descriptors. The open entry's readable length is published
// through an atomic owned by the segment writer.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::segment::{SegmentId, SegmentState};

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub id: SegmentId,
    pub path: PathBuf,
    pub state: SegmentState,
    pub first_seq: u64,
    committed_len: Arc<AtomicU64>,
}

impl CatalogEntry {
    pub fn new(
        id: SegmentId,
        path: PathBuf,
        state: SegmentState,
        first_seq: u64,
        committed_len: Arc<AtomicU64>,
    ) -> Self {
        Self {
            id,
            path,
            state,
            first_seq,
            committed_len,
        }
    }

    pub fn closed(id: SegmentId, path: PathBuf, first_seq: u64, len: u64) -> Self {
        Self::new(
            id,
            path,
            SegmentState::Closed,
            first_seq,
            Arc::new(AtomicU64::new(len)),
        )
    }

    /// Bytes a reader may consume without racing the writer
    pub fn readable_len(&self) -> u64 {
        self.committed_len.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        self.state == SegmentState::Open
    }
}

#[derive(Debug, Default)]
pub struct SegmentCatalog {
    entries: VecDeque<CatalogEntry>,
}

impl SegmentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a segment; ids must be strictly increasing
    pub fn push(&mut self, entry: CatalogEntry) {
        debug_assert!(self.entries.back().map_or(true, |last| last.id < entry.id));
        self.entries.push_back(entry);
    }

    /// Flip the open segment to closed under its final name
    pub fn mark_closed(&mut self, id: SegmentId, path: PathBuf) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.state = SegmentState::Closed;
            entry.path = path;
        }
    }

    pub fn remove(&mut self, id: SegmentId) -> Option<CatalogEntry> {
        let idx = self.entries.iter().position(|e| e.id == id)?;
        self.entries.remove(idx)
    }

    pub fn get(&self, id: SegmentId) -> Option<CatalogEntry> {
        self.entries.iter().find(|e| e.id == id).cloned()
    }

    pub fn first(&self) -> Option<CatalogEntry> {
        self.entries.front().cloned()
    }

    /// First segment created after `id`
    pub fn next_after(&self, id: SegmentId) -> Option<CatalogEntry> {
        self.entries.iter().find(|e| e.id > id).cloned()
    }

    pub fn open(&self) -> Option<CatalogEntry> {
        self.entries.iter().rev().find(|e| e.is_open()).cloned()
    }

    pub fn snapshot(&self) -> Vec<CatalogEntry> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_after_skips_removed() {
        let mut catalog = SegmentCatalog::new();
        for id in 1..=3 {
            catalog.push(CatalogEntry::closed(
                SegmentId(id),
                PathBuf::from(format!("{}", id)),
                id * 10,
                100,
            ));
        }
        catalog.remove(SegmentId(2));
        assert_eq!(catalog.next_after(SegmentId(1)).map(|e| e.id), Some(SegmentId(3)));
        assert_eq!(catalog.next_after(SegmentId(3)).map(|e| e.id), None);
        assert!(catalog.get(SegmentId(2)).is_none());
    }

    #[test]
    fn test_mark_closed_updates_path() {
        let mut catalog = SegmentCatalog::new();
        catalog.push(CatalogEntry::new(
            SegmentId(1),
            PathBuf::from("1.open"),
            SegmentState::Open,
            1,
            Arc::new(AtomicU64::new(0)),
        ));
        assert!(catalog.open().is_some());
        catalog.mark_closed(SegmentId(1), PathBuf::from("1.seg"));
        assert!(catalog.open().is_none());
        assert_eq!(catalog.get(SegmentId(1)).unwrap().path, PathBuf::from("1.seg"));
    }
}
