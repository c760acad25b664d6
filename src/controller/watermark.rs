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

use std::collections::BTreeMap;

/// Highest seq below which every frame of a node is either durably stored
/// or known to be permanently lost.
///
/// Out-of-order arrivals wait in `pending` until the gap before them is
/// filled; loss ranges reported by the node let the watermark step over
/// frames that will never arrive.
#[derive(Debug, Default, Clone)]
pub struct ContiguousWatermark {
    acked: u64,
    acked_sample_ts: Option<i64>,
    /// seq -> sample_ts of stored frames above the watermark
    pending: BTreeMap<u64, i64>,
    /// start -> end of ranges the node reported as lost
    lost: BTreeMap<u64, u64>,
}

impl ContiguousWatermark {
    pub fn new(acked: u64) -> Self {
        Self {
            acked,
            ..Self::default()
        }
    }

    pub fn acked(&self) -> u64 {
        self.acked
    }

    /// `sample_ts` of the frame at the watermark, when it was stored here
    pub fn acked_sample_ts(&self) -> Option<i64> {
        self.acked_sample_ts
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Record a durably stored frame. Returns true when the watermark moved.
    pub fn observe(&mut self, seq: u64, sample_ts: i64) -> bool {
        if seq <= self.acked {
            return false;
        }
        self.pending.insert(seq, sample_ts);
        self.settle()
    }

    /// Record a range the node will never deliver
    pub fn mark_lost(&mut self, start: u64, end: u64) -> bool {
        if end <= self.acked || start > end {
            return false;
        }
        let start = start.max(self.acked + 1);
        let entry = self.lost.entry(start).or_insert(end);
        *entry = (*entry).max(end);
        self.settle()
    }

    /// Raise the watermark to a value the node already holds as acknowledged
    pub fn raise_floor(&mut self, acked: u64) -> bool {
        if acked <= self.acked {
            return false;
        }
        self.acked = acked;
        self.acked_sample_ts = None;
        self.settle();
        true
    }

    fn settle(&mut self) -> bool {
        let before = self.acked;
        loop {
            let next = self.acked + 1;
            if let Some(ts) = self.pending.remove(&next) {
                self.acked = next;
                self.acked_sample_ts = Some(ts);
                continue;
            }
            let covering = self
                .lost
                .range(..=next)
                .next_back()
                .map(|(_, &end)| end)
                .filter(|&end| end >= next);
            if let Some(end) = covering {
                self.acked = end;
                self.acked_sample_ts = None;
                continue;
            }
            break;
        }

        let acked = self.acked;
        self.pending.retain(|&seq, _| seq > acked);
        self.lost.retain(|_, end| *end > acked);
        self.acked > before
    }
}
