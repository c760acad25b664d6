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

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::spool::AppendReceipt;

/// A freshly spooled envelope waiting for its live publish
#[derive(Debug, Clone)]
pub struct LiveItem {
    pub envelope: Envelope,
    pub receipt: AppendReceipt,
}

/// Bounded lock-free hand-off from the writer to the publisher.
///
/// Overflow evicts the oldest live copy so the newest sample still goes out
/// live; the evicted frame is already in the spool and replay delivers it
/// later.
pub struct LiveQueue {
    queue: ArrayQueue<LiveItem>,
    ready: Notify,
    pushed: AtomicU64,
    dropped: AtomicU64,
}

impl LiveQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: ArrayQueue::new(capacity.max(1)),
            ready: Notify::new(),
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Returns false when the queue was full and its oldest item was evicted
    pub fn push(&self, item: LiveItem) -> bool {
        let evicted = self.queue.force_push(item);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.ready.notify_one();

        let Some(evicted) = evicted else {
            return true;
        };
        let seq = evicted.receipt.seq;
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped.is_power_of_two() {
            warn!(
                "Live queue full, seq {} left for replay ({} live copies dropped so far)",
                seq, dropped
            );
        } else {
            debug!("Live queue full, dropping live copy of seq {}", seq);
        }
        false
    }

    /// Pop up to `max` items in queue order
    pub fn pop_batch(&self, max: usize) -> Vec<LiveItem> {
        let mut batch = Vec::with_capacity(max.min(self.queue.len()));
        while batch.len() < max {
            match self.queue.pop() {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        batch
    }

    /// Resolves once an item has been pushed (possibly before this call)
    pub async fn wait_ready(&self) {
        if !self.queue.is_empty() {
            return;
        }
        self.ready.notified().await;
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// (pushed, dropped)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.pushed.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
        )
    }
}
