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

// In-memory sink, used by tests and dry runs

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::backend::{IngestSink, UpsertOutcome};
use crate::envelope::Envelope;

type IngestKey = (String, String, i64);

#[derive(Default)]
pub struct MemorySink {
    records: DashMap<IngestKey, Envelope>,
    duplicates: AtomicU64,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    pub fn get(&self, node_id: &str, sensor_key: &str, sample_ts: i64) -> Option<Envelope> {
        self.records
            .get(&(node_id.to_string(), sensor_key.to_string(), sample_ts))
            .map(|r| r.clone())
    }

    /// All stored records ordered by node, then seq
    pub fn records(&self) -> Vec<Envelope> {
        let mut records: Vec<Envelope> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.node_id.cmp(&b.node_id).then(a.seq.cmp(&b.seq)));
        records
    }
}

#[async_trait]
impl IngestSink for MemorySink {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, envelope: &Envelope) -> Result<UpsertOutcome> {
        match self.records.entry(envelope.ingest_key()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                Ok(UpsertOutcome::Duplicate)
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(envelope.clone());
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn backend_type(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::TimeQuality;

    #[tokio::test]
    async fn test_second_upsert_is_duplicate() {
        let sink = MemorySink::new();
        let mut env = Envelope::sample("n1", "temp", 1000, 1.0, TimeQuality::Synced);
        env.seq = 1;
        assert_eq!(sink.upsert(&env).await.unwrap(), UpsertOutcome::Inserted);

        let mut again = env.clone();
        again.value = 99.0;
        assert_eq!(sink.upsert(&again).await.unwrap(), UpsertOutcome::Duplicate);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.get("n1", "temp", 1000).unwrap().value, 1.0);
        assert_eq!(sink.duplicates(), 1);
    }
}
