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

// Ingest sink trait for idempotent writes

use anyhow::Result;
use async_trait::async_trait;

use crate::envelope::Envelope;

/// Result of an idempotent write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// A record with the same key was already durable
    Duplicate,
}

/// Durable destination for ingested envelopes
///
/// `upsert` must only return once the record is durable, and must report a
/// second write of the same `(node_id, sensor_key, sample_ts)` as
/// [`UpsertOutcome::Duplicate`] without altering the stored record.
#[async_trait]
pub trait IngestSink: Send + Sync {
    /// Initialize the sink (create bucket/directory if needed)
    async fn initialize(&self) -> Result<()>;

    /// Write one envelope idempotently
    async fn upsert(&self, envelope: &Envelope) -> Result<UpsertOutcome>;

    /// Upsert with retry logic (optional, has default implementation)
    async fn upsert_with_retry(&self, envelope: &Envelope, max_retries: u32) -> Result<UpsertOutcome> {
        use tokio::time::{sleep, Duration};
        use tracing::{info, warn};

        let mut attempt = 0;
        let mut delay = Duration::from_millis(100);

        loop {
            match self.upsert(envelope).await {
                Ok(outcome) => {
                    if attempt > 0 {
                        info!(
                            "Stored seq {} of node '{}' after {} retries",
                            envelope.seq, envelope.node_id, attempt
                        );
                    }
                    return Ok(outcome);
                }
                Err(e) if attempt < max_retries => {
                    warn!(
                        "Storing seq {} of node '{}' failed (attempt {}/{}): {}. Retrying in {:?}",
                        envelope.seq,
                        envelope.node_id,
                        attempt + 1,
                        max_retries,
                        e,
                        delay
                    );
                    sleep(delay).await;
                    delay *= 2; // Exponential backoff
                    delay = delay.min(Duration::from_secs(30));
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "Storing seq {} of node '{}' failed after {} attempts: {}",
                        envelope.seq,
                        envelope.node_id,
                        max_retries,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Health check
    async fn health_check(&self) -> Result<bool>;

    /// Get sink type identifier
    fn backend_type(&self) -> &str;
}
