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

// Filesystem sink implementation

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::backend::{IngestSink, UpsertOutcome};
use super::entry_name;
use crate::config::FilesystemConfig;
use crate::envelope::Envelope;

/// Stored form of one envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub node_id: String,
    pub sensor_key: String,
    pub sample_ts: i64,
    pub value: f64,
    pub time_quality: crate::envelope::TimeQuality,
    pub seq: u64,
}

impl From<&Envelope> for StoredRecord {
    fn from(env: &Envelope) -> Self {
        Self {
            node_id: env.node_id.clone(),
            sensor_key: env.sensor_key.clone(),
            sample_ts: env.sample_ts,
            value: env.value,
            time_quality: env.time_quality(),
            seq: env.seq,
        }
    }
}

/// One JSON file per record: `<base>/<node>_<sensor>/<sample_ts>.json`.
///
/// Records are written to a temp file, synced, then hard-linked into place;
/// the link fails with `AlreadyExists` for a duplicate key, so an existing
/// record is never overwritten and a crash never leaves a partial record.
pub struct FilesystemSink {
    base_path: PathBuf,
}

impl FilesystemSink {
    pub fn new(config: FilesystemConfig) -> Result<Self> {
        let base_path = PathBuf::from(&config.base_path);
        info!("Initializing filesystem sink at: {}", base_path.display());
        Ok(Self { base_path })
    }

    fn record_path(&self, envelope: &Envelope) -> PathBuf {
        self.base_path
            .join(entry_name(&envelope.node_id, &envelope.sensor_key))
            .join(format!("{}.json", envelope.sample_ts))
    }

    /// Read a stored record back
    pub async fn read(&self, envelope: &Envelope) -> Result<StoredRecord> {
        let path = self.record_path(envelope);
        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl IngestSink for FilesystemSink {
    async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path)
            .await
            .context("Failed to create base directory")
    }

    async fn upsert(&self, envelope: &Envelope) -> Result<UpsertOutcome> {
        let path = self.record_path(envelope);
        if fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(UpsertOutcome::Duplicate);
        }
        let entry_dir = path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.base_path.clone());
        fs::create_dir_all(&entry_dir)
            .await
            .context("Failed to create entry directory")?;

        let tmp_path = entry_dir.join(format!(".{}.{}.tmp", envelope.sample_ts, envelope.seq));
        let json = serde_json::to_vec(&StoredRecord::from(envelope))?;
        let mut file = fs::File::create(&tmp_path)
            .await
            .with_context(|| format!("Failed to create file: {}", tmp_path.display()))?;
        file.write_all(&json).await.context("Failed to write record")?;
        file.sync_all().await.context("Failed to sync record")?;
        drop(file);

        let outcome = match fs::hard_link(&tmp_path, &path).await {
            Ok(()) => {
                debug!("Stored {}", path.display());
                UpsertOutcome::Inserted
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => UpsertOutcome::Duplicate,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(e).with_context(|| format!("Failed to link {}", path.display()));
            }
        };
        if let Err(e) = fs::remove_file(&tmp_path).await {
            warn!("Failed to remove {}: {}", tmp_path.display(), e);
        }
        if outcome == UpsertOutcome::Inserted {
            // Make the new directory entry durable
            if let Ok(dir) = fs::File::open(&entry_dir).await {
                let _ = dir.sync_all().await;
            }
        }
        Ok(outcome)
    }

    async fn health_check(&self) -> Result<bool> {
        match fs::metadata(&self.base_path).await {
            Ok(metadata) if metadata.is_dir() => {
                let test_file = self.base_path.join(".health_check_test");
                match fs::File::create(&test_file).await {
                    Ok(mut f) => {
                        if let Err(e) = f.write_all(b"test").await {
                            warn!("Health check failed - cannot write: {}", e);
                            return Ok(false);
                        }
                        let _ = fs::remove_file(&test_file).await;
                        Ok(true)
                    }
                    Err(e) => {
                        warn!("Health check failed - cannot create file: {}", e);
                        Ok(false)
                    }
                }
            }
            Ok(_) => {
                warn!(
                    "Health check failed - base path is not a directory: {}",
                    self.base_path.display()
                );
                Ok(false)
            }
            Err(e) => {
                warn!(
                    "Health check failed - cannot access base path {}: {}",
                    self.base_path.display(),
                    e
                );
                Ok(false)
            }
        }
    }

    fn backend_type(&self) -> &str {
        "filesystem"
    }
}
