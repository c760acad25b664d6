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

// ReductStore sink implementation

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::backend::{IngestSink, UpsertOutcome};
use super::entry_name;
use crate::config::ReductStoreConfig;
use crate::envelope::Envelope;

/// Writes each envelope as one record of entry `<node>_<sensor>` at
/// timestamp `sample_ts` (in microseconds). ReductStore answers 409 for an
/// existing timestamp, which is exactly the idempotency key.
pub struct ReductStoreSink {
    client: Client,
    base_url: String,
    bucket_name: String,
    max_retries: u32,
}

impl ReductStoreSink {
    pub fn new(config: ReductStoreConfig) -> Result<Self> {
        let mut client_builder = reqwest::ClientBuilder::new()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(Duration::from_secs(config.timeout_seconds));

        if let Some(token) = &config.api_token {
            let mut headers = reqwest::header::HeaderMap::new();
            let auth_value = format!("Bearer {}", token);
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&auth_value).context("Invalid API token")?,
            );
            client_builder = client_builder.default_headers(headers);
        }

        let client = client_builder
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            bucket_name: config.bucket_name,
            max_retries: config.max_retries,
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Record URL for an envelope
    pub fn record_url(&self, envelope: &Envelope) -> Result<String> {
        let ts_us = timestamp_us(envelope.sample_ts)?;
        Ok(format!(
            "{}/api/v1/b/{}/{}?ts={}",
            self.base_url,
            self.bucket_name,
            entry_name(&envelope.node_id, &envelope.sensor_key),
            ts_us
        ))
    }

    /// Create bucket if it doesn't exist
    async fn ensure_bucket(&self) -> Result<()> {
        let url = format!("{}/api/v1/b/{}", self.base_url, self.bucket_name);

        match self.client.head(&url).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Bucket '{}' already exists", self.bucket_name);
                Ok(())
            }
            _ => {
                info!("Creating bucket '{}'", self.bucket_name);
                let response = self
                    .client
                    .post(&url)
                    .send()
                    .await
                    .context("Failed to create bucket")?;

                if response.status().is_success() || response.status() == StatusCode::CONFLICT {
                    info!("Bucket '{}' ready", self.bucket_name);
                    Ok(())
                } else {
                    let status = response.status();
                    let error_text = response.text().await.unwrap_or_default();
                    bail!("Failed to create bucket: {} - {}", status, error_text)
                }
            }
        }
    }
}

/// Epoch milliseconds to the microsecond timestamps ReductStore expects
pub fn timestamp_us(sample_ts_ms: i64) -> Result<u64> {
    sample_ts_ms
        .checked_mul(1000)
        .and_then(|us| u64::try_from(us).ok())
        .ok_or_else(|| anyhow::anyhow!("sample_ts {} cannot be stored as a record timestamp", sample_ts_ms))
}

#[async_trait]
impl IngestSink for ReductStoreSink {
    async fn initialize(&self) -> Result<()> {
        self.ensure_bucket().await
    }

    async fn upsert(&self, envelope: &Envelope) -> Result<UpsertOutcome> {
        let url = self.record_url(envelope)?;
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/octet-stream")
            .header("x-reduct-label-seq", envelope.seq.to_string())
            .header("x-reduct-label-node_id", envelope.node_id.as_str())
            .header("x-reduct-label-sensor_key", envelope.sensor_key.as_str())
            .header(
                "x-reduct-label-time_quality",
                format!("{:?}", envelope.time_quality()),
            )
            .body(envelope.to_payload())
            .send()
            .await
            .context("Failed to send request")?;

        match response.status() {
            status if status.is_success() => Ok(UpsertOutcome::Inserted),
            StatusCode::CONFLICT => {
                debug!("Record {} already stored", url);
                Ok(UpsertOutcome::Duplicate)
            }
            status => {
                let error_text = response.text().await.unwrap_or_default();
                bail!(
                    "ReductStore write failed with status {}: {}",
                    status,
                    error_text
                )
            }
        }
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/v1/info", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => Ok(true),
            Ok(response) => {
                warn!("Health check failed with status: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Health check error: {}", e);
                Ok(false)
            }
        }
    }

    fn backend_type(&self) -> &str {
        "reductstore"
    }
}
