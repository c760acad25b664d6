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

// Sink factory for creating ingest sinks from configuration

use super::backend::IngestSink;
use super::filesystem::FilesystemSink;
use super::memory::MemorySink;
use super::reductstore::ReductStoreSink;
use crate::config::SinkConfig;
use anyhow::{bail, Result};
use std::sync::Arc;

pub struct SinkFactory;

impl SinkFactory {
    /// Create ingest sink from configuration
    pub fn create(config: &SinkConfig) -> Result<Arc<dyn IngestSink>> {
        match config.backend.as_str() {
            "reductstore" => {
                let backend_config = config
                    .backend_config
                    .as_reductstore()
                    .ok_or_else(|| anyhow::anyhow!("ReductStore config missing"))?;
                Ok(Arc::new(ReductStoreSink::new(backend_config.clone())?))
            }

            "filesystem" => {
                let backend_config = config
                    .backend_config
                    .as_filesystem()
                    .ok_or_else(|| anyhow::anyhow!("Filesystem config missing"))?;
                Ok(Arc::new(FilesystemSink::new(backend_config.clone())?))
            }

            "memory" => Ok(Arc::new(MemorySink::new())),

            unknown => bail!(
                "Unknown sink backend: '{}'. Supported: reductstore, filesystem, memory",
                unknown
            ),
        }
    }
}
