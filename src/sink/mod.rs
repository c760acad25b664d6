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

// Ingest sink module
//
// Durable, idempotent destinations for envelopes arriving at the
// controller. Every sink keys records on (node_id, sensor_key, sample_ts),
// so a replayed or re-sent envelope is recognised as a duplicate instead of
// being stored twice.

pub mod backend;
pub mod factory;
pub mod filesystem;
pub mod memory;
pub mod reductstore;

pub use backend::{IngestSink, UpsertOutcome};
pub use factory::SinkFactory;
pub use filesystem::FilesystemSink;
pub use memory::MemorySink;
pub use reductstore::ReductStoreSink;

/// Storage-safe entry name for one sensor of one node
pub fn entry_name(node_id: &str, sensor_key: &str) -> String {
    format!("{}_{}", node_id, sensor_key.trim_start_matches('/'))
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}
