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

//! Normalized telemetry sample exchanged between the producer and the spool.
//!
//! The envelope is encoded with protobuf so the same bytes serve as the
//! on-disk frame payload and the replay wire payload. `seq` and `sample_ts`
//! use fixed-width encodings so that frame sizes do not drift as sequence
//! numbers grow.

use prost::Message;
use serde::{Deserialize, Serialize};

use crate::error::SpoolError;

/// Quality of the producer's clock at the moment a sample was taken
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum TimeQuality {
    Unknown = 0,
    Synced = 1,
    MonotonicOnly = 2,
}

/// One telemetry sample
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(string, tag = "1")]
    pub node_id: String,
    #[prost(string, tag = "2")]
    pub sensor_key: String,
    /// Producer-observed time, epoch milliseconds
    #[prost(sfixed64, tag = "3")]
    pub sample_ts: i64,
    #[prost(double, tag = "4")]
    pub value: f64,
    #[prost(enumeration = "TimeQuality", tag = "5")]
    pub time_quality: i32,
    /// Node-local sequence number, assigned by the segment writer
    #[prost(fixed64, tag = "6")]
    pub seq: u64,
}

impl Envelope {
    /// Build an envelope as handed off by the producer (no sequence number yet)
    pub fn sample(
        node_id: impl Into<String>,
        sensor_key: impl Into<String>,
        sample_ts: i64,
        value: f64,
        time_quality: TimeQuality,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            sensor_key: sensor_key.into(),
            sample_ts,
            value,
            time_quality: time_quality as i32,
            seq: 0,
        }
    }

    /// Serialize to the protobuf payload carried inside a frame
    pub fn to_payload(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Decode a frame payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, SpoolError> {
        Envelope::decode(payload).map_err(|e| SpoolError::Corrupt(format!("bad envelope: {}", e)))
    }

    /// Unique key used by idempotent sinks
    pub fn ingest_key(&self) -> (String, String, i64) {
        (self.node_id.clone(), self.sensor_key.clone(), self.sample_ts)
    }
}
