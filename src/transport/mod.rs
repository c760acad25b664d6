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

// Node-side transport abstraction

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::protocol::NodeStatus;

pub mod memory;
pub mod zenoh;

pub use memory::MemoryTransport;
pub use self::zenoh::ZenohTransport;

/// What the replay publisher and node runtime need from the network
///
/// Implementations publish envelope payloads and status heartbeats for one
/// node and deliver acknowledgements addressed to it. Publishing is
/// best-effort: an error means "not delivered", never "partially delivered".
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish one protobuf-encoded envelope
    async fn publish_data(&self, payload: Vec<u8>) -> Result<()>;

    /// Publish a status heartbeat
    async fn publish_status(&self, status: &NodeStatus) -> Result<()>;

    /// Whether a controller-side peer is currently reachable
    async fn is_connected(&self) -> bool;

    /// Stream of raw ack payloads for this node
    async fn subscribe_acks(&self) -> Result<mpsc::Receiver<Vec<u8>>>;

    /// Get transport type identifier
    fn transport_type(&self) -> &str;
}
