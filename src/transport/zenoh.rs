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

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use zenoh::pubsub::Publisher;
use zenoh::Session;

use super::Transport;
use crate::config::ZenohConfig;
use crate::node::Producer;
use crate::protocol::{
    ack_key, data_key, sample_key_expr, sensor_from_sample_key, status_key, NodeStatus, SampleInput,
};

/// Capacity of the ack forwarding channel
const ACK_CHANNEL_CAPACITY: usize = 64;

/// Build a zenoh session config from the YAML settings
pub fn session_config(config: &ZenohConfig) -> Result<zenoh::Config> {
    let mut zenoh_config = zenoh::Config::default();

    let mode = match config.mode.as_str() {
        "peer" | "client" | "router" => config.mode.as_str(),
        other => {
            warn!("Unknown zenoh mode '{}', falling back to peer", other);
            "peer"
        }
    };
    zenoh_config
        .insert_json5("mode", &serde_json::to_string(mode)?)
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    if let Some(connect) = &config.connect {
        zenoh_config
            .insert_json5("connect/endpoints", &serde_json::to_string(&connect.endpoints)?)
            .map_err(|e| anyhow::anyhow!("{}", e))?;
    }
    if let Some(listen) = &config.listen {
        zenoh_config
            .insert_json5("listen/endpoints", &serde_json::to_string(&listen.endpoints)?)
            .map_err(|e| anyhow::anyhow!("{}", e))?;
    }
    Ok(zenoh_config)
}

/// Open a zenoh session
pub async fn open_session(config: &ZenohConfig) -> Result<Session> {
    let session = zenoh::open(session_config(config)?)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open Zenoh session: {}", e))?;
    info!("Zenoh session opened ({} mode)", config.mode);
    Ok(session)
}

/// Zenoh-backed transport for one node
pub struct ZenohTransport {
    session: Session,
    node_id: String,
    key_prefix: String,
    data_publisher: Publisher<'static>,
    status_publisher: Publisher<'static>,
}

impl ZenohTransport {
    pub async fn new(session: Session, key_prefix: &str, node_id: &str) -> Result<Self> {
        let data_key = data_key(key_prefix, node_id);
        let data_publisher = session
            .declare_publisher(data_key.clone())
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("declaring publisher on '{}'", data_key))?;

        let status_key = status_key(key_prefix, node_id);
        let status_publisher = session
            .declare_publisher(status_key.clone())
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("declaring publisher on '{}'", status_key))?;

        info!("Publishing data on '{}', status on '{}'", data_key, status_key);

        Ok(Self {
            session,
            node_id: node_id.to_string(),
            key_prefix: key_prefix.to_string(),
            data_publisher,
            status_publisher,
        })
    }
}

#[async_trait]
impl Transport for ZenohTransport {
    async fn publish_data(&self, payload: Vec<u8>) -> Result<()> {
        self.data_publisher
            .put(payload)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))
    }

    async fn publish_status(&self, status: &NodeStatus) -> Result<()> {
        let bytes = serde_json::to_vec(status)?;
        self.status_publisher
            .put(bytes)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))
    }

    async fn is_connected(&self) -> bool {
        let info = self.session.info();
        let routers = info.routers_zid().await.count();
        let peers = info.peers_zid().await.count();
        routers + peers > 0
    }

    async fn subscribe_acks(&self) -> Result<mpsc::Receiver<Vec<u8>>> {
        let key = ack_key(&self.key_prefix, &self.node_id);
        let subscriber = self
            .session
            .declare_subscriber(key.clone())
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("declaring subscriber on '{}'", key))?;
        info!("Listening for acks on '{}'", key);

        let (tx, rx) = mpsc::channel(ACK_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Ok(sample) = subscriber.recv_async().await {
                let payload = sample.payload().to_bytes().to_vec();
                if tx.send(payload).await.is_err() {
                    debug!("Ack receiver dropped, stopping ack subscription");
                    break;
                }
            }
        });
        Ok(rx)
    }

    fn transport_type(&self) -> &str {
        "zenoh"
    }
}

/// Feed samples published by local producers into the spool until shutdown
pub async fn forward_samples(
    session: &Session,
    key_prefix: &str,
    producer: Producer,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let key = sample_key_expr(key_prefix, producer.node_id());
    let subscriber = session
        .declare_subscriber(key.clone())
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    info!("Accepting samples on '{}'", key);

    loop {
        tokio::select! {
            Ok(sample) = subscriber.recv_async() => {
                let key_expr = sample.key_expr().as_str();
                let Some(sensor_key) = sensor_from_sample_key(key_prefix, producer.node_id(), key_expr) else {
                    debug!("Ignoring sample on '{}'", key_expr);
                    continue;
                };
                let input: SampleInput = match serde_json::from_slice(&sample.payload().to_bytes()) {
                    Ok(input) => input,
                    Err(e) => {
                        warn!("Ignoring malformed sample on '{}': {}", key_expr, e);
                        continue;
                    }
                };
                if let Err(e) = producer
                    .append(sensor_key, input.sample_ts, input.value, input.time_quality)
                    .await
                {
                    error!("Failed to spool sample from '{}': {}", key_expr, e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    Ok(())
}
