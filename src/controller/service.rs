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

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use zenoh::query::Query;
use zenoh::Session;

use super::ack::AckPublisher;
use super::ingest::Ingestor;
use crate::protocol::{ack_key, liveness_key};

/// Upper bound on concurrent sink writes
const MAX_IN_FLIGHT_WRITES: usize = 64;

/// Controller side: ingest, acknowledgements and liveness queries over Zenoh
pub struct ControllerService {
    session: Session,
    ingestor: Arc<Ingestor>,
    key_prefix: String,
    ack_interval: Duration,
}

impl ControllerService {
    pub fn new(session: Session, ingestor: Arc<Ingestor>, key_prefix: String, ack_interval: Duration) -> Self {
        Self {
            session,
            ingestor,
            key_prefix,
            ack_interval,
        }
    }

    /// Run the controller until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let data_key = format!("{}/*/data", self.key_prefix);
        let data_subscriber = self
            .session
            .declare_subscriber(data_key.clone())
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        info!("Ingesting data from '{}'", data_key);

        let status_key = format!("{}/*/status", self.key_prefix);
        let status_subscriber = self
            .session
            .declare_subscriber(status_key.clone())
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        info!("Tracking node status on '{}'", status_key);

        let liveness_key_expr = format!("{}/liveness/*", self.key_prefix);
        let liveness_queryable = self
            .session
            .declare_queryable(liveness_key_expr.clone())
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        info!("Liveness interface listening on '{}'", liveness_key_expr);

        let writes = Arc::new(Semaphore::new(MAX_IN_FLIGHT_WRITES));
        let mut ack_publisher = AckPublisher::new(self.ingestor.clone());
        let mut ack_tick = tokio::time::interval(self.ack_interval);
        ack_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Ok(sample) = data_subscriber.recv_async() => {
                    let payload = sample.payload().to_bytes().to_vec();
                    let permit = writes.clone().acquire_owned().await?;
                    let ingestor = self.ingestor.clone();
                    tokio::spawn(async move {
                        if let Err(e) = ingestor.ingest_payload(&payload).await {
                            error!("Error ingesting sample: {:#}", e);
                        }
                        drop(permit);
                    });
                }
                Ok(sample) = status_subscriber.recv_async() => {
                    let payload = sample.payload().to_bytes();
                    if let Err(e) = self.ingestor.on_status_payload(&payload) {
                        warn!("Ignoring bad status on '{}': {}", sample.key_expr(), e);
                    }
                }
                Ok(query) = liveness_queryable.recv_async() => {
                    if let Err(e) = self.handle_liveness_query(query).await {
                        error!("Error handling liveness query: {}", e);
                    }
                }
                _ = ack_tick.tick() => {
                    self.publish_acks(&mut ack_publisher).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Controller stopped");
        Ok(())
    }

    async fn publish_acks(&self, ack_publisher: &mut AckPublisher) {
        for ack in ack_publisher.due() {
            let key = ack_key(&self.key_prefix, &ack.node_id);
            let bytes = match serde_json::to_vec(&ack) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("Failed to encode ack: {}", e);
                    continue;
                }
            };
            match self.session.put(key.clone(), bytes).await {
                Ok(()) => {
                    debug!("Acked seq {} to '{}'", ack.acked_seq, key);
                    ack_publisher.sent(&ack);
                }
                Err(e) => warn!("Failed to publish ack on '{}': {}", key, e),
            }
        }
    }

    async fn handle_liveness_query(&self, query: Query) -> Result<()> {
        info!("Received liveness query on '{}'", query.selector());

        // Pattern: <prefix>/liveness/<node> or a wildcard for every node
        let requested = query
            .key_expr()
            .as_str()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let liveness = self.ingestor.liveness();
        let nodes = if requested.contains('*') {
            liveness.known_nodes()
        } else {
            vec![requested]
        };

        for node_id in nodes {
            let report = liveness.report(&node_id, self.ingestor.acked_seq(&node_id));
            let response_bytes = serde_json::to_vec(&report)?;
            query
                .reply(liveness_key(&self.key_prefix, &node_id), response_bytes)
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
        }
        Ok(())
    }
}
