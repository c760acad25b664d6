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

use std::collections::HashMap;
use std::sync::Arc;

use super::ingest::Ingestor;
use crate::protocol::AckMessage;

/// Every this many rounds all acks are re-sent, changed or not, so a node
/// that missed one catches up
const RESEND_EVERY: u32 = 5;

/// Decides which acks go out on each ack interval
pub struct AckPublisher {
    ingestor: Arc<Ingestor>,
    last_sent: HashMap<String, u64>,
    round: u32,
}

impl AckPublisher {
    pub fn new(ingestor: Arc<Ingestor>) -> Self {
        Self {
            ingestor,
            last_sent: HashMap::new(),
            round: 0,
        }
    }

    /// Acks to publish this round
    pub fn due(&mut self) -> Vec<AckMessage> {
        self.round = self.round.wrapping_add(1);
        let resend_all = self.round % RESEND_EVERY == 0;

        self.ingestor
            .ack_messages()
            .into_iter()
            .filter(|ack| {
                resend_all || self.last_sent.get(&ack.node_id) != Some(&ack.acked_seq)
            })
            .collect()
    }

    /// Remember a successfully published ack
    pub fn sent(&mut self, ack: &AckMessage) {
        self.last_sent.insert(ack.node_id.clone(), ack.acked_seq);
    }
}
