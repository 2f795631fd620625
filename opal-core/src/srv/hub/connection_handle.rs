/*
    Copyright 2025 MydriaTech AB

    Licensed under the Apache License 2.0 with Free world makers exception
    1.0.0 (the "License"); you may not use this file except in compliance with
    the License. You should have obtained a copy of the License with the source
    or binary distribution in file named

        LICENSE-Apache-2.0-with-FWM-Exception-1.0.0

    Unless required by applicable law or agreed to in writing, software
    distributed under the License is distributed on an "AS IS" BASIS,
    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
    See the License for the specific language governing permissions and
    limitations under the License.
*/

//! Per-connection state held by the hub.

use super::RateLimiter;
use crossbeam_skiplist::SkipMap;
use opal_backbone::FanoutEnvelope;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// One registered client connection.
///
/// Outbound envelopes are pushed into the connection's queue; the websocket
/// resource drains it. A single queue per connection preserves delivery
/// order per topic.
pub struct ConnectionHandle {
    conn_id: u64,
    client_id: String,
    remote_address: String,
    connected_at_micros: u64,
    tx: UnboundedSender<FanoutEnvelope>,
    topics: SkipMap<String, ()>,
    rate_limiter: Option<RateLimiter>,
}

impl ConnectionHandle {
    /// Return a new instance.
    pub fn new(
        conn_id: u64,
        client_id: &str,
        remote_address: &str,
        tx: UnboundedSender<FanoutEnvelope>,
        rate_limiter: Option<RateLimiter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            conn_id,
            client_id: client_id.to_owned(),
            remote_address: remote_address.to_owned(),
            connected_at_micros: opal_client::time::get_timestamp_micros(),
            tx,
            topics: SkipMap::default(),
            rate_limiter,
        })
    }

    /// Hub-internal connection identifier.
    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// Assigned client identifier.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Remote peer address.
    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    /// Connect time in epoch microseconds.
    pub fn connected_at_micros(&self) -> u64 {
        self.connected_at_micros
    }

    /// Record a topic subscription on this connection.
    pub fn add_topic(&self, topic: &str) {
        self.topics.insert(topic.to_owned(), ());
    }

    /// Remove a topic subscription from this connection.
    pub fn remove_topic(&self, topic: &str) {
        self.topics.remove(topic);
    }

    /// Topics this connection subscribes to.
    pub fn topics(&self) -> Vec<String> {
        self.topics.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Queue an envelope for delivery. Return `false` when the consumer is
    /// gone.
    pub fn deliver(&self, envelope: FanoutEnvelope) -> bool {
        self.tx.send(envelope).is_ok()
    }

    /// Take a rate limit token for an inbound message.
    pub fn allow_inbound(&self) -> bool {
        self.rate_limiter
            .as_ref()
            .map(RateLimiter::allow)
            .unwrap_or(true)
    }
}
