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

//! Bidirectional topic-based message bus between one server worker and its
//! connected clients, bridged across replicas through the backbone.

mod connection_handle;
mod hub_statistics;
mod rate_limiter;

pub use self::connection_handle::ConnectionHandle;
pub use self::hub_statistics::ClientStat;
pub use self::hub_statistics::HubStatistics;
pub use self::hub_statistics::STATS_ADD_TOPIC;
pub use self::hub_statistics::STATS_REMOVE_TOPIC;
pub use self::hub_statistics::STATS_SERVER_KEEPALIVE_TOPIC;
pub use self::hub_statistics::STATS_STATE_SYNC_TOPIC;
pub use self::hub_statistics::STATS_WAKEUP_TOPIC;
pub use self::rate_limiter::RateLimiter;

use crate::conf::PubSubConfig;
use crossbeam_skiplist::SkipMap;
use opal_backbone::BackboneConnector;
use opal_backbone::BackboneItem;
use opal_backbone::EVENT_NOTIFIER_CHANNEL;
use opal_backbone::FanoutEnvelope;
use opal_backbone::KEEPALIVE_TOPIC;
use opal_client::msg::WELCOME_TOPIC;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

/// Prefix of topics reserved for hub-internal traffic.
const RESERVED_TOPIC_PREFIX: &str = "__opal";

/// Where a published envelope originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOrigin {
    /// Published on this worker: deliver locally and fan out to the
    /// backbone.
    Local,
    /// Received from the backbone: deliver locally only.
    Remote,
}

/** PubSub Hub.

Maintains per-topic subscriber sets of connections, delivers published
envelopes to every local subscriber and bridges traffic across server
replicas through the backbone. Envelopes carry this worker's notifier id so
the originating replica can suppress re-delivery of its own traffic.
*/
pub struct PubSubHub {
    notifier_id: Uuid,
    rate_limit: Option<String>,
    topics: SkipMap<String, SkipMap<u64, Arc<ConnectionHandle>>>,
    connections: SkipMap<u64, Arc<ConnectionHandle>>,
    conn_counter: AtomicU64,
    backbone: Arc<dyn BackboneConnector>,
    statistics: Arc<HubStatistics>,
    keepalive_interval_micros: u64,
    stats_keepalive_micros: u64,
}

impl PubSubHub {
    /// Grace before a disconnected client is dropped from all topic sets.
    const UNSUBSCRIBE_GRACE_MILLIS: u64 = 1_000;

    /// Return a new instance and start the backbone bridge.
    pub async fn new(
        pubsub_config: &PubSubConfig,
        backbone: &Arc<dyn BackboneConnector>,
    ) -> Arc<Self> {
        let notifier_id = Uuid::new_v4();
        let statistics = HubStatistics::new(
            &notifier_id.to_string(),
            pubsub_config.stats_keepalive_seconds(),
        );
        log::info!("PubSub Hub worker '{notifier_id}' starting.");
        Arc::new(Self {
            notifier_id,
            rate_limit: pubsub_config.rate_limit().map(str::to_string),
            topics: SkipMap::default(),
            connections: SkipMap::default(),
            conn_counter: AtomicU64::new(0),
            backbone: Arc::clone(backbone),
            statistics,
            keepalive_interval_micros: pubsub_config.keepalive_interval_seconds() * 1_000_000,
            stats_keepalive_micros: pubsub_config.stats_keepalive_seconds() * 1_000_000 / 2,
        })
        .init()
    }

    /// Start background tasks.
    fn init(self: Arc<Self>) -> Arc<Self> {
        let self_clone = Arc::clone(&self);
        tokio::spawn(async move { self_clone.backbone_bridge_loop().await });
        let self_clone = Arc::clone(&self);
        tokio::spawn(async move { self_clone.keepalive_loop().await });
        let self_clone = Arc::clone(&self);
        tokio::spawn(async move { self_clone.statistics_loop().await });
        self
    }

    /// Worker statistics.
    pub fn statistics(&self) -> &Arc<HubStatistics> {
        &self.statistics
    }

    /// Register a new client connection.
    ///
    /// Returns the handle and the receiving end of the connection's
    /// outbound queue. The welcome envelope carrying the assigned client id
    /// is already queued.
    pub async fn register_connection(
        &self,
        remote_address: &str,
    ) -> (Arc<ConnectionHandle>, UnboundedReceiver<FanoutEnvelope>) {
        let conn_id = self.conn_counter.fetch_add(1, Ordering::Relaxed);
        let client_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let rate_limiter = self
            .rate_limit
            .as_deref()
            .and_then(RateLimiter::parse);
        let handle = ConnectionHandle::new(conn_id, &client_id, remote_address, tx, rate_limiter);
        self.connections.insert(conn_id, Arc::clone(&handle));
        handle.deliver(FanoutEnvelope::new(
            self.notifier_id,
            WELCOME_TOPIC,
            serde_json::json!({"client_id": &client_id}),
        ));
        log::info!("Client '{client_id}' connected from {remote_address}.");
        let payload = self.statistics.local_client_added(ClientStat {
            client_id,
            topics: vec![],
            connected_at_micros: handle.connected_at_micros(),
            remote_address: remote_address.to_owned(),
        });
        self.publish(STATS_ADD_TOPIC, payload, PublishOrigin::Local)
            .await;
        (handle, rx)
    }

    /// Remove a connection from all topic sets after a short grace.
    pub fn unregister_connection(self: &Arc<Self>, conn_id: u64) {
        let self_clone = Arc::clone(self);
        tokio::spawn(async move {
            sleep(Duration::from_millis(Self::UNSUBSCRIBE_GRACE_MILLIS)).await;
            self_clone.drop_connection(conn_id).await;
        });
    }

    /// Immediately remove a connection from all topic sets.
    async fn drop_connection(&self, conn_id: u64) {
        let Some(entry) = self.connections.remove(&conn_id) else {
            return;
        };
        let handle = entry.value();
        for topic_entry in self.topics.iter() {
            topic_entry.value().remove(&conn_id);
        }
        log::info!("Client '{}' disconnected.", handle.client_id());
        let payload = self.statistics.local_client_removed(handle.client_id());
        self.publish(STATS_REMOVE_TOPIC, payload, PublishOrigin::Local)
            .await;
    }

    /// Add a connection to the subscriber set of each topic.
    pub fn subscribe(&self, handle: &Arc<ConnectionHandle>, topics: &[String]) {
        for topic in topics {
            if topic.starts_with(RESERVED_TOPIC_PREFIX) {
                log::info!(
                    "Client '{}' may not subscribe to reserved topic '{topic}'.",
                    handle.client_id()
                );
                continue;
            }
            self.topics
                .get_or_insert_with(topic.clone(), SkipMap::default)
                .value()
                .insert(handle.conn_id(), Arc::clone(handle));
            handle.add_topic(topic);
        }
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Client '{}' subscriptions are now {:?}.",
                handle.client_id(),
                handle.topics()
            );
        }
    }

    /// Remove a connection from the subscriber set of each topic.
    pub fn unsubscribe(&self, handle: &Arc<ConnectionHandle>, topics: &[String]) {
        for topic in topics {
            if let Some(subscribers) = self.topics.get(topic) {
                subscribers.value().remove(&handle.conn_id());
            }
            handle.remove_topic(topic);
        }
    }

    /// Publish a payload on a topic.
    ///
    /// Local origin also fans the envelope out to the backbone so that
    /// clients connected to other replicas receive it.
    pub async fn publish(&self, topic: &str, data: serde_json::Value, origin: PublishOrigin) {
        let envelope = FanoutEnvelope::new(self.notifier_id, topic, data);
        self.publish_envelope(envelope, origin).await;
    }

    /// Deliver an envelope locally and, for local origin, to the backbone.
    /// Remote envelopes keep their originating notifier id and are never
    /// re-broadcast.
    async fn publish_envelope(&self, envelope: FanoutEnvelope, origin: PublishOrigin) {
        self.deliver_local(&envelope);
        if origin == PublishOrigin::Local {
            if let Err(e) = self
                .backbone
                .publish(EVENT_NOTIFIER_CHANNEL, &envelope.as_bytes())
                .await
            {
                log::debug!("Backbone publish failed: {e}");
            }
        }
    }

    /// Deliver an envelope to every local subscriber of its topic.
    fn deliver_local(&self, envelope: &FanoutEnvelope) {
        let Some(subscribers) = self.topics.get(&envelope.topic) else {
            return;
        };
        let mut dead = Vec::new();
        for entry in subscribers.value().iter() {
            if !entry.value().deliver(envelope.clone()) {
                dead.push(*entry.key());
            }
        }
        for conn_id in dead {
            log::debug!("Dropping connection {conn_id} that stopped consuming.");
            subscribers.value().remove(&conn_id);
        }
    }

    /// Bridge envelopes from the backbone into local delivery.
    async fn backbone_bridge_loop(self: Arc<Self>) {
        loop {
            let mut subscription = match self.backbone.subscribe(EVENT_NOTIFIER_CHANNEL).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    log::warn!("Backbone subscription failed: {e}. Retrying shortly.");
                    sleep(Duration::from_millis(1_000)).await;
                    continue;
                }
            };
            // A (re)subscription is a resync point: ask peers for their
            // subscriber tables.
            self.statistics.reset_remote();
            self.publish(
                STATS_WAKEUP_TOPIC,
                self.statistics.beacon_payload(),
                PublishOrigin::Local,
            )
            .await;
            loop {
                match subscription.next().await {
                    Some(BackboneItem::Message(message)) => {
                        let Some(envelope) = FanoutEnvelope::from_slice(&message) else {
                            continue;
                        };
                        if envelope.notifier_id == self.notifier_id {
                            // Own fan-out echo.
                            continue;
                        }
                        self.handle_remote_envelope(envelope).await;
                    }
                    Some(BackboneItem::Resync) => {
                        log::info!("Backbone signaled resync.");
                        break;
                    }
                    None => {
                        log::info!("Backbone subscription ended.");
                        sleep(Duration::from_millis(1_000)).await;
                        break;
                    }
                }
            }
        }
    }

    /// Deliver a remote envelope locally, routing statistics traffic to the
    /// statistics view.
    async fn handle_remote_envelope(&self, envelope: FanoutEnvelope) {
        if envelope.topic.starts_with(RESERVED_TOPIC_PREFIX) {
            if envelope.topic == KEEPALIVE_TOPIC {
                if log::log_enabled!(log::Level::Trace) {
                    log::trace!("Backbone keepalive received.");
                }
                return;
            }
            let wants_state_sync = self
                .statistics
                .handle_remote(&envelope.topic, &envelope.data);
            if wants_state_sync {
                self.publish(
                    STATS_STATE_SYNC_TOPIC,
                    self.statistics.state_sync_payload(),
                    PublishOrigin::Local,
                )
                .await;
            }
            return;
        }
        self.publish_envelope(envelope, PublishOrigin::Remote).await;
    }

    /// Publish keepalive envelopes surfacing silent backbone failures.
    async fn keepalive_loop(self: Arc<Self>) {
        loop {
            sleep(Duration::from_micros(self.keepalive_interval_micros)).await;
            self.publish(
                KEEPALIVE_TOPIC,
                serde_json::json!({"worker_id": self.notifier_id.to_string()}),
                PublishOrigin::Local,
            )
            .await;
        }
    }

    /// Publish worker keepalives every T/2 and forget silent peers after T.
    async fn statistics_loop(self: Arc<Self>) {
        loop {
            sleep(Duration::from_micros(self.stats_keepalive_micros)).await;
            self.publish(
                STATS_SERVER_KEEPALIVE_TOPIC,
                self.statistics.beacon_payload(),
                PublishOrigin::Local,
            )
            .await;
            self.statistics.prune_expired();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_backbone_mem::InMemoryBackbone;

    async fn hub() -> Arc<PubSubHub> {
        let pubsub_config: PubSubConfig = serde_json::from_str(
            r#"{"backboneuri":"mem://","keepaliveintervalseconds":3600,"ratelimit":"","statskeepaliveseconds":20}"#,
        )
        .unwrap();
        let backbone: Arc<dyn BackboneConnector> = InMemoryBackbone::new().await;
        PubSubHub::new(&pubsub_config, &backbone).await
    }

    async fn welcome(rx: &mut UnboundedReceiver<FanoutEnvelope>) -> FanoutEnvelope {
        let envelope = rx.recv().await.expect("no welcome");
        assert_eq!(envelope.topic, WELCOME_TOPIC);
        envelope
    }

    #[tokio::test]
    async fn topic_isolation() {
        let hub = hub().await;
        let (conn_a, mut rx_a) = hub.register_connection("127.0.0.1:1").await;
        let (conn_b, mut rx_b) = hub.register_connection("127.0.0.1:2").await;
        welcome(&mut rx_a).await;
        welcome(&mut rx_b).await;
        hub.subscribe(&conn_a, &["alpha".to_string()]);
        hub.subscribe(&conn_b, &["beta".to_string()]);
        hub.publish("alpha", serde_json::json!({"n": 1}), PublishOrigin::Local)
            .await;
        hub.publish("beta", serde_json::json!({"n": 2}), PublishOrigin::Local)
            .await;
        let got_a = rx_a.recv().await.unwrap();
        assert_eq!(got_a.topic, "alpha");
        let got_b = rx_b.recv().await.unwrap();
        assert_eq!(got_b.topic, "beta");
        // Neither connection sees the other topic.
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn per_topic_order_is_publish_order() {
        let hub = hub().await;
        let (conn, mut rx) = hub.register_connection("127.0.0.1:1").await;
        welcome(&mut rx).await;
        hub.subscribe(&conn, &["t".to_string()]);
        for n in 0..10 {
            hub.publish("t", serde_json::json!({"n": n}), PublishOrigin::Local)
                .await;
        }
        for n in 0..10 {
            let envelope = rx.recv().await.unwrap();
            assert_eq!(envelope.data["n"], n);
        }
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let hub = hub().await;
        let (conn, mut rx) = hub.register_connection("127.0.0.1:1").await;
        welcome(&mut rx).await;
        hub.subscribe(&conn, &["t".to_string()]);
        hub.unsubscribe(&conn, &["t".to_string()]);
        hub.publish("t", serde_json::json!({}), PublishOrigin::Local)
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reserved_topics_cannot_be_subscribed() {
        let hub = hub().await;
        let (conn, mut rx) = hub.register_connection("127.0.0.1:1").await;
        welcome(&mut rx).await;
        hub.subscribe(&conn, &["__opal_stats_add".to_string()]);
        assert!(conn.topics().is_empty());
    }

    #[tokio::test]
    async fn two_hubs_share_a_backbone() {
        let backbone_impl = InMemoryBackbone::new().await;
        let backbone: Arc<dyn BackboneConnector> = backbone_impl;
        let pubsub_config: PubSubConfig = serde_json::from_str(
            r#"{"backboneuri":"mem://","keepaliveintervalseconds":3600,"ratelimit":"","statskeepaliveseconds":20}"#,
        )
        .unwrap();
        let hub_a = PubSubHub::new(&pubsub_config, &backbone).await;
        let hub_b = PubSubHub::new(&pubsub_config, &backbone).await;
        let (conn_b, mut rx_b) = hub_b.register_connection("127.0.0.1:2").await;
        welcome(&mut rx_b).await;
        hub_b.subscribe(&conn_b, &["t".to_string()]);
        // Give the bridge tasks a moment to subscribe to the backbone.
        tokio::time::sleep(Duration::from_millis(100)).await;
        hub_a
            .publish("t", serde_json::json!({"from": "a"}), PublishOrigin::Local)
            .await;
        let envelope = tokio::time::timeout(Duration::from_secs(5), rx_b.recv())
            .await
            .expect("timed out")
            .expect("closed");
        assert_eq!(envelope.topic, "t");
        assert_eq!(envelope.data["from"], "a");
    }
}
