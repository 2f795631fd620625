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

//! Validation and fan-out of data-update notifications.

use super::PubSubHub;
use super::ServerError;
use super::ServerErrorKind;
use super::auth::PeerIdentity;
use super::auth::PeerKind;
use super::hub::PublishOrigin;
use crate::conf::DataConfig;
use opal_client::msg::DataSourceConfig;
use opal_client::msg::DataUpdate;
use std::sync::Arc;
use uuid::Uuid;

/// Accepts data-update notifications from authorized publishers, assigns
/// update ids and republishes them on every topic the entries name.
pub struct DataUpdateRouter {
    hub: Arc<PubSubHub>,
    base_sources: DataSourceConfig,
}

impl DataUpdateRouter {
    /// Return a new instance.
    pub fn new(hub: &Arc<PubSubHub>, data_config: &DataConfig) -> Arc<Self> {
        Arc::new(Self {
            hub: Arc::clone(hub),
            base_sources: data_config.sources(),
        })
    }

    /// Validate, assign an id and fan the update out.
    pub async fn publish_update(
        &self,
        identity: &PeerIdentity,
        mut update: DataUpdate,
        scope_id: Option<&str>,
    ) -> Result<String, ServerError> {
        if identity.kind() != PeerKind::Datasource {
            Err(ServerErrorKind::Unauthorized.error_with_msg(format!(
                "Peer '{}' is not a data source.",
                identity.identity_string()
            )))?;
        }
        if update.entries.is_empty() {
            Err(ServerErrorKind::MalformedIdentifier
                .error_with_msg("A data update without entries is meaningless."))?;
        }
        let update_id = Uuid::new_v4().to_string();
        update.id = Some(update_id.clone());
        log::info!(
            "Data update '{update_id}' by '{}' ({} entries): {}",
            identity.identity_string(),
            update.entries.len(),
            &update.reason
        );
        let payload = serde_json::to_value(&update).map_err(|e| {
            ServerErrorKind::Unspecified.error_with_msg(format!("Unserializable update: {e}"))
        })?;
        for topic in update.distinct_topics() {
            let topic = match scope_id {
                Some(scope_id) => format!("scope:{scope_id}:{topic}"),
                None => topic,
            };
            self.hub
                .publish(&topic, payload.clone(), PublishOrigin::Local)
                .await;
        }
        Ok(update_id)
    }

    /// The server-side base data configuration served to clients at
    /// bootstrap.
    pub fn base_sources(&self) -> &DataSourceConfig {
        &self.base_sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::PubSubConfig;
    use opal_backbone::BackboneConnector;
    use opal_backbone_mem::InMemoryBackbone;

    async fn router() -> (Arc<PubSubHub>, Arc<DataUpdateRouter>) {
        let pubsub_config: PubSubConfig = serde_json::from_str(
            r#"{"backboneuri":"mem://","keepaliveintervalseconds":3600,"ratelimit":"","statskeepaliveseconds":20}"#,
        )
        .unwrap();
        let backbone: Arc<dyn BackboneConnector> = InMemoryBackbone::new().await;
        let hub = PubSubHub::new(&pubsub_config, &backbone).await;
        let data_config: DataConfig =
            serde_json::from_str(r#"{"sources":"{\"entries\":[]}"}"#).unwrap();
        let router = DataUpdateRouter::new(&hub, &data_config);
        (hub, router)
    }

    fn update() -> DataUpdate {
        serde_json::from_str(
            r#"{"entries":[{"url":"https://x.invalid/u","dst_path":"/u","topics":["policy_data"]}],"reason":"t"}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn update_reaches_subscribed_topics_with_an_id() {
        let (hub, router) = router().await;
        let (conn, mut rx) = hub.register_connection("127.0.0.1:1").await;
        let welcome = rx.recv().await.unwrap();
        assert_eq!(welcome.topic, opal_client::msg::WELCOME_TOPIC);
        hub.subscribe(&conn, &["policy_data".to_string()]);
        let identity = PeerIdentity::new(PeerKind::Datasource, "publisher");
        let update_id = router
            .publish_update(&identity, update(), None)
            .await
            .unwrap();
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.topic, "policy_data");
        assert_eq!(envelope.data["id"], update_id.as_str());
    }

    #[tokio::test]
    async fn clients_may_not_publish_updates() {
        let (_hub, router) = router().await;
        let identity = PeerIdentity::new(PeerKind::Client, "sneaky");
        assert!(router.publish_update(&identity, update(), None).await.is_err());
    }

    #[tokio::test]
    async fn scoped_updates_use_the_scope_namespace() {
        let (hub, router) = router().await;
        let (conn, mut rx) = hub.register_connection("127.0.0.1:1").await;
        let _ = rx.recv().await.unwrap();
        hub.subscribe(&conn, &["scope:tenant1:policy_data".to_string()]);
        let identity = PeerIdentity::new(PeerKind::Datasource, "publisher");
        router
            .publish_update(&identity, update(), Some("tenant1"))
            .await
            .unwrap();
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.topic, "scope:tenant1:policy_data");
    }
}
