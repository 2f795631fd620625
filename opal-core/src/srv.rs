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

//! OPAL server core.

pub mod auth {
    //! Authorization

    mod auth_gate;
    mod peer_identity;

    pub use self::auth_gate::AuthGate;
    pub use self::peer_identity::PeerIdentity;
    pub use self::peer_identity::PeerKind;
}
pub mod bundle;
pub mod hub;
pub mod scope;
pub mod source;

mod data_update_router;
mod server_error;

use self::auth::AuthGate;
use self::auth::PeerKind;
use self::bundle::BundleBuilder;
use self::bundle::FileFilter;
pub use self::data_update_router::DataUpdateRouter;
pub use self::hub::PubSubHub;
use self::hub::PublishOrigin;
use self::scope::ScopeManager;
pub use self::server_error::ServerError;
pub use self::server_error::ServerErrorKind;
use self::source::BundlePolicySource;
use self::source::GitPolicySource;
use self::source::LeaderLock;
use self::source::PolicySourceTracker;
use self::source::PolicySourceView;
use self::source::RevisionChange;
use self::source::TrackedPolicySource;
use self::source::WebhookValidator;
use crate::conf::ServerConfig;
use crate::conf::SourceType;
use opal_backbone::BackboneConnector;
use opal_backbone_mem::InMemoryBackbone;
use opal_client::msg::DataSourceConfig;
use opal_client::msg::PolicyBundle;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;

/** OPAL server.

Wires the PubSub Hub, the policy source tracker, the bundle builder, the
data update router, the auth gate and (optionally) the scope manager, and
exposes the operations the REST/websocket surface calls.
*/
pub struct SyncServer {
    /// Thread safe boolean used to indicate application readyness.
    health_ready: AtomicBool,
    config: Arc<ServerConfig>,
    backbone: Arc<dyn BackboneConnector>,
    hub: Arc<PubSubHub>,
    auth_gate: Arc<AuthGate>,
    source_view: Arc<dyn PolicySourceView>,
    tracker: Arc<PolicySourceTracker>,
    webhook_validator: Arc<WebhookValidator>,
    data_router: Arc<DataUpdateRouter>,
    scope_manager: Option<Arc<ScopeManager>>,
    leader_lock: Arc<LeaderLock>,
}

impl SyncServer {
    /// Return a new instance.
    ///
    /// Missing mandatory configuration (unknown backbone, unusable source,
    /// bad key material) refuses startup.
    pub async fn new(server_config: &Arc<ServerConfig>) -> Arc<Self> {
        // Setup the backbone from config.
        let backbone: Arc<dyn BackboneConnector> =
            match server_config.pubsub.backbone_uri().split("://").next() {
                Some("mem") => InMemoryBackbone::new().await,
                unknown_backbone => panic!(
                    "Unknown backbone type '{}'.",
                    unknown_backbone.unwrap_or_default()
                ),
            };
        let hub = PubSubHub::new(&server_config.pubsub, &backbone).await;
        let auth_gate = AuthGate::new(&server_config.auth)
            .unwrap_or_else(|e| panic!("Auth gate setup failed: {e}"));
        // Setup the tracked policy source from config.
        let (source_tracked, source_view): (
            Arc<dyn TrackedPolicySource>,
            Arc<dyn PolicySourceView>,
        ) = match server_config.source.source_type() {
            SourceType::Git => {
                let repo_url = server_config.source.repo_url().to_string();
                let branch = server_config.source.branch().to_string();
                let clone_path = server_config.source.clone_path().to_string();
                let source = tokio::task::spawn_blocking(move || {
                    GitPolicySource::open_or_clone(&repo_url, &branch, Path::new(&clone_path))
                })
                .await
                .unwrap_or_else(|e| panic!("Blocking task failed: {e}"))
                .unwrap_or_else(|e| panic!("Policy source setup failed: {e}"));
                (Arc::clone(&source) as Arc<dyn TrackedPolicySource>, source as Arc<dyn PolicySourceView>)
            }
            SourceType::Bundle => {
                let http = reqwest::Client::builder()
                    .timeout(tokio::time::Duration::from_secs(30))
                    .build()
                    .unwrap_or_default();
                let source = BundlePolicySource::new(
                    server_config.source.bundle_url(),
                    Path::new(server_config.source.clone_path()),
                    &http,
                )
                .unwrap_or_else(|e| panic!("Policy source setup failed: {e}"));
                (Arc::clone(&source) as Arc<dyn TrackedPolicySource>, source as Arc<dyn PolicySourceView>)
            }
        };
        let webhook_validator = WebhookValidator::new(&server_config.source)
            .unwrap_or_else(|e| panic!("Webhook validator setup failed: {e}"));
        let leader_lock = LeaderLock::new(
            server_config.source.leader_lock_path(),
            hub.statistics().worker_id(),
            server_config.source.leader_ttl_seconds(),
        );
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let tracker = PolicySourceTracker::new(
            &source_tracked,
            &leader_lock,
            server_config.source.polling_interval_seconds(),
            server_config.source.leader_ttl_seconds(),
            event_tx,
        );
        let data_router = DataUpdateRouter::new(&hub, &server_config.data);
        let scope_manager = server_config
            .scopes
            .enabled()
            .then(|| ScopeManager::new(&server_config.scopes, &hub));
        log::info!("Sync server dependencies have been created.");
        Arc::new(Self {
            health_ready: AtomicBool::new(false),
            config: Arc::clone(server_config),
            backbone,
            hub,
            auth_gate,
            source_view,
            tracker,
            webhook_validator,
            data_router,
            scope_manager,
            leader_lock,
        })
        .init(event_rx)
    }

    /// Start background tasks.
    fn init(self: Arc<Self>, event_rx: UnboundedReceiver<RevisionChange>) -> Arc<Self> {
        let self_clone = Arc::clone(&self);
        tokio::spawn(async move { self_clone.revision_event_loop(event_rx).await });
        let self_clone = Arc::clone(&self);
        tokio::spawn(async move { self_clone.post_init().await });
        self
    }

    /// Wait for the policy source to serve a revision, then report ready.
    async fn post_init(&self) {
        let mut attempts = 0u64;
        loop {
            let source_view = Arc::clone(&self.source_view);
            let ready = tokio::task::spawn_blocking(move || source_view.head_revision().is_ok())
                .await
                .unwrap_or(false);
            if ready {
                break;
            }
            attempts += 1;
            if attempts % 120 == 0 {
                log::info!("Policy source has not served an initial revision yet.");
            }
            tokio::time::sleep(tokio::time::Duration::from_micros(500_000)).await;
        }
        self.health_ready.store(true, Ordering::Relaxed);
        log::info!(
            "Sync server is ready after {} micros.",
            opal_client::time::get_timestamp_micros() - self.config.startup_ts_micros()
        );
    }

    /// Announce detected revisions on the affected policy topics.
    async fn revision_event_loop(&self, mut event_rx: UnboundedReceiver<RevisionChange>) {
        while let Some(change) = event_rx.recv().await {
            let payload = serde_json::json!({
                "revision": &change.revision,
                "old_revision": &change.old_revision,
            });
            for topic in change.affected_topics() {
                self.hub
                    .publish(&topic, payload.clone(), PublishOrigin::Local)
                    .await;
            }
        }
    }

    /// Return `true` if the app has started.
    pub fn is_health_started(&self) -> bool {
        true
    }

    /// Return `true` if the app is ready to recieve requests.
    pub fn is_health_ready(&self) -> bool {
        self.health_ready.load(Ordering::Relaxed)
    }

    /// The PubSub Hub.
    pub fn hub(&self) -> &Arc<PubSubHub> {
        &self.hub
    }

    /// The auth gate.
    pub fn auth_gate(&self) -> &Arc<AuthGate> {
        &self.auth_gate
    }

    /// The scope manager, when scopes mode is enabled.
    pub fn scope_manager(&self) -> Option<&Arc<ScopeManager>> {
        self.scope_manager.as_ref()
    }

    /// Return `true` while this worker runs the tracker.
    pub fn is_leader(&self) -> bool {
        self.tracker.is_leader()
    }

    /// Produce a bundle for the subscribed directories.
    ///
    /// `base` requests a delta; an unavailable base degrades to a complete
    /// bundle. `scope_id` routes to the scope's source.
    pub async fn policy_bundle(
        &self,
        dirs: &[String],
        base: Option<&str>,
        scope_id: Option<&str>,
    ) -> Result<PolicyBundle, ServerError> {
        let source_view = match scope_id {
            Some(scope_id) => {
                let scope_manager = self.scope_manager.as_ref().ok_or_else(|| {
                    ServerErrorKind::ScopeNotFound
                        .error_with_msg("Scopes mode is not enabled.")
                })?;
                scope_manager.source_view(scope_id)?
            }
            None => Arc::clone(&self.source_view),
        };
        let extensions = self.config.source.extensions();
        let ignore_globs = self.config.source.ignore_globs();
        let dirs = if dirs.is_empty() {
            vec![".".to_string()]
        } else {
            dirs.to_vec()
        };
        let base = base.map(str::to_string);
        let manifest_filename = self.config.source.manifest_filename().to_string();
        tokio::task::spawn_blocking(move || {
            let filter = FileFilter::new(&extensions, &dirs, &ignore_globs)?;
            let revision = source_view.head_revision()?;
            BundleBuilder::build(
                &*source_view,
                &revision,
                base.as_deref(),
                &filter,
                &manifest_filename,
            )
        })
        .await
        .map_err(|e| {
            ServerErrorKind::Unspecified.error_with_msg(format!("Blocking task failed: {e}"))
        })?
    }

    /// Validate a webhook request and trigger a tracker re-check.
    ///
    /// Returns `true` when a re-check was triggered.
    pub fn handle_webhook(
        &self,
        headers: &BTreeMap<String, String>,
        body: &[u8],
    ) -> Result<bool, ServerError> {
        let triggers = self.webhook_validator.validate(headers, body)?;
        if triggers {
            self.tracker.trigger_recheck();
        }
        Ok(triggers)
    }

    /// Mint a peer JWT. Requires the master token.
    pub fn mint_token(
        &self,
        master_token: Option<&str>,
        kind: PeerKind,
    ) -> Result<String, ServerError> {
        self.auth_gate.assert_master_token(master_token)?;
        self.auth_gate.mint(kind)
    }

    /// Validate and fan out a data update.
    pub async fn publish_data_update(
        &self,
        identity: &auth::PeerIdentity,
        update: opal_client::msg::DataUpdate,
        scope_id: Option<&str>,
    ) -> Result<String, ServerError> {
        self.data_router
            .publish_update(identity, update, scope_id)
            .await
    }

    /// The base data configuration served to clients at bootstrap.
    pub fn base_data_config(
        &self,
        scope_id: Option<&str>,
    ) -> Result<DataSourceConfig, ServerError> {
        match scope_id {
            Some(scope_id) => {
                let scope_manager = self.scope_manager.as_ref().ok_or_else(|| {
                    ServerErrorKind::ScopeNotFound
                        .error_with_msg("Scopes mode is not enabled.")
                })?;
                Ok(DataSourceConfig {
                    entries: scope_manager.data_entries(scope_id)?,
                })
            }
            None => Ok(self.data_router.base_sources().clone()),
        }
    }

    /// Invoked on graceful shutdowns to allow for some pre-emptive
    /// clean-up.
    ///
    /// This is not garanteed to run, so no code can rely on this clean-up
    /// to have happened.
    pub async fn exit_hook(&self) {
        self.leader_lock.release();
        self.backbone.close().await;
    }
}
