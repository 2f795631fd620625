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

//! The per-client synchronization engine.

use super::BackupService;
use super::CallbackReporter;
use super::EngineState;
use super::EngineStateHolder;
use super::ServerConnection;
use super::SyncError;
use super::SyncErrorKind;
use super::Transaction;
use super::TransactionKind;
use super::TransactionLog;
use crate::authentication::ClientCredentials;
use crate::conf::ClientConfig;
use crate::fetch::FetchEngine;
use crate::fetch::FetchProviderRegistry;
use crate::fetch::FetchTicket;
use crate::fetch::HttpFetchProvider;
use crate::msg::DataSourceConfig;
use crate::msg::DataSourceEntry;
use crate::msg::DataUpdate;
use crate::msg::HubCommand;
use crate::msg::HubRequest;
use crate::msg::PolicyBundle;
use crate::msg::PolicyRevisionEvent;
use crate::msg::WELCOME_TOPIC;
use crate::msg::policy_topic_for_dir;
use crate::store::OpaPolicyStore;
use crate::store::PolicyStore;
use crate::store::StoreOutcome;
use crate::util::ExponentialBackoff;
use crate::util::SignalAwaiter;
use crossbeam_skiplist::SkipMap;
use opal_backbone::FanoutEnvelope;
use opal_backbone::KEEPALIVE_TOPIC;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio::time::sleep;

/** Per-client synchronization engine.

Subscribes to policy and data topics on the OPAL server, requests bundles,
applies updates to the policy store, maintains the transaction log, derives
health and keeps a local backup for offline restarts.
*/
pub struct SyncEngine {
    config: Arc<ClientConfig>,
    state: EngineStateHolder,
    credentials: Arc<ClientCredentials>,
    store: Arc<dyn PolicyStore>,
    transaction_log: Arc<TransactionLog>,
    fetch_engine: Arc<FetchEngine>,
    backup: Arc<BackupService>,
    callback_reporter: Arc<CallbackReporter>,
    http: reqwest::Client,
    last_revision: Mutex<Option<String>>,
    assigned_client_id: SkipMap<(), String>,
    request_counter: AtomicU64,
    shutdown: Arc<SignalAwaiter>,
}

impl SyncEngine {
    /// Return a new instance and start synchronizing.
    pub async fn new(config: &Arc<ClientConfig>) -> Arc<Self> {
        let credentials = ClientCredentials::new(config.sync.token()).await;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        let registry = FetchProviderRegistry::new();
        registry.register(HttpFetchProvider::new(&http));
        let fetch_engine = FetchEngine::new(&config.fetch, &registry);
        let store: Arc<dyn PolicyStore> = OpaPolicyStore::new(&config.store);
        let backup = BackupService::new(
            &store,
            config.store.backup_file(),
            config.store.backup_interval_seconds(),
        );
        let shutdown = SignalAwaiter::new();
        backup.start_periodic(&shutdown);
        log::info!("Sync engine dependencies have been created.");
        Arc::new(Self {
            config: Arc::clone(config),
            state: EngineStateHolder::new(),
            credentials,
            store,
            transaction_log: Arc::new(TransactionLog::new()),
            fetch_engine,
            backup,
            callback_reporter: CallbackReporter::new(&http),
            http,
            last_revision: Mutex::new(None),
            assigned_client_id: SkipMap::default(),
            request_counter: AtomicU64::new(0),
            shutdown,
        })
        .init()
    }

    /// Start the synchronization loop.
    fn init(self: Arc<Self>) -> Arc<Self> {
        let self_clone = Arc::clone(&self);
        tokio::spawn(async move { self_clone.run().await });
        self
    }

    /// Main loop: connect, bootstrap, process events, reconnect with
    /// backoff.
    async fn run(&self) {
        let mut backoff = ExponentialBackoff::new(
            1_000,
            self.config.sync.max_backoff_seconds() * 1_000,
        );
        let mut first_attempt = true;
        while !self.shutdown.is_signaled() {
            self.state.set(EngineState::Connecting);
            let (envelope_tx, mut envelope_rx) = mpsc::unbounded_channel();
            let authorization = self.credentials.current_as_header_value();
            let ws_url = format!("{}/ws", self.config.sync.server_url());
            match ServerConnection::connect(&ws_url, authorization.as_deref(), &envelope_tx).await
            {
                Some(connection) => {
                    backoff.reset();
                    first_attempt = false;
                    self.state.set(EngineState::Bootstrapping);
                    let connection_clone = Arc::clone(&connection);
                    let ping_interval_micros =
                        self.config.sync.ping_interval_seconds() * 1_000_000;
                    tokio::spawn(async move {
                        connection_clone.handle_messages(ping_interval_micros).await;
                    });
                    self.subscribe(&connection).await;
                    match self.bootstrap().await {
                        Ok(()) => {
                            self.state.set(EngineState::Connected);
                            self.process_events(&connection, &mut envelope_rx).await;
                        }
                        Err(e) => {
                            log::warn!("Bootstrap failed: {e}");
                            connection.signal_termination();
                        }
                    }
                    if self.shutdown.is_signaled() {
                        connection.close().await;
                        break;
                    }
                    self.state.set(EngineState::Degraded);
                }
                None => {
                    if first_attempt {
                        first_attempt = false;
                        self.offline_start().await;
                    }
                    self.state.set(EngineState::Degraded);
                }
            }
            let delay = backoff.next_delay();
            if log::log_enabled!(log::Level::Debug) {
                log::debug!("Will retry the server connection in {delay:?}.");
            }
            tokio::select! {
                _ = sleep(delay) => {},
                _ = self.shutdown.wait_for_signal() => {},
            }
        }
        self.state.set(EngineState::Stopped);
    }

    /// Process envelopes until the connection terminates or shutdown.
    async fn process_events(
        &self,
        connection: &Arc<ServerConnection>,
        envelope_rx: &mut mpsc::UnboundedReceiver<FanoutEnvelope>,
    ) {
        loop {
            tokio::select! {
                envelope = envelope_rx.recv() => {
                    match envelope {
                        Some(envelope) => self.handle_envelope(envelope).await,
                        None => break,
                    }
                },
                _ = connection.await_termination() => {
                    break;
                },
                _ = self.shutdown.wait_for_signal() => {
                    break;
                },
            }
        }
    }

    /// Topics this client subscribes to, scope namespace applied.
    fn subscription_topics(&self) -> Vec<String> {
        let mut topics = self.config.sync.data_topics();
        for dir in self.config.sync.policy_dirs() {
            topics.push(policy_topic_for_dir(&dir));
        }
        if let Some(scope_id) = self.config.sync.scope_id() {
            topics = topics
                .into_iter()
                .map(|topic| format!("scope:{scope_id}:{topic}"))
                .collect();
        }
        topics
    }

    /// Strip the scope namespace off an incoming topic.
    fn unscoped_topic<'t>(&self, topic: &'t str) -> &'t str {
        if let Some(scope_id) = self.config.sync.scope_id() {
            let prefix = format!("scope:{scope_id}:");
            if let Some(stripped) = topic.strip_prefix(prefix.as_str()) {
                return stripped;
            }
        }
        topic
    }

    /// Send the subscribe request for all configured topics.
    async fn subscribe(&self, connection: &Arc<ServerConnection>) {
        let topics = self.subscription_topics();
        log::info!("Subscribing to topics: {topics:?}");
        connection
            .send(&HubRequest {
                id: self.request_counter.fetch_add(1, Ordering::Relaxed),
                command: HubCommand::Subscribe { topics },
            })
            .await;
    }

    /// Fetch and apply the bundle and the base data configuration.
    ///
    /// Uses the last known revision as delta base when present (reconnect),
    /// otherwise requests a complete bundle (cold start).
    async fn bootstrap(&self) -> Result<(), SyncError> {
        let base = self.last_revision.lock().unwrap().clone();
        self.fetch_and_apply_bundle(base).await?;
        let data_config = self.fetch_base_data_config().await?;
        if !data_config.entries.is_empty() {
            self.handle_data_update(DataUpdate {
                id: None,
                entries: data_config.entries,
                reason: "bootstrap".to_string(),
                callbacks: vec![],
            })
            .await;
        }
        Ok(())
    }

    /// Restore the local backup when offline mode permits it.
    async fn offline_start(&self) {
        if !self.config.sync.offline_mode() {
            return;
        }
        if !self.backup.exists().await {
            log::warn!("Offline mode is enabled but no backup file exists yet.");
            return;
        }
        match self.backup.restore().await {
            Ok(outcome) if outcome.success => {
                // The snapshot stands in for the bootstrap policy and data
                // writes so that readiness is reported while the server is
                // still unreachable.
                self.record_transaction(
                    TransactionKind::SetPolicies,
                    &outcome,
                    vec!["restored backup".to_string()],
                )
                .await;
                self.record_transaction(
                    TransactionKind::SetPolicyData,
                    &outcome,
                    vec!["restored backup".to_string()],
                )
                .await;
                log::info!("Offline restore complete. Reporting ready without a server.");
            }
            Ok(outcome) => {
                log::warn!(
                    "Offline restore rejected by the policy store (status {}).",
                    outcome.status
                );
            }
            Err(e) => {
                log::warn!("Offline restore failed: {e}");
            }
        }
    }

    /// Fetch a bundle from the server and apply it.
    async fn fetch_and_apply_bundle(&self, base: Option<String>) -> Result<(), SyncError> {
        let bundle = self.fetch_bundle(base.as_deref()).await?;
        self.apply_bundle(&bundle).await
    }

    /// GET `/policy` with the subscribed directories and optional delta
    /// base.
    async fn fetch_bundle(&self, base: Option<&str>) -> Result<PolicyBundle, SyncError> {
        let mut request = self
            .http
            .get(format!("{}/policy", self.config.sync.server_url()));
        for dir in self.config.sync.policy_dirs() {
            request = request.query(&[("path", dir.as_str())]);
        }
        if let Some(base) = base {
            request = request.query(&[("base_hash", base)]);
        }
        if let Some(scope_id) = self.config.sync.scope_id() {
            request = request.query(&[("scope_id", scope_id)]);
        }
        if let Some(authorization) = self.credentials.current_as_header_value() {
            request = request.header(reqwest::header::AUTHORIZATION, authorization);
        }
        let response = request.send().await.map_err(|e| {
            SyncErrorKind::Transport.error_with_msg(format!("Bundle request failed: {e}"))
        })?;
        if !response.status().is_success() {
            Err(SyncErrorKind::Transport.error_with_msg(format!(
                "Bundle request returned status {}.",
                response.status()
            )))?;
        }
        response.json().await.map_err(|e| {
            SyncErrorKind::MalformedMessage.error_with_msg(format!("Malformed bundle: {e}"))
        })
    }

    /// GET `/data/config`: the server-side base data directives.
    async fn fetch_base_data_config(&self) -> Result<DataSourceConfig, SyncError> {
        let mut request = self
            .http
            .get(format!("{}/data/config", self.config.sync.server_url()));
        if let Some(scope_id) = self.config.sync.scope_id() {
            request = request.query(&[("scope_id", scope_id)]);
        }
        if let Some(authorization) = self.credentials.current_as_header_value() {
            request = request.header(reqwest::header::AUTHORIZATION, authorization);
        }
        let response = request.send().await.map_err(|e| {
            SyncErrorKind::Transport.error_with_msg(format!("Data config request failed: {e}"))
        })?;
        if !response.status().is_success() {
            Err(SyncErrorKind::Transport.error_with_msg(format!(
                "Data config request returned status {}.",
                response.status()
            )))?;
        }
        response.json().await.map_err(|e| {
            SyncErrorKind::MalformedMessage.error_with_msg(format!("Malformed data config: {e}"))
        })
    }

    /// Apply a bundle to the policy store.
    ///
    /// All modules and deletions are applied as one unit; the first store
    /// rejection discards the rest, records a failed transaction and keeps
    /// the previous revision, so the same revision is retried on the next
    /// event instead of looping.
    pub async fn apply_bundle(&self, bundle: &PolicyBundle) -> Result<(), SyncError> {
        let previous = self.last_revision.lock().unwrap().clone();
        if previous.as_deref() == Some(bundle.revision.as_str()) {
            log::debug!("Bundle revision '{}' is already applied.", &bundle.revision);
            return Ok(());
        }
        let mut actions = Vec::new();
        let mut failure: Option<String> = None;
        for deleted in bundle.deleted_paths.iter().flatten() {
            let outcome = if Self::is_data_file(deleted) {
                self.store
                    .delete_data(&Self::data_document_path(deleted))
                    .await
            } else {
                self.store.delete_policy(deleted).await
            };
            actions.push(format!("delete {deleted}"));
            if !outcome.success {
                failure = Some(format!(
                    "Deleting '{deleted}' failed with status {}: {}",
                    outcome.status, outcome.body_snippet
                ));
                break;
            }
        }
        let mut data_actions = Vec::new();
        let mut data_outcome: Option<StoreOutcome> = None;
        if failure.is_none() {
            // Manifest order controls application order.
            let modules: BTreeMap<&str, &crate::msg::PolicyModule> = bundle
                .policy_modules
                .iter()
                .map(|module| (module.path.as_str(), module))
                .collect();
            let data_modules: BTreeMap<&str, &crate::msg::DataModule> = bundle
                .data_modules
                .iter()
                .map(|module| (module.path.as_str(), module))
                .collect();
            for path in &bundle.manifest {
                if let Some(module) = modules.get(path.as_str()) {
                    let outcome = self.store.put_policy(&module.path, &module.source).await;
                    actions.push(format!("set {}", &module.path));
                    if !outcome.success {
                        failure = Some(format!(
                            "Policy '{}' rejected with status {}: {}",
                            &module.path, outcome.status, outcome.body_snippet
                        ));
                        break;
                    }
                } else if let Some(module) = data_modules.get(path.as_str()) {
                    let outcome = self
                        .store
                        .put_data(
                            &Self::data_document_path(&module.path),
                            &module.value,
                            crate::msg::SaveMethod::Put,
                        )
                        .await;
                    data_actions.push(format!("set {}", &module.path));
                    let success = outcome.success;
                    if !success {
                        failure = Some(format!(
                            "Data '{}' rejected with status {}: {}",
                            &module.path, outcome.status, outcome.body_snippet
                        ));
                        data_outcome = Some(outcome);
                        break;
                    }
                    data_outcome = Some(outcome);
                }
            }
        }
        let success = failure.is_none();
        self.transaction_log.append(Transaction::new(
            TransactionKind::SetPolicies,
            success,
            failure.clone(),
            actions,
        ));
        self.write_healthcheck().await;
        if let Some(outcome) = data_outcome {
            self.record_transaction(TransactionKind::SetPolicyData, &outcome, data_actions)
                .await;
        }
        if success {
            *self.last_revision.lock().unwrap() = Some(bundle.revision.clone());
            log::info!(
                "Applied bundle for revision '{}' (base: {:?}).",
                &bundle.revision,
                &bundle.base_revision
            );
            Ok(())
        } else {
            Err(SyncErrorKind::StoreFailure
                .error_with_msg(failure.unwrap_or_else(|| "Bundle rejected.".to_string())))
        }
    }

    /// Repository files ending in `.json` are data modules, everything else
    /// is a policy module.
    fn is_data_file(path: &str) -> bool {
        path.ends_with(".json")
    }

    /// Map a repository data file to the store document path of its
    /// directory: `static/data.json` feeds `/static`, a root level
    /// `data.json` feeds `/`.
    fn data_document_path(path: &str) -> String {
        let parent = std::path::Path::new(path)
            .parent()
            .map(|parent| parent.to_string_lossy().to_string())
            .unwrap_or_default();
        if parent.is_empty() {
            "/".to_string()
        } else {
            format!("/{parent}")
        }
    }

    /// Dispatch one received envelope.
    async fn handle_envelope(&self, envelope: FanoutEnvelope) {
        let topic = self.unscoped_topic(&envelope.topic).to_owned();
        if topic == WELCOME_TOPIC {
            if let Some(client_id) = envelope.data.get("client_id").and_then(|v| v.as_str()) {
                log::info!("Server assigned client id '{client_id}'.");
                self.assigned_client_id.insert((), client_id.to_string());
            }
            return;
        }
        if topic == KEEPALIVE_TOPIC {
            if log::log_enabled!(log::Level::Trace) {
                log::trace!("Keepalive received.");
            }
            return;
        }
        if topic.starts_with("policy:") {
            match serde_json::from_value::<PolicyRevisionEvent>(envelope.data) {
                Ok(event) => {
                    let base = self.last_revision.lock().unwrap().clone();
                    if base.as_deref() == Some(event.revision.as_str()) {
                        log::debug!("Revision '{}' is already applied.", &event.revision);
                        return;
                    }
                    if let Err(e) = self.fetch_and_apply_bundle(base).await {
                        log::warn!("Failed to apply revision '{}': {e}", &event.revision);
                    }
                }
                Err(e) => {
                    log::warn!("Dropping malformed policy event on '{topic}': {e}");
                }
            }
            return;
        }
        match serde_json::from_value::<DataUpdate>(envelope.data) {
            Ok(update) => self.handle_data_update(update).await,
            Err(e) => {
                log::warn!("Dropping malformed data update on '{topic}': {e}");
            }
        }
    }

    /// Execute a data update: fetch every entry concurrently, write results
    /// per destination path in submission order, report to callbacks.
    pub async fn handle_data_update(&self, update: DataUpdate) {
        log::info!(
            "Handling data update '{}' ({} entries): {}",
            update.id.as_deref().unwrap_or("-"),
            update.entries.len(),
            &update.reason
        );
        // Submit everything up front; the engine bounds concurrency.
        let mut per_path: Vec<(String, Vec<(DataSourceEntry, Option<FetchTicket>)>)> = Vec::new();
        for entry in &update.entries {
            let ticket = match self.fetch_engine.submit(entry.clone()).await {
                Ok(ticket) => Some(ticket),
                Err(e) => {
                    log::info!("Directive for '{}' not enqueued: {e}", &entry.url);
                    None
                }
            };
            match per_path.iter_mut().find(|(path, _)| path == &entry.dst_path) {
                Some((_, items)) => items.push((entry.clone(), ticket)),
                None => per_path.push((entry.dst_path.clone(), vec![(entry.clone(), ticket)])),
            }
        }
        // Writes are serialized per destination path, unrelated paths
        // proceed independently.
        let results = futures::future::join_all(per_path.into_iter().map(|(path, items)| async move {
            let mut path_success = true;
            let mut path_error = None;
            let mut last_value = serde_json::Value::Null;
            for (entry, ticket) in items {
                let fetched = match ticket {
                    Some(ticket) => ticket.await_result().await,
                    None => Err(crate::fetch::FetchErrorKind::QueueFull.error()),
                };
                match fetched {
                    Ok(value) => {
                        let outcome = self
                            .store
                            .put_data(&entry.dst_path, &value, entry.save_method)
                            .await;
                        self.record_transaction(
                            TransactionKind::SetPolicyData,
                            &outcome,
                            vec![format!("set {}", &entry.dst_path)],
                        )
                        .await;
                        if !outcome.success {
                            path_success = false;
                            path_error = Some(format!(
                                "Write to '{}' failed with status {}.",
                                &entry.dst_path, outcome.status
                            ));
                        }
                        last_value = value;
                    }
                    Err(e) => {
                        let outcome = StoreOutcome::unreachable(&e);
                        self.record_transaction(
                            TransactionKind::SetPolicyData,
                            &outcome,
                            vec![format!("fetch {}", &entry.url)],
                        )
                        .await;
                        path_success = false;
                        path_error = Some(e.to_string());
                    }
                }
            }
            (path, path_success, path_error, last_value)
        }))
        .await;
        if update.callbacks.is_empty() {
            return;
        }
        let success = results.iter().all(|(_, ok, _, _)| *ok);
        let error = results
            .iter()
            .find_map(|(_, _, error, _)| error.clone());
        let mut fetched = serde_json::Map::new();
        for (path, _, _, value) in results {
            fetched.insert(path, value);
        }
        self.callback_reporter
            .report(&update, success, error, &serde_json::Value::Object(fetched))
            .await;
    }

    /// Append a transaction for a store outcome and refresh the healthcheck
    /// document.
    async fn record_transaction(
        &self,
        kind: TransactionKind,
        outcome: &StoreOutcome,
        actions: Vec<String>,
    ) {
        let error = (!outcome.success).then(|| {
            format!(
                "status {}: {}",
                outcome.status,
                outcome.body_snippet.as_str()
            )
        });
        self.transaction_log
            .append(Transaction::new(kind, outcome.success, error, actions));
        self.write_healthcheck().await;
    }

    /// Write the healthcheck document derived from the transaction log.
    async fn write_healthcheck(&self) {
        let doc = self.transaction_log.healthcheck_document();
        let outcome = self.store.put_healthcheck(&doc).await;
        if !outcome.success {
            log::debug!(
                "Healthcheck document write failed with status {}.",
                outcome.status
            );
        }
    }

    /// Return `true` once at least one policy write and one data write
    /// succeeded.
    pub fn is_ready(&self) -> bool {
        self.transaction_log.is_ready()
    }

    /// Return `true` while ready and the most recent policy and data writes
    /// succeeded.
    pub fn is_healthy(&self) -> bool {
        self.transaction_log.is_healthy()
    }

    /// Current engine state.
    pub fn state(&self) -> EngineState {
        self.state.get()
    }

    /// Redacted (or full, per configuration) view of the policy store
    /// connection.
    pub fn policy_store_view(&self) -> serde_json::Value {
        self.store
            .connection_view(self.config.store.expose_secrets())
    }

    /// Invoked on graceful shutdowns: flush a final backup and stop the
    /// background tasks.
    pub async fn exit_hook(&self) {
        self.state.set(EngineState::Stopped);
        self.shutdown.signal();
        if let Err(e) = self.backup.export().await {
            log::info!("Final backup failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_files_map_to_their_directory_document() {
        assert!(SyncEngine::is_data_file("static/data.json"));
        assert!(!SyncEngine::is_data_file("rbac.rego"));
        assert_eq!(SyncEngine::data_document_path("data.json"), "/");
        assert_eq!(SyncEngine::data_document_path("static/data.json"), "/static");
        assert_eq!(
            SyncEngine::data_document_path("app/billing/data.json"),
            "/app/billing"
        );
    }
}
