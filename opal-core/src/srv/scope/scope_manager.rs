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

//! Per-scope policy source and subscription state.

use super::ScopeDefinition;
use crate::conf::ScopesConfig;
use crate::srv::PubSubHub;
use crate::srv::ServerError;
use crate::srv::ServerErrorKind;
use crate::srv::hub::PublishOrigin;
use crate::srv::source::GitPolicySource;
use crate::srv::source::PolicySourceView;
use crate::srv::source::TrackedPolicySource;
use crossbeam_skiplist::SkipMap;
use opal_client::msg::DataSourceEntry;
use sha2::Digest;
use sha2::Sha256;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;
use tokio::time::sleep;

/// Running state of one scope.
struct ScopeRuntime {
    definition: ScopeDefinition,
    source: Arc<GitPolicySource>,
}

/// Virtualizes the policy source per scope id.
///
/// Scopes share a small number of local clone shards: the scope id is
/// hashed onto the shard ring and clones live under the shard directory.
/// Shards are never evicted while the process lives.
pub struct ScopeManager {
    hub: Arc<PubSubHub>,
    scopes: SkipMap<String, Arc<ScopeRuntime>>,
    shard_count: usize,
    clone_base_path: PathBuf,
    refresh_interval_micros: u64,
}

impl ScopeManager {
    /// Return a new instance and start the refresh loop.
    pub fn new(scopes_config: &ScopesConfig, hub: &Arc<PubSubHub>) -> Arc<Self> {
        Arc::new(Self {
            hub: Arc::clone(hub),
            scopes: SkipMap::default(),
            shard_count: scopes_config.shard_count(),
            clone_base_path: PathBuf::from(scopes_config.clone_base_path()),
            refresh_interval_micros: scopes_config.refresh_interval_seconds() * 1_000_000,
        })
        .init()
    }

    /// Start the refresh loop.
    fn init(self: Arc<Self>) -> Arc<Self> {
        let self_clone = Arc::clone(&self);
        tokio::spawn(async move { self_clone.refresh_loop().await });
        self
    }

    /// Clone directory of a scope: a shard picked by scope id hash, one
    /// clone per repository within the shard.
    fn clone_dir(&self, scope_id: &str, repo_url: &str) -> PathBuf {
        let scope_digest = Sha256::digest(scope_id.as_bytes());
        let shard = scope_digest[0] as usize % self.shard_count;
        let repo_digest = hex::encode(Sha256::digest(repo_url.as_bytes()));
        self.clone_base_path
            .join(format!("shard_{shard}"))
            .join(&repo_digest[..12])
    }

    /// Create or update a scope.
    pub async fn upsert(&self, definition: ScopeDefinition) -> Result<(), ServerError> {
        if definition.scope_id.trim().is_empty() {
            Err(ServerErrorKind::MalformedIdentifier
                .error_with_msg("A scope requires a non-empty id."))?;
        }
        let clone_dir = self.clone_dir(&definition.scope_id, &definition.source.repo_url);
        let repo_url = definition.source.repo_url.clone();
        let branch = definition.source.branch.clone();
        let source = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(clone_dir.parent().unwrap_or(&clone_dir)).ok();
            GitPolicySource::open_or_clone(&repo_url, &branch, &clone_dir)
        })
        .await
        .map_err(|e| {
            ServerErrorKind::Unspecified.error_with_msg(format!("Blocking task failed: {e}"))
        })??;
        log::info!("Scope '{}' is ready.", &definition.scope_id);
        self.scopes.insert(
            definition.scope_id.clone(),
            Arc::new(ScopeRuntime { definition, source }),
        );
        Ok(())
    }

    /// Delete a scope. Return `false` when it did not exist.
    pub fn delete(&self, scope_id: &str) -> bool {
        self.scopes.remove(scope_id).is_some()
    }

    /// The policy source view of a scope.
    pub fn source_view(
        &self,
        scope_id: &str,
    ) -> Result<Arc<dyn PolicySourceView>, ServerError> {
        self.scopes
            .get(scope_id)
            .map(|entry| Arc::clone(&entry.value().source) as Arc<dyn PolicySourceView>)
            .ok_or_else(|| {
                ServerErrorKind::ScopeNotFound
                    .error_with_msg(format!("No scope '{scope_id}' exists."))
            })
    }

    /// The base data directives of a scope.
    pub fn data_entries(&self, scope_id: &str) -> Result<Vec<DataSourceEntry>, ServerError> {
        self.scopes
            .get(scope_id)
            .map(|entry| entry.value().definition.data.clone())
            .ok_or_else(|| {
                ServerErrorKind::ScopeNotFound
                    .error_with_msg(format!("No scope '{scope_id}' exists."))
            })
    }

    /// All scope definitions.
    pub fn list(&self) -> Vec<ScopeDefinition> {
        self.scopes
            .iter()
            .map(|entry| entry.value().definition.clone())
            .collect()
    }

    /// Poll every scope source and announce revision changes in the
    /// scope's topic namespace.
    async fn refresh_loop(&self) {
        loop {
            sleep(Duration::from_micros(self.refresh_interval_micros)).await;
            for entry in self.scopes.iter() {
                let scope_id = entry.key().clone();
                let runtime = Arc::clone(entry.value());
                match runtime.source.refresh().await {
                    Ok(Some(change)) => {
                        let payload = serde_json::json!({
                            "revision": &change.revision,
                            "old_revision": &change.old_revision,
                        });
                        for topic in change.affected_topics() {
                            self.hub
                                .publish(
                                    &format!("scope:{scope_id}:{topic}"),
                                    payload.clone(),
                                    PublishOrigin::Local,
                                )
                                .await;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        log::warn!("Scope '{scope_id}' refresh failed: {e}");
                    }
                }
            }
        }
    }
}
