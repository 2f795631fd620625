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

//! Policy store adapter for OPA-style engines.

use super::PolicyStore;
use super::StoreOutcome;
use super::StoreTokenCache;
use crate::conf::StoreAuthMode;
use crate::conf::StoreConfig;
use crate::msg::SaveMethod;
use crate::sync::SyncError;
use crate::sync::SyncErrorKind;
use std::sync::Arc;
use tokio::time::Duration;

/// Policy store adapter speaking the OPA REST contract: policy modules
/// under `/v1/policies`, JSON documents under `/v1/data`.
///
/// Writes are by-path overwrites, so re-applying the same revision is
/// value-equivalent to a no-op.
///
/// `PATCH` payloads are forwarded verbatim; OPA expects a JSON Patch array
/// and answers 404 for a missing path, which is then recorded as a failed
/// transaction.
pub struct OpaPolicyStore {
    http: reqwest::Client,
    base_url: String,
    auth_mode: StoreAuthMode,
    bearer_token: String,
    token_cache: Option<Arc<StoreTokenCache>>,
    healthcheck_path: String,
}

impl OpaPolicyStore {
    /// Return a new instance from the store section of the client
    /// configuration.
    pub fn new(store_config: &StoreConfig) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(store_config.request_timeout_seconds()))
            .build()
            .unwrap_or_default();
        let auth_mode = store_config.auth_mode();
        let token_cache = (auth_mode == StoreAuthMode::OAuth2).then(|| {
            StoreTokenCache::new(
                &http,
                store_config.oauth_token_url(),
                store_config.oauth_client_id(),
                store_config.oauth_client_secret(),
            )
        });
        Arc::new(Self {
            http,
            base_url: store_config.url().to_string(),
            auth_mode,
            bearer_token: store_config.bearer_token().to_string(),
            token_cache,
            healthcheck_path: store_config.healthcheck_path().to_string(),
        })
    }

    /// URL of a policy module resource.
    fn policy_url(&self, path: &str) -> String {
        format!("{}/v1/policies/{}", &self.base_url, path.trim_start_matches('/'))
    }

    /// URL of a data document resource. `/` is the full document.
    fn data_url(&self, path: &str) -> String {
        let trimmed = path.trim_start_matches('/').trim_end_matches('/');
        if trimmed.is_empty() {
            format!("{}/v1/data", &self.base_url)
        } else {
            format!("{}/v1/data/{trimmed}", &self.base_url)
        }
    }

    /// Apply the configured authentication to a request.
    async fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_mode {
            StoreAuthMode::None => request,
            StoreAuthMode::Bearer => request.bearer_auth(&self.bearer_token),
            StoreAuthMode::OAuth2 => {
                if let Some(header_value) = match &self.token_cache {
                    Some(token_cache) => token_cache.current_as_header_value().await,
                    None => None,
                } {
                    request.header(reqwest::header::AUTHORIZATION, header_value)
                } else {
                    log::warn!("No policy store access token available.");
                    request
                }
            }
        }
    }

    /// Run a request and fold response or transport failure into a
    /// [StoreOutcome].
    async fn outcome_of(&self, request: reqwest::RequestBuilder) -> StoreOutcome {
        match self.authorize(request).await.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let success = response.status().is_success();
                let body_snippet = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(StoreOutcome::BODY_SNIPPET_MAX)
                    .collect();
                StoreOutcome {
                    success,
                    status,
                    body_snippet,
                }
            }
            Err(e) => {
                log::debug!("Policy store request failed: {e}");
                StoreOutcome::unreachable(e)
            }
        }
    }

    /// Run a read request and parse the JSON response body.
    async fn json_of(&self, request: reqwest::RequestBuilder) -> Result<serde_json::Value, SyncError> {
        let response = self.authorize(request).await.send().await.map_err(|e| {
            SyncErrorKind::StoreFailure.error_with_msg(format!("Policy store unreachable: {e}"))
        })?;
        if !response.status().is_success() {
            Err(SyncErrorKind::StoreFailure.error_with_msg(format!(
                "Policy store returned status {}.",
                response.status()
            )))?;
        }
        response.json().await.map_err(|e| {
            SyncErrorKind::StoreFailure
                .error_with_msg(format!("Malformed policy store response: {e}"))
        })
    }
}

#[async_trait::async_trait]
impl PolicyStore for OpaPolicyStore {
    async fn put_policy(&self, path: &str, source: &str) -> StoreOutcome {
        self.outcome_of(
            self.http
                .put(self.policy_url(path))
                .header(reqwest::header::CONTENT_TYPE, "text/plain")
                .body(source.to_owned()),
        )
        .await
    }

    async fn delete_policy(&self, path: &str) -> StoreOutcome {
        self.outcome_of(self.http.delete(self.policy_url(path))).await
    }

    async fn get_policies(&self) -> Result<serde_json::Value, SyncError> {
        self.json_of(self.http.get(format!("{}/v1/policies", &self.base_url)))
            .await
    }

    async fn put_data(
        &self,
        path: &str,
        value: &serde_json::Value,
        method: SaveMethod,
    ) -> StoreOutcome {
        let request = match method {
            SaveMethod::Put => self.http.put(self.data_url(path)).json(value),
            SaveMethod::Patch => self
                .http
                .patch(self.data_url(path))
                .header(reqwest::header::CONTENT_TYPE, "application/json-patch+json")
                .json(value),
        };
        self.outcome_of(request).await
    }

    async fn delete_data(&self, path: &str) -> StoreOutcome {
        self.outcome_of(self.http.delete(self.data_url(path))).await
    }

    async fn get_data(&self, path: &str) -> Result<serde_json::Value, SyncError> {
        let document = self.json_of(self.http.get(self.data_url(path))).await?;
        // OPA wraps documents in a result field.
        Ok(document.get("result").cloned().unwrap_or(document))
    }

    async fn put_healthcheck(&self, doc: &serde_json::Value) -> StoreOutcome {
        let healthcheck_path = self.healthcheck_path.clone();
        self.put_data(&healthcheck_path, doc, SaveMethod::Put).await
    }

    fn connection_view(&self, expose_secrets: bool) -> serde_json::Value {
        let token = if expose_secrets {
            self.bearer_token.clone()
        } else if self.bearer_token.is_empty() {
            String::new()
        } else {
            "***".to_string()
        };
        serde_json::json!({
            "url": &self.base_url,
            "auth_mode": format!("{:?}", self.auth_mode).to_lowercase(),
            "token": token,
            "healthcheck_path": &self.healthcheck_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(auth_mode: StoreAuthMode, bearer_token: &str) -> OpaPolicyStore {
        OpaPolicyStore {
            http: reqwest::Client::new(),
            base_url: "http://localhost:8181".to_string(),
            auth_mode,
            bearer_token: bearer_token.to_string(),
            token_cache: None,
            healthcheck_path: "/system/opal/healthcheck".to_string(),
        }
    }

    #[test]
    fn url_building() {
        let store = store(StoreAuthMode::None, "");
        assert_eq!(
            store.policy_url("app/rbac.rego"),
            "http://localhost:8181/v1/policies/app/rbac.rego"
        );
        assert_eq!(
            store.data_url("/users/bob/location"),
            "http://localhost:8181/v1/data/users/bob/location"
        );
        assert_eq!(store.data_url("/"), "http://localhost:8181/v1/data");
        assert_eq!(store.data_url(""), "http://localhost:8181/v1/data");
    }

    #[test]
    fn connection_view_redacts_token() {
        let store = store(StoreAuthMode::Bearer, "secret");
        assert_eq!(store.connection_view(false)["token"], "***");
        assert_eq!(store.connection_view(true)["token"], "secret");
    }
}
