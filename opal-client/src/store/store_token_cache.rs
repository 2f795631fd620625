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

//! OAuth2 client-credentials token cache for the policy store.

use crossbeam_skiplist::SkipMap;
use crossbeam_skiplist::map::Entry;
use serde::Deserialize;
use std::sync::Arc;

/// Margin subtracted from the reported token lifetime before a refresh is
/// forced.
const REFRESH_MARGIN_MICROS: u64 = 30_000_000;

/// Token endpoint response, RFC 6749 §5.1.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Fetches and refreshes an OAuth2 client-credentials access token for the
/// policy store connection.
pub struct StoreTokenCache {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    /// Cached `(expires_at_micros, token)`.
    access_token: SkipMap<(), (u64, Arc<String>)>,
}

impl StoreTokenCache {
    /// Return a new instance.
    pub fn new(
        http: &reqwest::Client,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Arc<Self> {
        Arc::new(Self {
            http: http.clone(),
            token_url: token_url.to_owned(),
            client_id: client_id.to_owned(),
            client_secret: client_secret.to_owned(),
            access_token: SkipMap::default(),
        })
    }

    /// Return the `Bearer {token}` header value, fetching or refreshing the
    /// access token first when needed.
    pub async fn current_as_header_value(&self) -> Option<String> {
        let now = crate::time::get_timestamp_micros();
        if let Some((expires_at, token)) = self.access_token.get(&()).as_ref().map(Entry::value) {
            if now + REFRESH_MARGIN_MICROS < *expires_at {
                return Some(format!("Bearer {token}"));
            }
        }
        self.refresh().await.map(|token| format!("Bearer {token}"))
    }

    /// Fetch a fresh access token from the token endpoint.
    async fn refresh(&self) -> Option<Arc<String>> {
        let res = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
            ])
            .send()
            .await;
        match res {
            Ok(response) if response.status().is_success() => {
                match response.json::<TokenResponse>().await {
                    Ok(token_response) => {
                        let token = Arc::new(token_response.access_token);
                        let lifetime_micros =
                            token_response.expires_in.unwrap_or(300) * 1_000_000;
                        let expires_at =
                            crate::time::get_timestamp_micros() + lifetime_micros;
                        self.access_token.insert((), (expires_at, Arc::clone(&token)));
                        log::debug!("Refreshed policy store access token.");
                        Some(token)
                    }
                    Err(e) => {
                        log::warn!("Malformed token endpoint response: {e}");
                        None
                    }
                }
            }
            Ok(response) => {
                log::warn!(
                    "Token endpoint '{}' returned status {}.",
                    &self.token_url,
                    response.status()
                );
                None
            }
            Err(e) => {
                log::warn!("Token endpoint '{}' unreachable: {e}", &self.token_url);
                None
            }
        }
    }
}
