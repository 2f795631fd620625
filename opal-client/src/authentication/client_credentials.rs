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

//! Client identity token parser and cache.

use crossbeam_skiplist::SkipMap;
use crossbeam_skiplist::map::Entry;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::time::Duration;
use tokio::time::sleep;

/// Client identity token cache used to populate the `Authorization` header
/// towards the OPAL server.
///
/// The token is taken from configuration when set inline. Otherwise it is
/// loaded (and periodically reloaded) from the file named by the
/// `CLIENT_TOKEN_FILENAME` environment variable. Without either, requests go
/// out unauthenticated and the server decides whether to accept them.
pub struct ClientCredentials {
    token_file: Option<String>,
    bearer_token: SkipMap<(), Arc<String>>,
}

impl ClientCredentials {
    const ENV: &str = "CLIENT_TOKEN_FILENAME";

    /// Return a new instance.
    pub async fn new(inline_token: Option<&str>) -> Arc<Self> {
        let token_file = std::env::var(Self::ENV)
            .map_err(|e| log::debug!("Unable to parse environment variable '{}': {e}", Self::ENV))
            .ok()
            .filter(|s| !s.trim().is_empty());
        let bearer_token = SkipMap::default();
        if let Some(inline_token) = inline_token {
            bearer_token.insert((), Arc::new(inline_token.to_string()));
        }
        Arc::new(Self {
            token_file,
            bearer_token,
        })
        .init()
        .await
    }

    /// Start background task for reloading the token file.
    async fn init(self: Arc<Self>) -> Arc<Self> {
        let ret = Arc::clone(&self);
        if self.token_file.is_some() && self.bearer_token.get(&()).is_none() {
            self.reload_token().await;
            tokio::spawn(async move {
                loop {
                    sleep(Duration::from_micros(60_000_000)).await;
                    self.reload_token().await;
                }
            });
        }
        ret
    }

    /// Return the `Bearer {token}` value used to populate the HTTP
    /// `Authorization` header, if a token is available.
    pub fn current_as_header_value(&self) -> Option<String> {
        self.bearer_token
            .get(&())
            .as_ref()
            .map(Entry::value)
            .map(Arc::clone)
            .map(|bearer_token| format!("Bearer {bearer_token}"))
    }

    /// Perform background reload of the cached token.
    async fn reload_token(&self) -> bool {
        let Some(token_file) = &self.token_file else {
            return false;
        };
        Self::read_file_text(token_file)
            .await
            .map_err(|e| log::warn!("Unable to load client token from '{token_file}': {e}"))
            .ok()
            .map(|token| {
                let token = token.trim().to_string();
                if self
                    .bearer_token
                    .get(&())
                    .is_none_or(|entry| !entry.value().as_ref().eq(&token))
                {
                    // Don't leak the token itself into the log!
                    log::debug!("Client identity token changed.");
                }
                self.bearer_token.insert((), Arc::new(token));
            })
            .is_some()
    }

    /// Read full content of a file into a String.
    async fn read_file_text(filename: &str) -> Result<String, Box<dyn core::error::Error>> {
        let mut file = File::open(filename).await?;
        let mut contents = vec![];
        file.read_to_end(&mut contents).await?;
        Ok(std::str::from_utf8(&contents)?.to_string())
    }
}
