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

//! Parsing of configuration for the server connection and subscriptions.

use config::ConfigBuilder;
use config::builder::BuilderState;
use serde::{Deserialize, Serialize};

use super::ClientConfigDefaults;
use super::parse_string_list;

/// Configuration for the server connection and subscriptions.
#[derive(Debug, Deserialize, Serialize)]
pub struct SyncConfig {
    /// See [Self::server_url()].
    serverurl: String,
    /// See [Self::data_topics()].
    topics: String,
    /// See [Self::policy_dirs()].
    policydirs: String,
    /// See [Self::scope_id()].
    scopeid: String,
    /// See [Self::token()].
    token: String,
    /// See [Self::offline_mode()].
    offlinemode: bool,
    /// See [Self::ping_interval_seconds()].
    pingintervalseconds: u64,
    /// See [Self::max_backoff_seconds()].
    maxbackoffseconds: u64,
}

impl ClientConfigDefaults for SyncConfig {
    /// Provide defaults for this part of the configuration
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> ConfigBuilder<T> {
        config_builder
            .set_default(prefix.to_string() + "." + "serverurl", "http://localhost:7002")
            .unwrap()
            .set_default(prefix.to_string() + "." + "topics", "policy_data")
            .unwrap()
            .set_default(prefix.to_string() + "." + "policydirs", ".")
            .unwrap()
            .set_default(prefix.to_string() + "." + "scopeid", "")
            .unwrap()
            .set_default(prefix.to_string() + "." + "token", "")
            .unwrap()
            .set_default(prefix.to_string() + "." + "offlinemode", false)
            .unwrap()
            .set_default(prefix.to_string() + "." + "pingintervalseconds", "5")
            .unwrap()
            .set_default(prefix.to_string() + "." + "maxbackoffseconds", "60")
            .unwrap()
    }
}

impl SyncConfig {
    /// Base URL of the OPAL server. Defaults to `http://localhost:7002`.
    pub fn server_url(&self) -> &str {
        self.serverurl.trim_end_matches('/')
    }

    /// Data topics to subscribe to. Accepts a comma separated string or a
    /// JSON array. Defaults to `policy_data`.
    pub fn data_topics(&self) -> Vec<String> {
        parse_string_list(&self.topics)
    }

    /// Repository-relative policy directories to subscribe to. Defaults to
    /// the repository root `.`.
    pub fn policy_dirs(&self) -> Vec<String> {
        let dirs = parse_string_list(&self.policydirs);
        if dirs.is_empty() {
            vec![".".to_string()]
        } else {
            dirs
        }
    }

    /// Scope identifier for multi-tenant servers. Empty means unscoped.
    pub fn scope_id(&self) -> Option<&str> {
        let trimmed = self.scopeid.trim();
        if trimmed.is_empty() { None } else { Some(trimmed) }
    }

    /// Inline JWT presented to the server. When empty, the token is loaded
    /// from the file named by the `CLIENT_TOKEN_FILENAME` environment
    /// variable (if any).
    pub fn token(&self) -> Option<&str> {
        let trimmed = self.token.trim();
        if trimmed.is_empty() { None } else { Some(trimmed) }
    }

    /// When enabled and the server is unreachable at startup, restore the
    /// local backup into the policy store and report ready.
    pub fn offline_mode(&self) -> bool {
        self.offlinemode
    }

    /// WebSocket ping interval towards the server.
    pub fn ping_interval_seconds(&self) -> u64 {
        self.pingintervalseconds
    }

    /// Upper bound for the reconnect backoff.
    pub fn max_backoff_seconds(&self) -> u64 {
        self.maxbackoffseconds.max(1)
    }
}
