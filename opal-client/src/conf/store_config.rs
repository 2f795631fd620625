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

//! Parsing of configuration for the policy store connection.

use config::ConfigBuilder;
use config::builder::BuilderState;
use serde::{Deserialize, Serialize};

use super::ClientConfigDefaults;

/// Authentication mode towards the policy store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreAuthMode {
    /// No authentication.
    None,
    /// Static bearer token.
    Bearer,
    /// OAuth2 client-credentials flow with token refresh.
    OAuth2,
}

/// Configuration for the policy store connection.
#[derive(Debug, Deserialize, Serialize)]
pub struct StoreConfig {
    /// See [Self::url()].
    url: String,
    /// See [Self::auth_mode()].
    authmode: String,
    /// See [Self::bearer_token()].
    token: String,
    /// See [Self::oauth_token_url()].
    oauthtokenurl: String,
    /// See [Self::oauth_client_id()].
    oauthclientid: String,
    /// See [Self::oauth_client_secret()].
    oauthclientsecret: String,
    /// See [Self::healthcheck_path()].
    healthcheckpath: String,
    /// See [Self::backup_file()].
    backupfile: String,
    /// See [Self::backup_interval_seconds()].
    backupintervalseconds: u64,
    /// See [Self::expose_secrets()].
    exposesecrets: bool,
    /// See [Self::request_timeout_seconds()].
    requesttimeoutseconds: u64,
}

impl ClientConfigDefaults for StoreConfig {
    /// Provide defaults for this part of the configuration
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> ConfigBuilder<T> {
        config_builder
            .set_default(prefix.to_string() + "." + "url", "http://localhost:8181")
            .unwrap()
            .set_default(prefix.to_string() + "." + "authmode", "none")
            .unwrap()
            .set_default(prefix.to_string() + "." + "token", "")
            .unwrap()
            .set_default(prefix.to_string() + "." + "oauthtokenurl", "")
            .unwrap()
            .set_default(prefix.to_string() + "." + "oauthclientid", "")
            .unwrap()
            .set_default(prefix.to_string() + "." + "oauthclientsecret", "")
            .unwrap()
            .set_default(
                prefix.to_string() + "." + "healthcheckpath",
                "/system/opal/healthcheck",
            )
            .unwrap()
            .set_default(prefix.to_string() + "." + "backupfile", "./opal_backup.json")
            .unwrap()
            .set_default(prefix.to_string() + "." + "backupintervalseconds", "60")
            .unwrap()
            .set_default(prefix.to_string() + "." + "exposesecrets", false)
            .unwrap()
            .set_default(prefix.to_string() + "." + "requesttimeoutseconds", "10")
            .unwrap()
    }
}

impl StoreConfig {
    /// Base URL of the policy engine. Defaults to `http://localhost:8181`.
    pub fn url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// Authentication mode: `none`, `bearer` or `oauth2`. Unknown values
    /// fall back to `none` with a warning.
    pub fn auth_mode(&self) -> StoreAuthMode {
        match self.authmode.trim().to_lowercase().as_str() {
            "none" | "" => StoreAuthMode::None,
            "bearer" => StoreAuthMode::Bearer,
            "oauth2" => StoreAuthMode::OAuth2,
            unknown => {
                log::warn!("Unknown policy store auth mode '{unknown}'. Using 'none'.");
                StoreAuthMode::None
            }
        }
    }

    /// Static bearer token used when [Self::auth_mode()] is `bearer`.
    pub fn bearer_token(&self) -> &str {
        self.token.trim()
    }

    /// OAuth2 token endpoint used when [Self::auth_mode()] is `oauth2`.
    pub fn oauth_token_url(&self) -> &str {
        self.oauthtokenurl.trim()
    }

    /// OAuth2 client identifier.
    pub fn oauth_client_id(&self) -> &str {
        self.oauthclientid.trim()
    }

    /// OAuth2 client secret.
    pub fn oauth_client_secret(&self) -> &str {
        self.oauthclientsecret.trim()
    }

    /// Document path the healthcheck document is written to.
    pub fn healthcheck_path(&self) -> &str {
        &self.healthcheckpath
    }

    /// Path of the local data backup file.
    pub fn backup_file(&self) -> &str {
        &self.backupfile
    }

    /// Interval between periodic backups. Defaults to 60 seconds.
    pub fn backup_interval_seconds(&self) -> u64 {
        self.backupintervalseconds.max(1)
    }

    /// Include secrets in the `/policy-store/config` view.
    pub fn expose_secrets(&self) -> bool {
        self.exposesecrets
    }

    /// Timeout for every policy store request.
    pub fn request_timeout_seconds(&self) -> u64 {
        self.requesttimeoutseconds.max(1)
    }
}
