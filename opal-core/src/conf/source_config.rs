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

//! Parsing of configuration for the tracked policy source.

use config::ConfigBuilder;
use config::builder::BuilderState;
use serde::{Deserialize, Serialize};

use super::ServerConfigDefaults;

/// Kind of tracked policy source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceType {
    /// Version controlled repository tracked with git.
    Git,
    /// HTTP/S3 bundle endpoint polled for new archives.
    Bundle,
}

/// Webhook secret validation scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookScheme {
    /// Shared secret presented as a bearer token header.
    Token,
    /// HMAC-SHA256 signature over the request body.
    HmacSha256,
    /// HMAC-SHA512 signature over the request body.
    HmacSha512,
}

/// Configuration for the tracked policy source.
#[derive(Debug, Deserialize, Serialize)]
pub struct SourceConfig {
    /// See [Self::source_type()].
    sourcetype: String,
    /// See [Self::repo_url()].
    repourl: String,
    /// See [Self::branch()].
    branch: String,
    /// See [Self::clone_path()].
    clonepath: String,
    /// See [Self::polling_interval_seconds()].
    pollingintervalseconds: u64,
    /// See [Self::bundle_url()].
    bundleurl: String,
    /// See [Self::webhook_secret()].
    webhooksecret: String,
    /// See [Self::webhook_scheme()].
    webhookscheme: String,
    /// See [Self::webhook_signature_header()].
    webhooksignatureheader: String,
    /// See [Self::webhook_event_header()].
    webhookeventheader: String,
    /// See [Self::webhook_event_regex()].
    webhookeventregex: String,
    /// See [Self::webhook_require_branch()].
    webhookrequirebranch: bool,
    /// See [Self::extensions()].
    extensions: String,
    /// See [Self::ignore_globs()].
    ignoreglobs: String,
    /// See [Self::manifest_filename()].
    manifestfilename: String,
    /// See [Self::leader_lock_path()].
    leaderlockpath: String,
    /// See [Self::leader_ttl_seconds()].
    leaderttlseconds: u64,
}

impl ServerConfigDefaults for SourceConfig {
    /// Provide defaults for this part of the configuration
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> ConfigBuilder<T> {
        config_builder
            .set_default(prefix.to_string() + "." + "sourcetype", "git")
            .unwrap()
            .set_default(prefix.to_string() + "." + "repourl", "")
            .unwrap()
            .set_default(prefix.to_string() + "." + "branch", "main")
            .unwrap()
            .set_default(prefix.to_string() + "." + "clonepath", "./opal_clone")
            .unwrap()
            .set_default(prefix.to_string() + "." + "pollingintervalseconds", "30")
            .unwrap()
            .set_default(prefix.to_string() + "." + "bundleurl", "")
            .unwrap()
            .set_default(prefix.to_string() + "." + "webhooksecret", "")
            .unwrap()
            .set_default(prefix.to_string() + "." + "webhookscheme", "hmac-sha256")
            .unwrap()
            .set_default(
                prefix.to_string() + "." + "webhooksignatureheader",
                "X-Hub-Signature-256",
            )
            .unwrap()
            .set_default(
                prefix.to_string() + "." + "webhookeventheader",
                "X-GitHub-Event",
            )
            .unwrap()
            .set_default(prefix.to_string() + "." + "webhookeventregex", "")
            .unwrap()
            .set_default(prefix.to_string() + "." + "webhookrequirebranch", false)
            .unwrap()
            .set_default(prefix.to_string() + "." + "extensions", ".rego,.json")
            .unwrap()
            .set_default(prefix.to_string() + "." + "ignoreglobs", "")
            .unwrap()
            .set_default(prefix.to_string() + "." + "manifestfilename", ".manifest")
            .unwrap()
            .set_default(
                prefix.to_string() + "." + "leaderlockpath",
                "./opal_server_leader.lock",
            )
            .unwrap()
            .set_default(prefix.to_string() + "." + "leaderttlseconds", "30")
            .unwrap()
    }
}

impl SourceConfig {
    /// Source kind: `git` or `bundle`. Unknown values refuse startup.
    pub fn source_type(&self) -> SourceType {
        match self.sourcetype.trim().to_lowercase().as_str() {
            "git" | "" => SourceType::Git,
            "bundle" => SourceType::Bundle,
            unknown => panic!("Unknown policy source type '{unknown}'."),
        }
    }

    /// URL of the tracked git repository.
    pub fn repo_url(&self) -> &str {
        self.repourl.trim()
    }

    /// Tracked branch. Defaults to `main`.
    pub fn branch(&self) -> &str {
        self.branch.trim()
    }

    /// Local path of the git clone (or bundle staging area). Reused across
    /// restarts.
    pub fn clone_path(&self) -> &str {
        &self.clonepath
    }

    /// Fixed polling interval. 0 disables polling (webhook only).
    pub fn polling_interval_seconds(&self) -> u64 {
        self.pollingintervalseconds
    }

    /// URL of the tracked bundle endpoint (bundle source only).
    pub fn bundle_url(&self) -> &str {
        self.bundleurl.trim()
    }

    /// Shared webhook secret. Empty rejects all webhooks.
    pub fn webhook_secret(&self) -> &str {
        self.webhooksecret.trim()
    }

    /// Webhook validation scheme: `token`, `hmac-sha256` or `hmac-sha512`.
    pub fn webhook_scheme(&self) -> WebhookScheme {
        match self.webhookscheme.trim().to_lowercase().as_str() {
            "token" => WebhookScheme::Token,
            "hmac-sha256" | "" => WebhookScheme::HmacSha256,
            "hmac-sha512" => WebhookScheme::HmacSha512,
            unknown => panic!("Unknown webhook scheme '{unknown}'."),
        }
    }

    /// Header carrying the HMAC signature.
    pub fn webhook_signature_header(&self) -> &str {
        &self.webhooksignatureheader
    }

    /// Header carrying the event type.
    pub fn webhook_event_header(&self) -> &str {
        &self.webhookeventheader
    }

    /// Regex the extracted event type must match. Empty accepts all events.
    pub fn webhook_event_regex(&self) -> &str {
        self.webhookeventregex.trim()
    }

    /// Ignore webhooks that do not name the tracked branch.
    pub fn webhook_require_branch(&self) -> bool {
        self.webhookrequirebranch
    }

    /// File extensions included in bundles. Comma separated or JSON array.
    pub fn extensions(&self) -> Vec<String> {
        opal_client::conf::parse_string_list(&self.extensions)
    }

    /// Glob patterns excluded from bundles.
    pub fn ignore_globs(&self) -> Vec<String> {
        opal_client::conf::parse_string_list(&self.ignoreglobs)
    }

    /// Name of the optional ordering manifest file.
    pub fn manifest_filename(&self) -> &str {
        &self.manifestfilename
    }

    /// Path of the leader election lock file.
    pub fn leader_lock_path(&self) -> &str {
        &self.leaderlockpath
    }

    /// Leader lease duration.
    pub fn leader_ttl_seconds(&self) -> u64 {
        self.leaderttlseconds.max(5)
    }
}
