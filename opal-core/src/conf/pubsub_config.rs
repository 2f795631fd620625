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

//! Parsing of configuration for the PubSub Hub and backbone.

use config::ConfigBuilder;
use config::builder::BuilderState;
use serde::{Deserialize, Serialize};

use super::ServerConfigDefaults;

/// Configuration for the PubSub Hub and backbone.
#[derive(Debug, Deserialize, Serialize)]
pub struct PubSubConfig {
    /// See [Self::backbone_uri()].
    backboneuri: String,
    /// See [Self::keepalive_interval_seconds()].
    keepaliveintervalseconds: u64,
    /// See [Self::rate_limit()].
    ratelimit: String,
    /// See [Self::stats_keepalive_seconds()].
    statskeepaliveseconds: u64,
}

impl ServerConfigDefaults for PubSubConfig {
    /// Provide defaults for this part of the configuration
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> ConfigBuilder<T> {
        config_builder
            .set_default(prefix.to_string() + "." + "backboneuri", "mem://")
            .unwrap()
            .set_default(
                prefix.to_string() + "." + "keepaliveintervalseconds",
                "3600",
            )
            .unwrap()
            .set_default(prefix.to_string() + "." + "ratelimit", "")
            .unwrap()
            .set_default(prefix.to_string() + "." + "statskeepaliveseconds", "20")
            .unwrap()
    }
}

impl PubSubConfig {
    /// Backbone URI. `mem://` is the in-process backbone for single
    /// instance deployments; anything else refuses startup until the
    /// corresponding connector exists.
    pub fn backbone_uri(&self) -> &str {
        let trimmed = self.backboneuri.trim();
        if trimmed.is_empty() { "mem://" } else { trimmed }
    }

    /// Interval between keepalive envelopes surfacing silent backbone
    /// failures. Defaults to 3600 seconds.
    pub fn keepalive_interval_seconds(&self) -> u64 {
        self.keepaliveintervalseconds.max(1)
    }

    /// Per connection rate limit expression, e.g. `100/second` or
    /// `10/minute`. Empty disables rate limiting.
    pub fn rate_limit(&self) -> Option<&str> {
        let trimmed = self.ratelimit.trim();
        if trimmed.is_empty() { None } else { Some(trimmed) }
    }

    /// Interval T for the statistics worker liveness protocol: keepalives
    /// every T/2, workers forgotten after T.
    pub fn stats_keepalive_seconds(&self) -> u64 {
        self.statskeepaliveseconds.max(2)
    }
}
