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

//! Parsing of configuration for the multi-tenant scope manager.

use config::ConfigBuilder;
use config::builder::BuilderState;
use serde::{Deserialize, Serialize};

use super::ServerConfigDefaults;

/// Configuration for the multi-tenant scope manager.
#[derive(Debug, Deserialize, Serialize)]
pub struct ScopesConfig {
    /// See [Self::enabled()].
    enabled: bool,
    /// See [Self::shard_count()].
    shardcount: usize,
    /// See [Self::clone_base_path()].
    clonebasepath: String,
    /// See [Self::refresh_interval_seconds()].
    refreshintervalseconds: u64,
}

impl ServerConfigDefaults for ScopesConfig {
    /// Provide defaults for this part of the configuration
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> ConfigBuilder<T> {
        config_builder
            .set_default(prefix.to_string() + "." + "enabled", false)
            .unwrap()
            .set_default(prefix.to_string() + "." + "shardcount", "4")
            .unwrap()
            .set_default(prefix.to_string() + "." + "clonebasepath", "./opal_scopes")
            .unwrap()
            .set_default(prefix.to_string() + "." + "refreshintervalseconds", "30")
            .unwrap()
    }
}

impl ScopesConfig {
    /// Enable the multi-tenant scope surface.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Number of local clone shards shared across scopes. Scope ids are
    /// hashed onto the shard ring; shards are never evicted while the
    /// process lives.
    pub fn shard_count(&self) -> usize {
        self.shardcount.max(1)
    }

    /// Base directory for the shard clones.
    pub fn clone_base_path(&self) -> &str {
        &self.clonebasepath
    }

    /// Interval between scope source refreshes.
    pub fn refresh_interval_seconds(&self) -> u64 {
        self.refreshintervalseconds.max(1)
    }
}
