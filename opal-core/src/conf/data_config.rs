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

//! Parsing of configuration for the served base data sources.

use config::ConfigBuilder;
use config::builder::BuilderState;
use opal_client::msg::DataSourceConfig;
use serde::{Deserialize, Serialize};

use super::ServerConfigDefaults;

/// Configuration for the served base data sources.
#[derive(Debug, Deserialize, Serialize)]
pub struct DataConfig {
    /// See [Self::sources()].
    sources: String,
}

impl ServerConfigDefaults for DataConfig {
    /// Provide defaults for this part of the configuration
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> ConfigBuilder<T> {
        config_builder
            .set_default(prefix.to_string() + "." + "sources", "{\"entries\":[]}")
            .unwrap()
    }
}

impl DataConfig {
    /// The base data source directives served to clients at bootstrap,
    /// JSON-encoded. A malformed value refuses startup.
    pub fn sources(&self) -> DataSourceConfig {
        serde_json::from_str(&self.sources)
            .unwrap_or_else(|e| panic!("Malformed data sources configuration: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_parse_from_json() {
        let data_config = DataConfig {
            sources: r#"{"entries":[{"url":"https://x.invalid/u","dst_path":"/u"}]}"#.to_string(),
        };
        let sources = data_config.sources();
        assert_eq!(sources.entries.len(), 1);
        assert_eq!(sources.entries[0].dst_path, "/u");
    }

    #[test]
    #[should_panic]
    fn malformed_sources_refuse_startup() {
        let data_config = DataConfig {
            sources: "not json".to_string(),
        };
        let _ = data_config.sources();
    }
}
