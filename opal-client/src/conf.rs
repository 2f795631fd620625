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

//! Parsing of client configuration.

mod api_config;
mod fetch_config;
mod store_config;
mod sync_config;

use config::Config;
use config::ConfigBuilder;
use config::Environment;
use config::File;
use config::builder::BuilderState;
use serde::Deserialize;
use serde::Serialize;

pub use self::api_config::ApiConfig;
pub use self::fetch_config::FetchConfig;
pub use self::store_config::StoreAuthMode;
pub use self::store_config::StoreConfig;
pub use self::sync_config::SyncConfig;

/// Package version reported by Cargo at build time.
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Static trait for providing section defaults.
trait ClientConfigDefaults {
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> ConfigBuilder<T>;
}

/// Parse a list-valued option that accepts either a JSON array or a comma
/// separated string.
pub fn parse_string_list(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        serde_json::from_str::<Vec<String>>(trimmed)
            .map_err(|e| {
                log::warn!("Failed to parse list option as JSON array: {e}");
            })
            .unwrap_or_default()
    } else {
        trimmed
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/**
Client configuration root.

The application name defaults to `opal`, but can be overridden with the
environment variable `APP_NAME`.

Configuration will be loaded from

1. the file `{application name}.json` in the current working directory.
2. environment variable overrides in the form
   `{APPLICATION_NAME}_SECTION_CONFIGKEYWITHOUTSPACES`
 */
#[derive(Debug, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Configuration of the exposed health REST API.
    pub api: ApiConfig,
    /// Configuration of the server connection and subscriptions.
    pub sync: SyncConfig,
    /// Configuration of the policy store connection.
    pub store: StoreConfig,
    /// Configuration of the data-fetch engine.
    pub fetch: FetchConfig,

    /// Lower case application name. Ignored when loading configuration.
    #[serde(skip_deserializing)]
    app_name: String,
    /// Time of application startup in epoch microseconds
    #[serde(skip_deserializing)]
    startup_ts_micros: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("opal", 0)
    }
}

impl ClientConfig {
    /// The application name defaults to the provided name, but can be
    /// overridden with the environment variable `APP_NAME`.
    fn read_app_name_lowercase(default_app_name: &str) -> String {
        std::env::var("APP_NAME")
            .map_err(|e| {
                log::debug!(
                    "Environment variable APP_NAME: {e:?} -> Default app name '{default_app_name}' will be used."
                );
            })
            .ok()
            .map(|value| value.to_lowercase())
            .unwrap_or(default_app_name.to_owned())
    }

    /// Lower case application name.
    pub fn app_name_lowercase(&self) -> &str {
        &self.app_name
    }

    /// SemVer application version derived from the Rust package version.
    #[allow(dead_code)]
    pub fn app_version(&self) -> &'static str {
        CARGO_PKG_VERSION
    }

    /// Time of application startup in epoch microseconds
    pub fn startup_ts_micros(&self) -> u64 {
        self.startup_ts_micros
    }

    /** Creates a new instance pre-populated with defaults, an optional
    configurations file and environment variable overrides.

    Server and client share the `opal` prefix; the section names keep the
    option namespaces apart.
    */
    pub fn new(default_app_name: &str, startup_ts_micros: u64) -> Self {
        let app_name = Self::read_app_name_lowercase(default_app_name);
        let config_filename = app_name.to_owned() + ".json";
        let config_env_prefix = &app_name.to_uppercase();
        let mut config_builder = Config::builder();
        config_builder = ApiConfig::set_defaults(config_builder, "api");
        config_builder = SyncConfig::set_defaults(config_builder, "sync");
        config_builder = StoreConfig::set_defaults(config_builder, "store");
        config_builder = FetchConfig::set_defaults(config_builder, "fetch");
        let conf_file = std::env::current_dir().unwrap().join(config_filename);
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Will load '{}' configuration if present.",
                conf_file.display()
            );
        }
        let config = config_builder
            .add_source(File::with_name(conf_file.as_os_str().to_str().unwrap()).required(false))
            .add_source(
                Environment::with_prefix(config_env_prefix)
                    .separator("_")
                    .list_separator(","),
            )
            .build()
            .unwrap();
        let mut client_config: ClientConfig = config.try_deserialize().unwrap();
        client_config.app_name = app_name;
        client_config.startup_ts_micros = startup_ts_micros;
        log::info!("Running with configuration: {client_config:?}");
        client_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_list_accepts_both_forms() {
        assert_eq!(parse_string_list("a, b ,c"), vec!["a", "b", "c"]);
        assert_eq!(parse_string_list(r#"["a","b"]"#), vec!["a", "b"]);
        assert!(parse_string_list("").is_empty());
    }
}
