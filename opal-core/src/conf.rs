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

//! Parsing of server configuration.

mod api_config;
mod auth_config;
mod data_config;
mod pubsub_config;
mod scopes_config;
mod source_config;

use config::Config;
use config::ConfigBuilder;
use config::Environment;
use config::File;
use config::builder::BuilderState;
use serde::Deserialize;
use serde::Serialize;

pub use self::api_config::ApiConfig;
pub use self::auth_config::AuthConfig;
pub use self::auth_config::JwtAlgorithm;
pub use self::data_config::DataConfig;
pub use self::pubsub_config::PubSubConfig;
pub use self::scopes_config::ScopesConfig;
pub use self::source_config::SourceConfig;
pub use self::source_config::SourceType;
pub use self::source_config::WebhookScheme;

/// Package version reported by Cargo at build time.
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Static trait for providing section defaults.
trait ServerConfigDefaults {
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> ConfigBuilder<T>;
}

/**
Server configuration root.

The application name defaults to `opal`, but can be overridden with the
environment variable `APP_NAME`.

Configuration will be loaded from

1. the file `{application name}.json` in the current working directory.
2. environment variable overrides in the form
   `{APPLICATION_NAME}_SECTION_CONFIGKEYWITHOUTSPACES`
 */
#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Configuration of the exposed REST API.
    pub api: ApiConfig,
    /// Configuration of the auth gate (master token and JWTs).
    pub auth: AuthConfig,
    /// Configuration of the tracked policy source.
    pub source: SourceConfig,
    /// Configuration of the PubSub Hub and backbone.
    pub pubsub: PubSubConfig,
    /// Configuration of the served base data sources.
    pub data: DataConfig,
    /// Configuration of the multi-tenant scope manager.
    pub scopes: ScopesConfig,

    /// Lower case application name. Ignored when loading configuration.
    #[serde(skip_deserializing)]
    app_name: String,
    /// Time of application startup in epoch microseconds
    #[serde(skip_deserializing)]
    startup_ts_micros: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("opal", 0)
    }
}

impl ServerConfig {
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
    */
    pub fn new(default_app_name: &str, startup_ts_micros: u64) -> Self {
        let app_name = Self::read_app_name_lowercase(default_app_name);
        let config_filename = app_name.to_owned() + ".json";
        let config_env_prefix = &app_name.to_uppercase();
        let mut config_builder = Config::builder();
        config_builder = ApiConfig::set_defaults(config_builder, "api");
        config_builder = AuthConfig::set_defaults(config_builder, "auth");
        config_builder = SourceConfig::set_defaults(config_builder, "source");
        config_builder = PubSubConfig::set_defaults(config_builder, "pubsub");
        config_builder = DataConfig::set_defaults(config_builder, "data");
        config_builder = ScopesConfig::set_defaults(config_builder, "scopes");
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
        let mut server_config: ServerConfig = config.try_deserialize().unwrap();
        server_config.app_name = app_name;
        server_config.startup_ts_micros = startup_ts_micros;
        log::info!("Running with configuration: {server_config:?}");
        server_config
    }
}
