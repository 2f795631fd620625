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

//! Fetch provider contract and registry.

use super::FetchError;
use super::FetchErrorKind;
use crate::msg::DataSourceEntry;
use crossbeam_skiplist::SkipMap;
use std::sync::Arc;

/// A pluggable source for data-update directives.
///
/// Providers are explicitly registered by name in a
/// [FetchProviderRegistry] and selected per directive by the `fetcher` tag
/// in the directive config, falling back to the URL scheme.
///
/// A provider instance is a scoped resource: [Self::acquire] and
/// [Self::release] are invoked on every fetch, on every exit path, so
/// connection pools and similar are cleaned up deterministically.
#[async_trait::async_trait]
pub trait FetchProvider: Send + Sync {
    /// Registry name of this provider. Also matched against URL schemes.
    fn name(&self) -> &'static str;

    /// Structured description of the per-provider config options.
    fn config_schema(&self) -> serde_json::Value;

    /// Prepare provider resources for one fetch.
    async fn acquire(&self) -> Result<(), FetchError>;

    /// Fetch the raw payload.
    async fn fetch(
        &self,
        url: &str,
        config: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, FetchError>;

    /// Post-process the raw payload into the value written to the store.
    fn process(
        &self,
        raw: Vec<u8>,
        config: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, FetchError>;

    /// Release provider resources after one fetch.
    async fn release(&self);
}

/// Registry of named [FetchProvider]s.
pub struct FetchProviderRegistry {
    providers: SkipMap<String, Arc<dyn FetchProvider>>,
}

impl FetchProviderRegistry {
    /// Return a new, empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            providers: SkipMap::default(),
        })
    }

    /// Register a provider under its name. Replaces a previous provider
    /// with the same name.
    pub fn register(&self, provider: Arc<dyn FetchProvider>) {
        log::debug!("Registered fetch provider '{}'.", provider.name());
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Select the provider for a directive: the `fetcher` tag in the
    /// directive config wins, then the URL scheme. `https` is served by the
    /// `http` provider.
    pub fn select(&self, entry: &DataSourceEntry) -> Result<Arc<dyn FetchProvider>, FetchError> {
        let name = entry
            .config
            .as_ref()
            .and_then(|config| config.get("fetcher"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .or_else(|| Self::scheme_of(&entry.url))
            .ok_or_else(|| {
                FetchErrorKind::NoProvider
                    .error_with_msg(format!("No provider selector for URL '{}'.", entry.url))
            })?;
        let name = if name == "https" { "http".to_string() } else { name };
        self.providers
            .get(&name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                FetchErrorKind::NoProvider
                    .error_with_msg(format!("No fetch provider registered as '{name}'."))
            })
    }

    /// Extract the scheme of a URL.
    fn scheme_of(url: &str) -> Option<String> {
        url.split_once("://").map(|(scheme, _)| scheme.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyProvider {
        name: &'static str,
    }

    #[async_trait::async_trait]
    impl FetchProvider for DummyProvider {
        fn name(&self) -> &'static str {
            self.name
        }
        fn config_schema(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        async fn acquire(&self) -> Result<(), FetchError> {
            Ok(())
        }
        async fn fetch(
            &self,
            _url: &str,
            _config: Option<&serde_json::Value>,
        ) -> Result<Vec<u8>, FetchError> {
            Ok(vec![])
        }
        fn process(
            &self,
            _raw: Vec<u8>,
            _config: Option<&serde_json::Value>,
        ) -> Result<serde_json::Value, FetchError> {
            Ok(serde_json::Value::Null)
        }
        async fn release(&self) {}
    }

    fn entry(url: &str, config: Option<serde_json::Value>) -> DataSourceEntry {
        DataSourceEntry {
            url: url.to_string(),
            config,
            topics: vec![],
            dst_path: "/x".to_string(),
            save_method: Default::default(),
            data: None,
        }
    }

    #[test]
    fn selects_by_scheme_with_https_alias() {
        let registry = FetchProviderRegistry::new();
        registry.register(Arc::new(DummyProvider { name: "http" }));
        assert!(registry.select(&entry("https://x.invalid/a", None)).is_ok());
        assert!(registry.select(&entry("http://x.invalid/a", None)).is_ok());
        assert!(registry.select(&entry("postgresql://db/q", None)).is_err());
    }

    #[test]
    fn explicit_fetcher_tag_wins_over_scheme() {
        let registry = FetchProviderRegistry::new();
        registry.register(Arc::new(DummyProvider { name: "custom" }));
        let with_tag = entry(
            "https://x.invalid/a",
            Some(serde_json::json!({"fetcher": "custom"})),
        );
        assert_eq!(registry.select(&with_tag).unwrap().name(), "custom");
        assert!(registry.select(&entry("https://x.invalid/a", None)).is_err());
    }
}
