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

//! Built-in HTTP(S) fetch provider.

use super::FetchError;
use super::FetchErrorKind;
use super::FetchProvider;
use std::sync::Arc;

/// Fetches JSON documents over HTTP(S).
///
/// Config options (all optional):
/// - `method`: HTTP method, default `GET`.
/// - `headers`: map of header name to value.
/// - `token`: bearer token for the `Authorization` header.
/// - `pointer`: RFC 6901 JSON Pointer applied to the decoded response.
pub struct HttpFetchProvider {
    http: reqwest::Client,
}

impl HttpFetchProvider {
    /// Return a new instance sharing the provided HTTP client.
    pub fn new(http: &reqwest::Client) -> Arc<Self> {
        Arc::new(Self { http: http.clone() })
    }
}

#[async_trait::async_trait]
impl FetchProvider for HttpFetchProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    fn config_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "method": { "type": "string", "default": "GET" },
                "headers": { "type": "object", "additionalProperties": { "type": "string" } },
                "token": { "type": "string" },
                "pointer": { "type": "string", "description": "RFC 6901 JSON Pointer" },
            },
        })
    }

    async fn acquire(&self) -> Result<(), FetchError> {
        // The shared reqwest client pools connections; nothing to prepare.
        Ok(())
    }

    async fn fetch(
        &self,
        url: &str,
        config: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, FetchError> {
        let method = config
            .and_then(|config| config.get("method"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let method = reqwest::Method::from_bytes(method.as_bytes()).map_err(|e| {
            FetchErrorKind::Unspecified.error_with_msg(format!("Invalid HTTP method: {e}"))
        })?;
        let mut request = self.http.request(method, url);
        if let Some(headers) = config
            .and_then(|config| config.get("headers"))
            .and_then(serde_json::Value::as_object)
        {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }
        if let Some(token) = config
            .and_then(|config| config.get("token"))
            .and_then(serde_json::Value::as_str)
        {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| {
            FetchErrorKind::SourceFailure.error_with_msg(format!("Request to '{url}' failed: {e}"))
        })?;
        if !response.status().is_success() {
            Err(FetchErrorKind::SourceFailure.error_with_msg(format!(
                "Request to '{url}' returned status {}.",
                response.status()
            )))?;
        }
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|e| {
                FetchErrorKind::SourceFailure
                    .error_with_msg(format!("Reading response from '{url}' failed: {e}"))
            })
    }

    fn process(
        &self,
        raw: Vec<u8>,
        config: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, FetchError> {
        let document: serde_json::Value = serde_json::from_slice(&raw).map_err(|e| {
            FetchErrorKind::ProcessingFailure
                .error_with_msg(format!("Failed to parse fetched payload as JSON: {e:?}"))
        })?;
        if let Some(pointer) = config
            .and_then(|config| config.get("pointer"))
            .and_then(serde_json::Value::as_str)
        {
            // https://docs.rs/serde_json/latest/serde_json/value/enum.Value.html#method.pointer
            document
                .pointer(pointer)
                .cloned()
                .ok_or_else(|| {
                    FetchErrorKind::ProcessingFailure.error_with_msg(format!(
                        "JSON pointer '{pointer}' has no match in the fetched document."
                    ))
                })
        } else {
            Ok(document)
        }
    }

    async fn release(&self) {
        // Connections return to the shared pool on drop.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_decodes_json_and_applies_pointer() {
        let provider = HttpFetchProvider::new(&reqwest::Client::new());
        let raw = br#"{"country": {"code": "SE"}}"#.to_vec();
        let config = serde_json::json!({"pointer": "/country/code"});
        let value = provider.process(raw.clone(), Some(&config)).unwrap();
        assert_eq!(value, "SE");
        let whole = provider.process(raw, None).unwrap();
        assert_eq!(whole["country"]["code"], "SE");
    }

    #[test]
    fn process_rejects_non_json() {
        let provider = HttpFetchProvider::new(&reqwest::Client::new());
        assert!(provider.process(b"not json".to_vec(), None).is_err());
    }
}
