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

//! Reporting of applied data updates to callback URLs.

use crate::msg::DataUpdate;
use crate::msg::UpdateReport;
use std::sync::Arc;

/// Posts an [UpdateReport] to every callback URL of an applied update.
///
/// Callback failures are logged and never alter the transaction outcome.
pub struct CallbackReporter {
    http: reqwest::Client,
}

impl CallbackReporter {
    /// Return a new instance sharing the provided HTTP client.
    pub fn new(http: &reqwest::Client) -> Arc<Self> {
        Arc::new(Self { http: http.clone() })
    }

    /// Report the outcome of `update` to each of its callbacks.
    pub async fn report(
        &self,
        update: &DataUpdate,
        success: bool,
        error: Option<String>,
        fetched: &serde_json::Value,
    ) {
        for callback in &update.callbacks {
            let report = UpdateReport {
                update_id: update.id.clone(),
                success,
                error: error.clone(),
                data: callback.include_data.then(|| fetched.clone()),
            };
            let method = reqwest::Method::from_bytes(callback.method.as_bytes())
                .unwrap_or(reqwest::Method::POST);
            let mut request = self.http.request(method, &callback.url).json(&report);
            for (name, value) in &callback.headers {
                request = request.header(name.as_str(), value.as_str());
            }
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    if log::log_enabled!(log::Level::Debug) {
                        log::debug!("Reported update to '{}'.", &callback.url);
                    }
                }
                Ok(response) => {
                    log::info!(
                        "Update callback '{}' returned status {}.",
                        &callback.url,
                        response.status()
                    );
                }
                Err(e) => {
                    log::info!("Update callback '{}' failed: {e}", &callback.url);
                }
            }
        }
    }
}
