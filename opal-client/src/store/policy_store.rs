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

//! Policy store abstraction.

use crate::msg::SaveMethod;
use crate::sync::SyncError;

/// Outcome of one policy store operation.
///
/// Transport failures are folded into the outcome (status 0) so that every
/// attempted mutation can be recorded as a transaction.
#[derive(Clone, Debug)]
pub struct StoreOutcome {
    /// Whether the store accepted the operation.
    pub success: bool,
    /// HTTP status code, or 0 when the store was unreachable.
    pub status: u16,
    /// Truncated response body for diagnostics.
    pub body_snippet: String,
}

impl StoreOutcome {
    /// Maximum length of the retained body snippet.
    pub const BODY_SNIPPET_MAX: usize = 256;

    /// Outcome of an operation that never reached the store.
    pub fn unreachable(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            status: 0,
            body_snippet: error.to_string().chars().take(Self::BODY_SNIPPET_MAX).collect(),
        }
    }
}

/// Thin protocol client to the external policy engine.
///
/// The engine is treated as an opaque policy/data store: policy modules by
/// path, JSON data documents by path and a healthcheck document at a
/// configured path.
#[async_trait::async_trait]
pub trait PolicyStore: Send + Sync {
    /// Create or replace the policy module at `path`.
    async fn put_policy(&self, path: &str, source: &str) -> StoreOutcome;

    /// Delete the policy module at `path`.
    async fn delete_policy(&self, path: &str) -> StoreOutcome;

    /// List the policy modules currently known to the engine.
    async fn get_policies(&self) -> Result<serde_json::Value, SyncError>;

    /// Write the data document at `path`.
    async fn put_data(
        &self,
        path: &str,
        value: &serde_json::Value,
        method: SaveMethod,
    ) -> StoreOutcome;

    /// Delete the data document at `path`.
    async fn delete_data(&self, path: &str) -> StoreOutcome;

    /// Read the data document at `path`. `/` reads the full document.
    async fn get_data(&self, path: &str) -> Result<serde_json::Value, SyncError>;

    /// Write the healthcheck document at the configured path.
    async fn put_healthcheck(&self, doc: &serde_json::Value) -> StoreOutcome;

    /// Connection description served at `/policy-store/config`, with
    /// secrets redacted unless `expose_secrets`.
    fn connection_view(&self, expose_secrets: bool) -> serde_json::Value;
}
