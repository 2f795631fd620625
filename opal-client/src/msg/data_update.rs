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

//! Data update directives and callback reports.

use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Topic used for data update entries that do not name any topic.
pub const DEFAULT_DATA_TOPIC: &str = "policy_data";

/// How a fetched document is written into the policy store.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum SaveMethod {
    /// Replace the document at the destination path.
    #[default]
    Put,
    /// Patch the document at the destination path. The payload is forwarded
    /// verbatim; semantics on a missing path are engine-dependent.
    Patch,
}

/// A single data-update instruction: fetch from somewhere, write to a
/// policy store document path.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct DataSourceEntry {
    /// Where to fetch from. The URL scheme selects the fetch provider unless
    /// the config names one explicitly.
    pub url: String,
    /// Opaque per-provider configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    /// Topics this entry is published under. Empty means
    /// [DEFAULT_DATA_TOPIC].
    #[serde(default)]
    pub topics: Vec<String>,
    /// Policy store document path the result is written to.
    pub dst_path: String,
    /// Write method for the destination document.
    #[serde(default)]
    pub save_method: SaveMethod,
    /// Inline payload. When present no fetch is performed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl DataSourceEntry {
    /// Topics of this entry with the default applied.
    pub fn effective_topics(&self) -> Vec<String> {
        if self.topics.is_empty() {
            vec![DEFAULT_DATA_TOPIC.to_string()]
        } else {
            self.topics.clone()
        }
    }
}

/// Where and how a client reports the outcome of applying an update.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct UpdateCallback {
    /// Callback endpoint.
    pub url: String,
    /// HTTP method for the report. Defaults to `POST`.
    #[serde(default = "UpdateCallback::default_method")]
    pub method: String,
    /// Additional headers for the report request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Include the fetched data in the report body.
    #[serde(default)]
    pub include_data: bool,
}

impl UpdateCallback {
    fn default_method() -> String {
        "POST".to_string()
    }
}

/// A group of data-update directives with a reason and optional callbacks.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct DataUpdate {
    /// Server-assigned update identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The directives of this update.
    pub entries: Vec<DataSourceEntry>,
    /// Free-form reason used for logging and reports.
    #[serde(default)]
    pub reason: String,
    /// Callbacks to report the outcome to.
    #[serde(default)]
    pub callbacks: Vec<UpdateCallback>,
}

impl DataUpdate {
    /// All distinct topics named by the update's entries, defaults applied.
    pub fn distinct_topics(&self) -> Vec<String> {
        let mut topics = Vec::new();
        for entry in &self.entries {
            for topic in entry.effective_topics() {
                if !topics.contains(&topic) {
                    topics.push(topic);
                }
            }
        }
        topics
    }
}

/// The server-side base configuration of data sources, fetched by clients at
/// bootstrap.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DataSourceConfig {
    /// Directives every client executes at startup.
    #[serde(default)]
    pub entries: Vec<DataSourceEntry>,
}

/// Report sent to each [UpdateCallback] after an update was applied (or
/// failed).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UpdateReport {
    /// Identifier of the reported update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_id: Option<String>,
    /// Whether every entry was applied successfully.
    pub success: bool,
    /// Failure details, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The fetched documents by destination path, when the callback asked
    /// for data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_defaults() {
        let entry: DataSourceEntry = serde_json::from_str(
            r#"{"url":"https://example.invalid/users","dst_path":"/users"}"#,
        )
        .unwrap();
        assert_eq!(entry.save_method, SaveMethod::Put);
        assert!(entry.topics.is_empty());
        assert_eq!(entry.effective_topics(), vec![DEFAULT_DATA_TOPIC]);
        assert!(entry.data.is_none());
    }

    #[test]
    fn distinct_topics_are_deduplicated_in_order() {
        let update: DataUpdate = serde_json::from_str(
            r#"{
                "entries": [
                    {"url":"u1","dst_path":"/a","topics":["x","y"]},
                    {"url":"u2","dst_path":"/b","topics":["y","z"]},
                    {"url":"u3","dst_path":"/c"}
                ],
                "reason": "test"
            }"#,
        )
        .unwrap();
        assert_eq!(
            update.distinct_topics(),
            vec!["x", "y", "z", DEFAULT_DATA_TOPIC]
        );
    }

    #[test]
    fn save_method_wire_format_is_uppercase() {
        assert_eq!(
            serde_json::to_string(&SaveMethod::Patch).unwrap(),
            "\"PATCH\""
        );
        let method: SaveMethod = serde_json::from_str("\"PUT\"").unwrap();
        assert_eq!(method, SaveMethod::Put);
    }
}
