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

//! Scope definitions as accepted on the REST surface.

use opal_client::msg::DataSourceEntry;
use serde::Deserialize;
use serde::Serialize;
use utoipa::ToSchema;

/// Policy source of one scope.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct ScopeSource {
    /// URL of the tracked git repository.
    pub repo_url: String,
    /// Tracked branch.
    #[serde(default = "ScopeSource::default_branch")]
    pub branch: String,
}

impl ScopeSource {
    fn default_branch() -> String {
        "main".to_string()
    }
}

/// An isolated policy/data namespace selected by id.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct ScopeDefinition {
    /// Scope identifier presented by clients.
    pub scope_id: String,
    /// The scope's policy source.
    pub source: ScopeSource,
    /// Base data directives served to this scope's clients.
    #[serde(default)]
    pub data: Vec<DataSourceEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_defaults_to_main() {
        let definition: ScopeDefinition = serde_json::from_str(
            r#"{"scope_id":"internal","source":{"repo_url":"https://x.invalid/repo.git"}}"#,
        )
        .unwrap();
        assert_eq!(definition.source.branch, "main");
        assert!(definition.data.is_empty());
    }
}
