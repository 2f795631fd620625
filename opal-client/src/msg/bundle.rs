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

//! Policy bundle wire types.

use serde::Deserialize;
use serde::Serialize;

/// Topic prefix for policy revision events.
const POLICY_TOPIC_PREFIX: &str = "policy:";

/// Return the topic a policy directory subscription maps to.
///
/// Directory paths are normalized so that server and client derive the same
/// topic string for equivalent spellings (`""`, `"."` and `"./"` are the
/// repository root).
pub fn policy_topic_for_dir(dir: &str) -> String {
    let normalized = dir
        .trim()
        .trim_start_matches("./")
        .trim_end_matches('/')
        .trim();
    if normalized.is_empty() || normalized == "." {
        format!("{POLICY_TOPIC_PREFIX}.")
    } else {
        format!("{POLICY_TOPIC_PREFIX}{normalized}")
    }
}

/// A policy module as shipped inside a bundle.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PolicyModule {
    /// Repository-relative path, unique per revision.
    pub path: String,
    /// Package name derived from the module header.
    pub package_name: String,
    /// Verbatim module source text.
    pub source: String,
}

/// A static data document as shipped inside a bundle.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DataModule {
    /// Repository-relative path of the data file.
    pub path: String,
    /// The parsed JSON value.
    pub value: serde_json::Value,
}

/// A snapshot (complete) or diff (delta) of policy and data files for one
/// revision.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PolicyBundle {
    /// Ordered list of paths controlling application order.
    pub manifest: Vec<String>,
    /// Revision this bundle leads to.
    pub revision: String,
    /// Revision this bundle builds on. Absent for a complete bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_revision: Option<String>,
    /// Policy modules added or modified since `base_revision`.
    pub policy_modules: Vec<PolicyModule>,
    /// Data modules added or modified since `base_revision`.
    pub data_modules: Vec<DataModule>,
    /// Paths removed since `base_revision`. Only present in delta bundles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_paths: Option<Vec<String>>,
}

impl PolicyBundle {
    /// Return `true` if this bundle is a complete snapshot.
    pub fn is_complete(&self) -> bool {
        self.base_revision.is_none()
    }
}

/// Payload of a `policy:<dir>` topic envelope.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PolicyRevisionEvent {
    /// The new revision.
    pub revision: String,
    /// The previous revision, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_revision: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_topic_normalization() {
        assert_eq!(policy_topic_for_dir(""), "policy:.");
        assert_eq!(policy_topic_for_dir("."), "policy:.");
        assert_eq!(policy_topic_for_dir("./"), "policy:.");
        assert_eq!(policy_topic_for_dir("rbac/"), "policy:rbac");
        assert_eq!(policy_topic_for_dir("./app/rbac"), "policy:app/rbac");
    }

    #[test]
    fn complete_bundle_has_no_base() {
        let bundle = PolicyBundle {
            manifest: vec!["rbac.rego".to_string()],
            revision: "r1".to_string(),
            base_revision: None,
            policy_modules: vec![],
            data_modules: vec![],
            deleted_paths: None,
        };
        assert!(bundle.is_complete());
        let json = serde_json::to_string(&bundle).unwrap();
        // Optional fields stay off the wire for complete bundles.
        assert!(!json.contains("base_revision"));
        assert!(!json.contains("deleted_paths"));
    }
}
