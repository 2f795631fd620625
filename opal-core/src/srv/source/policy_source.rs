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

//! Policy source abstraction.

use crate::srv::ServerError;

/// Paths that differ between two revisions.
#[derive(Clone, Debug, Default)]
pub struct SourceDiff {
    /// Added or modified paths.
    pub changed: Vec<String>,
    /// Removed paths.
    pub removed: Vec<String>,
}

/// A detected head movement of the tracked source.
#[derive(Clone, Debug)]
pub struct RevisionChange {
    /// The new revision.
    pub revision: String,
    /// The previous revision, when known.
    pub old_revision: Option<String>,
    /// Paths that changed between the revisions.
    pub diff: SourceDiff,
}

impl RevisionChange {
    /// The `policy:<dir>` topics this change must be announced on: one per
    /// ancestor directory of every touched path, so that clients subscribed
    /// to any enclosing directory receive the event.
    pub fn affected_topics(&self) -> Vec<String> {
        let mut topics = Vec::new();
        for path in self.diff.changed.iter().chain(self.diff.removed.iter()) {
            for topic in Self::topics_for_path(path) {
                if !topics.contains(&topic) {
                    topics.push(topic);
                }
            }
        }
        topics
    }

    /// `policy:.` plus `policy:<ancestor>` for each ancestor directory.
    fn topics_for_path(path: &str) -> Vec<String> {
        let mut topics = vec![opal_client::msg::policy_topic_for_dir(".")];
        let mut prefix = String::new();
        for segment in path.split('/').collect::<Vec<_>>() {
            // The last segment is the file name.
            if prefix.len() + segment.len() + 1 >= path.len() {
                break;
            }
            if prefix.is_empty() {
                prefix = segment.to_string();
            } else {
                prefix = format!("{prefix}/{segment}");
            }
            topics.push(opal_client::msg::policy_topic_for_dir(&prefix));
        }
        topics
    }
}

/// Read access to the files of a policy source at specific revisions.
///
/// The methods may block (git object database, filesystem); callers run
/// them on a blocking worker.
pub trait PolicySourceView: Send + Sync {
    /// The current head revision.
    fn head_revision(&self) -> Result<String, ServerError>;

    /// All file paths at a revision.
    fn list_files(&self, revision: &str) -> Result<Vec<String>, ServerError>;

    /// Paths that differ from `base` to `revision`. Fails when `base` is
    /// not available locally, in which case callers degrade to a complete
    /// bundle.
    fn diff(&self, base: &str, revision: &str) -> Result<SourceDiff, ServerError>;

    /// Raw content of one file at a revision.
    fn read_file(&self, revision: &str, path: &str) -> Result<Vec<u8>, ServerError>;
}

/// A policy source that can be polled for upstream changes.
#[async_trait::async_trait]
pub trait TrackedPolicySource: PolicySourceView {
    /// Check upstream for a new head. Returns the change when the head
    /// moved since the last check.
    async fn refresh(&self) -> Result<Option<RevisionChange>, ServerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affected_topics_cover_all_ancestors() {
        let change = RevisionChange {
            revision: "r1".to_string(),
            old_revision: Some("r0".to_string()),
            diff: SourceDiff {
                changed: vec!["app/billing/rbac.rego".to_string()],
                removed: vec!["utils.rego".to_string()],
            },
        };
        assert_eq!(
            change.affected_topics(),
            vec!["policy:.", "policy:app", "policy:app/billing"]
        );
    }

    #[test]
    fn root_level_files_only_touch_the_root_topic() {
        let change = RevisionChange {
            revision: "r1".to_string(),
            old_revision: None,
            diff: SourceDiff {
                changed: vec!["rbac.rego".to_string()],
                removed: vec![],
            },
        };
        assert_eq!(change.affected_topics(), vec!["policy:."]);
    }
}
