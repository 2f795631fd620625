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

//! Production of complete and delta bundles.

use super::FileFilter;
use crate::srv::ServerError;
use crate::srv::source::PolicySourceView;
use opal_client::msg::DataModule;
use opal_client::msg::PolicyBundle;
use opal_client::msg::PolicyModule;

/// Produces [PolicyBundle]s from a [PolicySourceView].
pub struct BundleBuilder;

impl BundleBuilder {
    /// Build a bundle for `revision`.
    ///
    /// With a `base` the bundle is a delta containing only the files that
    /// differ; when the base revision is not available locally the builder
    /// degrades to a complete bundle.
    pub fn build(
        source: &dyn PolicySourceView,
        revision: &str,
        base: Option<&str>,
        filter: &FileFilter,
        manifest_filename: &str,
    ) -> Result<PolicyBundle, ServerError> {
        let all_files = source.list_files(revision)?;
        let mut base_revision = None;
        let mut deleted_paths = None;
        let included: Vec<String> = match base {
            Some(base) => match source.diff(base, revision) {
                Ok(diff) => {
                    base_revision = Some(base.to_string());
                    let mut removed: Vec<String> = diff
                        .removed
                        .into_iter()
                        .filter(|path| filter.matches(path))
                        .collect();
                    removed.sort();
                    deleted_paths = Some(removed);
                    diff.changed
                        .into_iter()
                        .filter(|path| filter.matches(path))
                        .collect()
                }
                Err(e) => {
                    // Degraded but correct: serve the full snapshot.
                    log::info!(
                        "Base revision '{base}' is not available ({e}). Serving a complete bundle."
                    );
                    all_files
                        .iter()
                        .filter(|path| filter.matches(path))
                        .cloned()
                        .collect()
                }
            },
            None => all_files
                .iter()
                .filter(|path| filter.matches(path))
                .cloned()
                .collect(),
        };
        let manifest_order = Self::read_manifest(source, revision, manifest_filename);
        let ordered = Self::order_files(included, &manifest_order);
        let mut policy_modules = Vec::new();
        let mut data_modules = Vec::new();
        for path in &ordered {
            let raw = source.read_file(revision, path)?;
            if path.ends_with(".json") {
                let value = match serde_json::from_slice(&raw) {
                    Ok(value) => value,
                    Err(e) => {
                        // Shipped anyway; the policy store reports the
                        // rejection when the client applies it.
                        log::warn!("Data file '{path}' is not valid JSON: {e}");
                        serde_json::Value::String(String::from_utf8_lossy(&raw).to_string())
                    }
                };
                data_modules.push(DataModule {
                    path: path.clone(),
                    value,
                });
            } else {
                let source_text = String::from_utf8_lossy(&raw).to_string();
                policy_modules.push(PolicyModule {
                    package_name: Self::derive_package_name(&source_text, path),
                    path: path.clone(),
                    source: source_text,
                });
            }
        }
        Ok(PolicyBundle {
            manifest: ordered,
            revision: revision.to_string(),
            base_revision,
            policy_modules,
            data_modules,
            deleted_paths,
        })
    }

    /// Read the optional ordering manifest at `revision`.
    fn read_manifest(
        source: &dyn PolicySourceView,
        revision: &str,
        manifest_filename: &str,
    ) -> Vec<String> {
        if manifest_filename.is_empty() {
            return vec![];
        }
        match source.read_file(revision, manifest_filename) {
            Ok(raw) => String::from_utf8_lossy(&raw)
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string)
                .collect(),
            Err(_) => vec![],
        }
    }

    /// Manifest-listed files first in manifest order, the rest appended
    /// lexicographically.
    fn order_files(included: Vec<String>, manifest_order: &[String]) -> Vec<String> {
        let mut ordered = Vec::with_capacity(included.len());
        for path in manifest_order {
            if included.contains(path) {
                ordered.push(path.clone());
            }
        }
        let mut rest: Vec<String> = included
            .into_iter()
            .filter(|path| !ordered.contains(path))
            .collect();
        rest.sort();
        ordered.extend(rest);
        ordered
    }

    /// Package name from the module header, falling back to a path-derived
    /// name.
    fn derive_package_name(source_text: &str, path: &str) -> String {
        for line in source_text.lines() {
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix("package ") {
                let name = rest.split_whitespace().next().unwrap_or_default();
                if !name.is_empty() {
                    return name.to_string();
                }
            }
        }
        // Path-derived fallback for modules without a parseable header.
        path.trim_end_matches(".rego").replace('/', ".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::srv::ServerErrorKind;
    use crate::srv::source::SourceDiff;
    use std::collections::BTreeMap;

    /// In-memory source with two revisions.
    struct FakeSource {
        revisions: BTreeMap<String, BTreeMap<String, String>>,
    }

    impl FakeSource {
        fn new() -> Self {
            let r0 = BTreeMap::from([
                (
                    "rbac.rego".to_string(),
                    "package app.rbac\n\ndefault allow := false\n".to_string(),
                ),
                ("static/data.json".to_string(), "{}".to_string()),
                ("readme.md".to_string(), "# docs\n".to_string()),
            ]);
            let mut r1 = r0.clone();
            r1.insert(
                "utils.rego".to_string(),
                "package app.utils\n".to_string(),
            );
            r1.remove("static/data.json");
            Self {
                revisions: BTreeMap::from([("r0".to_string(), r0), ("r1".to_string(), r1)]),
            }
        }

        fn files(&self, revision: &str) -> Result<&BTreeMap<String, String>, ServerError> {
            self.revisions.get(revision).ok_or_else(|| {
                ServerErrorKind::SourceFailure
                    .error_with_msg(format!("Unknown revision '{revision}'."))
            })
        }
    }

    impl PolicySourceView for FakeSource {
        fn head_revision(&self) -> Result<String, ServerError> {
            Ok("r1".to_string())
        }

        fn list_files(&self, revision: &str) -> Result<Vec<String>, ServerError> {
            Ok(self.files(revision)?.keys().cloned().collect())
        }

        fn diff(&self, base: &str, revision: &str) -> Result<SourceDiff, ServerError> {
            let base = self.files(base)?;
            let new = self.files(revision)?;
            let mut diff = SourceDiff::default();
            for (path, content) in new {
                if base.get(path) != Some(content) {
                    diff.changed.push(path.clone());
                }
            }
            for path in base.keys() {
                if !new.contains_key(path) {
                    diff.removed.push(path.clone());
                }
            }
            Ok(diff)
        }

        fn read_file(&self, revision: &str, path: &str) -> Result<Vec<u8>, ServerError> {
            self.files(revision)?
                .get(path)
                .map(|content| content.as_bytes().to_vec())
                .ok_or_else(|| {
                    ServerErrorKind::SourceFailure
                        .error_with_msg(format!("'{path}' not found."))
                })
        }
    }

    fn filter() -> FileFilter {
        FileFilter::new(
            &[".rego".to_string(), ".json".to_string()],
            &[".".to_string()],
            &[],
        )
        .unwrap()
    }

    #[test]
    fn complete_bundle_matches_the_filtered_snapshot() {
        let source = FakeSource::new();
        let bundle =
            BundleBuilder::build(&source, "r0", None, &filter(), ".manifest").unwrap();
        assert!(bundle.is_complete());
        assert_eq!(bundle.manifest, vec!["rbac.rego", "static/data.json"]);
        assert_eq!(bundle.policy_modules.len(), 1);
        assert_eq!(bundle.policy_modules[0].package_name, "app.rbac");
        assert_eq!(bundle.data_modules.len(), 1);
        // The markdown file is filtered out.
        assert!(!bundle.manifest.contains(&"readme.md".to_string()));
    }

    #[test]
    fn delta_bundle_reproduces_the_revision_state() {
        let source = FakeSource::new();
        let delta =
            BundleBuilder::build(&source, "r1", Some("r0"), &filter(), ".manifest").unwrap();
        assert_eq!(delta.base_revision.as_deref(), Some("r0"));
        assert_eq!(delta.manifest, vec!["utils.rego"]);
        assert_eq!(
            delta.deleted_paths.as_deref(),
            Some(["static/data.json".to_string()].as_slice())
        );
        // Applying the delta on top of r0 yields the same file set as the
        // complete r1 bundle.
        let complete =
            BundleBuilder::build(&source, "r1", None, &filter(), ".manifest").unwrap();
        let r0 = BundleBuilder::build(&source, "r0", None, &filter(), ".manifest").unwrap();
        let mut replayed: Vec<String> = r0.manifest.clone();
        replayed.retain(|path| {
            !delta
                .deleted_paths
                .as_deref()
                .unwrap_or_default()
                .contains(path)
        });
        for path in &delta.manifest {
            if !replayed.contains(path) {
                replayed.push(path.clone());
            }
        }
        replayed.sort();
        let mut expected = complete.manifest.clone();
        expected.sort();
        assert_eq!(replayed, expected);
    }

    #[test]
    fn unknown_base_degrades_to_a_complete_bundle() {
        let source = FakeSource::new();
        let bundle =
            BundleBuilder::build(&source, "r1", Some("gone"), &filter(), ".manifest").unwrap();
        assert!(bundle.is_complete());
        assert_eq!(bundle.manifest, vec!["rbac.rego", "utils.rego"]);
    }

    #[test]
    fn manifest_controls_ordering() {
        let mut source = FakeSource::new();
        let r0 = source.revisions.get_mut("r0").unwrap();
        r0.insert(
            ".manifest".to_string(),
            "# apply order\nstatic/data.json\nrbac.rego\n".to_string(),
        );
        let bundle =
            BundleBuilder::build(&source, "r0", None, &filter(), ".manifest").unwrap();
        assert_eq!(bundle.manifest, vec!["static/data.json", "rbac.rego"]);
    }

    #[test]
    fn malformed_policy_is_included_verbatim() {
        let mut source = FakeSource::new();
        let r0 = source.revisions.get_mut("r0").unwrap();
        r0.insert(
            "broken.rego".to_string(),
            "this is not rego at all".to_string(),
        );
        let bundle =
            BundleBuilder::build(&source, "r0", None, &filter(), ".manifest").unwrap();
        let broken = bundle
            .policy_modules
            .iter()
            .find(|module| module.path == "broken.rego")
            .unwrap();
        assert_eq!(broken.source, "this is not rego at all");
        // Fallback name is path-derived.
        assert_eq!(broken.package_name, "broken");
    }
}
