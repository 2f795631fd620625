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

//! File filtering for bundle production.

use crate::srv::ServerError;
use crate::srv::ServerErrorKind;
use globset::Glob;
use globset::GlobSet;
use globset::GlobSetBuilder;

/// Selects the repository files that belong into a bundle: extension set,
/// subscribed directory prefixes and ignore globs.
pub struct FileFilter {
    extensions: Vec<String>,
    dirs: Vec<String>,
    ignore: Option<GlobSet>,
}

impl FileFilter {
    /// Return a new instance. An invalid ignore glob refuses the request.
    pub fn new(
        extensions: &[String],
        dirs: &[String],
        ignore_globs: &[String],
    ) -> Result<Self, ServerError> {
        let ignore = if ignore_globs.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for glob in ignore_globs {
                builder.add(Glob::new(glob).map_err(|e| {
                    ServerErrorKind::Configuration
                        .error_with_msg(format!("Invalid ignore glob '{glob}': {e}"))
                })?);
            }
            Some(builder.build().map_err(|e| {
                ServerErrorKind::Configuration
                    .error_with_msg(format!("Invalid ignore globs: {e}"))
            })?)
        };
        Ok(Self {
            extensions: extensions.to_vec(),
            dirs: dirs.iter().map(|dir| Self::normalize_dir(dir)).collect(),
            ignore,
        })
    }

    /// Normalize a directory prefix: `""`, `"."` and `"./"` are the
    /// repository root.
    fn normalize_dir(dir: &str) -> String {
        let normalized = dir
            .trim()
            .trim_start_matches("./")
            .trim_end_matches('/')
            .trim();
        if normalized.is_empty() {
            ".".to_string()
        } else {
            normalized.to_string()
        }
    }

    /// Return `true` when a repository path passes all three rules.
    pub fn matches(&self, path: &str) -> bool {
        if !self.extensions.is_empty()
            && !self
                .extensions
                .iter()
                .any(|extension| path.ends_with(extension.as_str()))
        {
            return false;
        }
        if !self.dirs.is_empty() && !self.dirs.iter().any(|dir| Self::under_dir(path, dir)) {
            return false;
        }
        if let Some(ignore) = &self.ignore {
            if ignore.is_match(path) {
                return false;
            }
        }
        true
    }

    /// Return `true` when a path falls under a normalized directory prefix.
    fn under_dir(path: &str, dir: &str) -> bool {
        dir == "." || path.starts_with(&format!("{dir}/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_and_directory_rules() {
        let filter = FileFilter::new(
            &[".rego".to_string(), ".json".to_string()],
            &["app".to_string()],
            &[],
        )
        .unwrap();
        assert!(filter.matches("app/rbac.rego"));
        assert!(filter.matches("app/static/data.json"));
        assert!(!filter.matches("app/readme.md"));
        assert!(!filter.matches("other/rbac.rego"));
        // A directory name prefix alone is not a match.
        assert!(!filter.matches("application/rbac.rego"));
    }

    #[test]
    fn root_dir_matches_everything() {
        let filter =
            FileFilter::new(&[".rego".to_string()], &[".".to_string()], &[]).unwrap();
        assert!(filter.matches("rbac.rego"));
        assert!(filter.matches("deep/nested/rbac.rego"));
    }

    #[test]
    fn ignore_globs_win() {
        let filter = FileFilter::new(
            &[".rego".to_string()],
            &[".".to_string()],
            &["**/test_*.rego".to_string()],
        )
        .unwrap();
        assert!(filter.matches("rbac.rego"));
        assert!(!filter.matches("app/test_rbac.rego"));
    }

    #[test]
    fn invalid_glob_is_rejected() {
        assert!(
            FileFilter::new(&[], &[], &["[invalid".to_string()]).is_err()
        );
    }
}
