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

//! Git-backed policy source.

use super::PolicySourceView;
use super::RevisionChange;
use super::SourceDiff;
use super::TrackedPolicySource;
use crate::srv::ServerError;
use crate::srv::ServerErrorKind;
use git2::Delta;
use git2::ObjectType;
use git2::Repository;
use git2::TreeWalkMode;
use git2::TreeWalkResult;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

/// Policy source backed by a local clone of a tracked git repository.
///
/// The repository handle is opened per operation; `git2::Repository` is not
/// sharable across threads and opening an existing clone is cheap.
pub struct GitPolicySource {
    repo_url: String,
    branch: String,
    local_path: PathBuf,
    last_known: Mutex<Option<String>>,
}

impl GitPolicySource {
    /// Open the local clone, or clone the repository first. Blocking.
    pub fn open_or_clone(
        repo_url: &str,
        branch: &str,
        local_path: &Path,
    ) -> Result<Arc<Self>, ServerError> {
        if repo_url.is_empty() {
            Err(ServerErrorKind::Configuration
                .error_with_msg("A git policy source requires a repository URL."))?;
        }
        if local_path.join(".git").exists() {
            log::info!(
                "Reusing existing clone of '{repo_url}' at '{}'.",
                local_path.display()
            );
        } else {
            log::info!(
                "Cloning '{repo_url}' into '{}'.",
                local_path.display()
            );
            Repository::clone(repo_url, local_path).map_err(|e| {
                ServerErrorKind::SourceFailure
                    .error_with_msg(format!("Failed to clone '{repo_url}': {e}"))
            })?;
        }
        let source = Arc::new(Self {
            repo_url: repo_url.to_owned(),
            branch: branch.to_owned(),
            local_path: local_path.to_owned(),
            last_known: Mutex::new(None),
        });
        let head = source.head_revision()?;
        *source.last_known.lock().unwrap() = Some(head);
        Ok(source)
    }

    /// Open the repository handle.
    fn open(&self) -> Result<Repository, ServerError> {
        Repository::open(&self.local_path).map_err(|e| {
            ServerErrorKind::SourceFailure.error_with_msg(format!(
                "Failed to open clone at '{}': {e}",
                self.local_path.display()
            ))
        })
    }

    /// Commit id of the tracked branch head.
    fn branch_head(&self, repo: &Repository) -> Result<String, ServerError> {
        // Prefer the remote tracking branch, fall back to a local branch of
        // the same name (e.g. a file:// source without remotes configured).
        for refname in [
            format!("origin/{}", &self.branch),
            self.branch.clone(),
        ] {
            if let Ok(object) = repo.revparse_single(&refname) {
                if let Ok(commit) = object.peel_to_commit() {
                    return Ok(commit.id().to_string());
                }
            }
        }
        Err(ServerErrorKind::SourceFailure.error_with_msg(format!(
            "Branch '{}' not found in '{}'.",
            &self.branch, &self.repo_url
        )))
    }

    /// Resolve the tree of a revision.
    fn tree_of<'repo>(
        repo: &'repo Repository,
        revision: &str,
    ) -> Result<git2::Tree<'repo>, ServerError> {
        repo.revparse_single(revision)
            .and_then(|object| object.peel_to_commit())
            .and_then(|commit| commit.tree())
            .map_err(|e| {
                ServerErrorKind::SourceFailure
                    .error_with_msg(format!("Revision '{revision}' is not available: {e}"))
            })
    }

    /// Blocking `git fetch` of the tracked branch.
    fn fetch_branch(&self) -> Result<(), ServerError> {
        let repo = self.open()?;
        match repo.find_remote("origin") {
            Ok(mut remote) => remote
                .fetch(&[self.branch.as_str()], None, None)
                .map_err(|e| {
                    ServerErrorKind::SourceFailure
                        .error_with_msg(format!("Fetch of '{}' failed: {e}", &self.repo_url))
                }),
            Err(_) => {
                // No remote: a plain local repository is tracked as-is.
                Ok(())
            }
        }
    }
}

impl PolicySourceView for GitPolicySource {
    fn head_revision(&self) -> Result<String, ServerError> {
        let repo = self.open()?;
        self.branch_head(&repo)
    }

    fn list_files(&self, revision: &str) -> Result<Vec<String>, ServerError> {
        let repo = self.open()?;
        let tree = Self::tree_of(&repo, revision)?;
        let mut files = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    files.push(format!("{root}{name}"));
                }
            }
            TreeWalkResult::Ok
        })
        .map_err(|e| {
            ServerErrorKind::SourceFailure
                .error_with_msg(format!("Tree walk of '{revision}' failed: {e}"))
        })?;
        Ok(files)
    }

    fn diff(&self, base: &str, revision: &str) -> Result<SourceDiff, ServerError> {
        let repo = self.open()?;
        let base_tree = Self::tree_of(&repo, base)?;
        let new_tree = Self::tree_of(&repo, revision)?;
        let diff = repo
            .diff_tree_to_tree(Some(&base_tree), Some(&new_tree), None)
            .map_err(|e| {
                ServerErrorKind::SourceFailure
                    .error_with_msg(format!("Diff {base}..{revision} failed: {e}"))
            })?;
        let mut source_diff = SourceDiff::default();
        for delta in diff.deltas() {
            match delta.status() {
                Delta::Deleted => {
                    if let Some(path) = delta.old_file().path().and_then(Path::to_str) {
                        source_diff.removed.push(path.to_string());
                    }
                }
                Delta::Added | Delta::Modified | Delta::Renamed | Delta::Copied => {
                    if let Some(path) = delta.new_file().path().and_then(Path::to_str) {
                        source_diff.changed.push(path.to_string());
                    }
                    // A rename also removes the old path.
                    if delta.status() == Delta::Renamed {
                        if let Some(path) = delta.old_file().path().and_then(Path::to_str) {
                            source_diff.removed.push(path.to_string());
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(source_diff)
    }

    fn read_file(&self, revision: &str, path: &str) -> Result<Vec<u8>, ServerError> {
        let repo = self.open()?;
        let tree = Self::tree_of(&repo, revision)?;
        let entry = tree.get_path(Path::new(path)).map_err(|e| {
            ServerErrorKind::SourceFailure
                .error_with_msg(format!("'{path}' not found at '{revision}': {e}"))
        })?;
        let object = entry.to_object(&repo).map_err(|e| {
            ServerErrorKind::SourceFailure
                .error_with_msg(format!("Failed to load '{path}': {e}"))
        })?;
        let blob = object.peel_to_blob().map_err(|e| {
            ServerErrorKind::SourceFailure
                .error_with_msg(format!("'{path}' is not a file: {e}"))
        })?;
        Ok(blob.content().to_vec())
    }
}

#[async_trait::async_trait]
impl TrackedPolicySource for GitPolicySource {
    async fn refresh(&self) -> Result<Option<RevisionChange>, ServerError> {
        let old_head = self.last_known.lock().unwrap().clone();
        // git network and object database work stays off the scheduler.
        let worker = GitPolicySource {
            repo_url: self.repo_url.clone(),
            branch: self.branch.clone(),
            local_path: self.local_path.clone(),
            last_known: Mutex::new(None),
        };
        let change = tokio::task::spawn_blocking(move || {
            worker.fetch_branch()?;
            let new_head = worker.head_revision()?;
            if old_head.as_deref() == Some(new_head.as_str()) {
                return Ok::<_, ServerError>(None);
            }
            let diff = match &old_head {
                Some(old_head) => worker.diff(old_head, &new_head).unwrap_or_else(|e| {
                    log::warn!("Diff against previous head failed: {e}");
                    SourceDiff {
                        changed: worker.list_files(&new_head).unwrap_or_default(),
                        removed: vec![],
                    }
                }),
                None => SourceDiff {
                    changed: worker.list_files(&new_head).unwrap_or_default(),
                    removed: vec![],
                },
            };
            Ok(Some(RevisionChange {
                revision: new_head,
                old_revision: old_head,
                diff,
            }))
        })
        .await
        .map_err(|e| {
            ServerErrorKind::Unspecified.error_with_msg(format!("Blocking task failed: {e}"))
        })??;
        if let Some(change) = &change {
            *self.last_known.lock().unwrap() = Some(change.revision.clone());
            log::info!(
                "Policy source moved {} -> '{}' ({} changed, {} removed).",
                change.old_revision.as_deref().unwrap_or("(none)"),
                &change.revision,
                change.diff.changed.len(),
                change.diff.removed.len()
            );
        }
        Ok(change)
    }
}
