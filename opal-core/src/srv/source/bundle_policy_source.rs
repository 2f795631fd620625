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

//! Bundle-endpoint-backed policy source.

use super::PolicySourceView;
use super::RevisionChange;
use super::SourceDiff;
use super::TrackedPolicySource;
use crate::srv::ServerError;
use crate::srv::ServerErrorKind;
use flate2::read::GzDecoder;
use sha2::Digest;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

/// Policy source backed by an HTTP/S3 bundle endpoint serving gzipped tar
/// archives.
///
/// Revision detection prefers the endpoint's `ETag`; without one the
/// SHA-256 digest of the archive is the revision. Each new archive is
/// extracted into the staging directory; per-revision file digests are kept
/// in memory so delta bundles can be computed without the upstream.
pub struct BundlePolicySource {
    bundle_url: String,
    staging_path: PathBuf,
    http: reqwest::Client,
    etag: Mutex<Option<String>>,
    current: Mutex<Option<String>>,
    /// Revision to (path to content digest).
    snapshots: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl BundlePolicySource {
    /// Snapshots retained for delta computation.
    const SNAPSHOT_KEEP: usize = 4;

    /// Return a new instance. The first refresh populates the staging
    /// area.
    pub fn new(
        bundle_url: &str,
        staging_path: &Path,
        http: &reqwest::Client,
    ) -> Result<Arc<Self>, ServerError> {
        if bundle_url.is_empty() {
            Err(ServerErrorKind::Configuration
                .error_with_msg("A bundle policy source requires a bundle URL."))?;
        }
        Ok(Arc::new(Self {
            bundle_url: bundle_url.to_owned(),
            staging_path: staging_path.to_owned(),
            http: http.clone(),
            etag: Mutex::new(None),
            current: Mutex::new(None),
            snapshots: Mutex::new(HashMap::new()),
        }))
    }

    /// Extract a gzipped tar archive into the staging directory, replacing
    /// previous content. Blocking.
    fn extract_archive(archive: &[u8], staging_path: &Path) -> Result<(), ServerError> {
        if staging_path.exists() {
            std::fs::remove_dir_all(staging_path).map_err(|e| {
                ServerErrorKind::SourceFailure.error_with_msg(format!(
                    "Failed to clear staging area '{}': {e}",
                    staging_path.display()
                ))
            })?;
        }
        std::fs::create_dir_all(staging_path).map_err(|e| {
            ServerErrorKind::SourceFailure.error_with_msg(format!(
                "Failed to create staging area '{}': {e}",
                staging_path.display()
            ))
        })?;
        let mut archive = tar::Archive::new(GzDecoder::new(archive));
        archive.unpack(staging_path).map_err(|e| {
            ServerErrorKind::SourceFailure
                .error_with_msg(format!("Failed to extract bundle archive: {e}"))
        })
    }

    /// Walk the staging directory: relative path to content digest.
    /// Blocking.
    fn snapshot_dir(staging_path: &Path) -> Result<BTreeMap<String, String>, ServerError> {
        let mut snapshot = BTreeMap::new();
        let mut pending = vec![staging_path.to_owned()];
        while let Some(dir) = pending.pop() {
            let entries = std::fs::read_dir(&dir).map_err(|e| {
                ServerErrorKind::SourceFailure
                    .error_with_msg(format!("Failed to read '{}': {e}", dir.display()))
            })?;
            for entry in entries {
                let entry = entry.map_err(|e| {
                    ServerErrorKind::SourceFailure.error_with_msg(e.to_string())
                })?;
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(staging_path) {
                    let content = std::fs::read(&path).map_err(|e| {
                        ServerErrorKind::SourceFailure
                            .error_with_msg(format!("Failed to read '{}': {e}", path.display()))
                    })?;
                    snapshot.insert(
                        relative.to_string_lossy().to_string(),
                        hex::encode(Sha256::digest(&content)),
                    );
                }
            }
        }
        Ok(snapshot)
    }

    /// Paths that differ between two snapshots.
    fn diff_snapshots(
        base: &BTreeMap<String, String>,
        new: &BTreeMap<String, String>,
    ) -> SourceDiff {
        let mut diff = SourceDiff::default();
        for (path, digest) in new {
            if base.get(path) != Some(digest) {
                diff.changed.push(path.clone());
            }
        }
        for path in base.keys() {
            if !new.contains_key(path) {
                diff.removed.push(path.clone());
            }
        }
        diff
    }
}

impl PolicySourceView for BundlePolicySource {
    fn head_revision(&self) -> Result<String, ServerError> {
        self.current.lock().unwrap().clone().ok_or_else(|| {
            ServerErrorKind::SourceFailure
                .error_with_msg("No bundle has been fetched yet.")
        })
    }

    fn list_files(&self, revision: &str) -> Result<Vec<String>, ServerError> {
        self.snapshots
            .lock()
            .unwrap()
            .get(revision)
            .map(|snapshot| snapshot.keys().cloned().collect())
            .ok_or_else(|| {
                ServerErrorKind::SourceFailure
                    .error_with_msg(format!("Revision '{revision}' is not available."))
            })
    }

    fn diff(&self, base: &str, revision: &str) -> Result<SourceDiff, ServerError> {
        let snapshots = self.snapshots.lock().unwrap();
        match (snapshots.get(base), snapshots.get(revision)) {
            (Some(base), Some(new)) => Ok(Self::diff_snapshots(base, new)),
            _ => Err(ServerErrorKind::SourceFailure.error_with_msg(format!(
                "Snapshots for {base}..{revision} are not available."
            ))),
        }
    }

    fn read_file(&self, revision: &str, path: &str) -> Result<Vec<u8>, ServerError> {
        let current = self.current.lock().unwrap().clone();
        if current.as_deref() != Some(revision) {
            Err(ServerErrorKind::SourceFailure.error_with_msg(format!(
                "Only the staged revision can be read, not '{revision}'."
            )))?;
        }
        std::fs::read(self.staging_path.join(path)).map_err(|e| {
            ServerErrorKind::SourceFailure
                .error_with_msg(format!("Failed to read '{path}': {e}"))
        })
    }
}

#[async_trait::async_trait]
impl TrackedPolicySource for BundlePolicySource {
    async fn refresh(&self) -> Result<Option<RevisionChange>, ServerError> {
        let mut request = self.http.get(&self.bundle_url);
        if let Some(etag) = self.etag.lock().unwrap().clone() {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }
        let response = request.send().await.map_err(|e| {
            ServerErrorKind::SourceFailure
                .error_with_msg(format!("Bundle endpoint unreachable: {e}"))
        })?;
        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(None);
        }
        if !response.status().is_success() {
            Err(ServerErrorKind::SourceFailure.error_with_msg(format!(
                "Bundle endpoint returned status {}.",
                response.status()
            )))?;
        }
        let new_etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let archive = response.bytes().await.map_err(|e| {
            ServerErrorKind::SourceFailure
                .error_with_msg(format!("Failed to download bundle: {e}"))
        })?;
        let revision = new_etag
            .clone()
            .unwrap_or_else(|| hex::encode(Sha256::digest(&archive)));
        let old_revision = self.current.lock().unwrap().clone();
        if old_revision.as_deref() == Some(revision.as_str()) {
            return Ok(None);
        }
        let staging_path = self.staging_path.clone();
        let snapshot = tokio::task::spawn_blocking(move || {
            Self::extract_archive(&archive, &staging_path)?;
            Self::snapshot_dir(&staging_path)
        })
        .await
        .map_err(|e| {
            ServerErrorKind::Unspecified.error_with_msg(format!("Blocking task failed: {e}"))
        })??;
        let diff = {
            let mut snapshots = self.snapshots.lock().unwrap();
            let diff = match old_revision.as_ref().and_then(|rev| snapshots.get(rev)) {
                Some(base) => Self::diff_snapshots(base, &snapshot),
                None => SourceDiff {
                    changed: snapshot.keys().cloned().collect(),
                    removed: vec![],
                },
            };
            snapshots.insert(revision.clone(), snapshot);
            if snapshots.len() > Self::SNAPSHOT_KEEP {
                // Keep the map bounded; dropped revisions degrade delta
                // requests to complete bundles.
                let oldest = snapshots
                    .keys()
                    .find(|key| {
                        Some(key.as_str()) != old_revision.as_deref()
                            && key.as_str() != revision
                    })
                    .cloned();
                if let Some(oldest) = oldest {
                    snapshots.remove(&oldest);
                }
            }
            diff
        };
        *self.etag.lock().unwrap() = new_etag;
        *self.current.lock().unwrap() = Some(revision.clone());
        log::info!(
            "Bundle endpoint moved {} -> '{revision}' ({} changed, {} removed).",
            old_revision.as_deref().unwrap_or("(none)"),
            diff.changed.len(),
            diff.removed.len()
        );
        Ok(Some(RevisionChange {
            revision,
            old_revision,
            diff,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    /// Build a small gzipped tar archive in memory.
    fn archive(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn extract_and_snapshot() {
        let staging = tempfile::tempdir().unwrap();
        let bytes = archive(&[("rbac.rego", "package app.rbac\n"), ("static/data.json", "{}")]);
        BundlePolicySource::extract_archive(&bytes, staging.path()).unwrap();
        let snapshot = BundlePolicySource::snapshot_dir(staging.path()).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains_key("rbac.rego"));
        assert!(snapshot.contains_key("static/data.json"));
    }

    #[test]
    fn snapshot_diff_detects_changes() {
        let base = BTreeMap::from([
            ("a.rego".to_string(), "d1".to_string()),
            ("b.rego".to_string(), "d2".to_string()),
        ]);
        let new = BTreeMap::from([
            ("a.rego".to_string(), "d1".to_string()),
            ("b.rego".to_string(), "d2-changed".to_string()),
            ("c.rego".to_string(), "d3".to_string()),
        ]);
        let diff = BundlePolicySource::diff_snapshots(&base, &new);
        assert_eq!(diff.changed, vec!["b.rego", "c.rego"]);
        assert!(diff.removed.is_empty());
        let reverse = BundlePolicySource::diff_snapshots(&new, &base);
        assert_eq!(reverse.removed, vec!["c.rego"]);
    }
}
