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

//! Local backup of the policy store data document.

use crate::msg::SaveMethod;
use crate::store::PolicyStore;
use crate::store::StoreOutcome;
use crate::sync::SyncError;
use crate::sync::SyncErrorKind;
use crate::util::SignalAwaiter;
use std::sync::Arc;
use tokio::time::Duration;
use tokio::time::sleep;

/// Exports the full data document to a local file (periodically and on
/// shutdown) and restores it for offline restarts.
pub struct BackupService {
    store: Arc<dyn PolicyStore>,
    backup_file: String,
    interval_micros: u64,
}

impl BackupService {
    /// Return a new instance.
    pub fn new(
        store: &Arc<dyn PolicyStore>,
        backup_file: &str,
        interval_seconds: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            store: Arc::clone(store),
            backup_file: backup_file.to_owned(),
            interval_micros: interval_seconds * 1_000_000,
        })
    }

    /// Start the periodic export task. Runs until shutdown is signaled.
    pub fn start_periodic(self: &Arc<Self>, shutdown: &Arc<SignalAwaiter>) {
        let self_clone = Arc::clone(self);
        let shutdown = Arc::clone(shutdown);
        tokio::spawn(async move {
            while !shutdown.is_signaled() {
                sleep(Duration::from_micros(self_clone.interval_micros)).await;
                if shutdown.is_signaled() {
                    break;
                }
                if let Err(e) = self_clone.export().await {
                    log::debug!("Periodic backup skipped: {e}");
                }
            }
        });
    }

    /// Return `true` if a backup file exists.
    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.backup_file)
            .await
            .unwrap_or(false)
    }

    /// Export the full data document to the backup file.
    ///
    /// The document is written to a temporary sibling first and moved into
    /// place, so a crash never leaves a truncated backup.
    pub async fn export(&self) -> Result<(), SyncError> {
        let document = self.store.get_data("/").await?;
        let serialized = serde_json::to_vec(&document).map_err(|e| {
            SyncErrorKind::Unspecified.error_with_msg(format!("Failed to serialize backup: {e}"))
        })?;
        let tmp_file = format!("{}.tmp", &self.backup_file);
        tokio::fs::write(&tmp_file, &serialized).await.map_err(|e| {
            SyncErrorKind::Unspecified
                .error_with_msg(format!("Failed to write '{tmp_file}': {e}"))
        })?;
        tokio::fs::rename(&tmp_file, &self.backup_file)
            .await
            .map_err(|e| {
                SyncErrorKind::Unspecified.error_with_msg(format!(
                    "Failed to move backup into place at '{}': {e}",
                    &self.backup_file
                ))
            })?;
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Exported policy store backup ({} bytes) to '{}'.",
                serialized.len(),
                &self.backup_file
            );
        }
        Ok(())
    }

    /// Restore the backup file into the policy store.
    pub async fn restore(&self) -> Result<StoreOutcome, SyncError> {
        let serialized = tokio::fs::read(&self.backup_file).await.map_err(|e| {
            SyncErrorKind::Unspecified.error_with_msg(format!(
                "Failed to read backup '{}': {e}",
                &self.backup_file
            ))
        })?;
        let document: serde_json::Value = serde_json::from_slice(&serialized).map_err(|e| {
            SyncErrorKind::Unspecified
                .error_with_msg(format!("Backup '{}' is not JSON: {e}", &self.backup_file))
        })?;
        log::info!("Restoring policy store data from '{}'.", &self.backup_file);
        Ok(self.store.put_data("/", &document, SaveMethod::Put).await)
    }
}
