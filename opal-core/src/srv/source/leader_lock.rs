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

//! File-backed leader election lock.

use std::path::PathBuf;
use std::sync::Arc;

/// Lease file content: `{worker_id} {expires_at_micros}`.
///
/// Only the leader runs the policy source tracker. Whoever finds the lock
/// file absent or its lease expired takes over by writing its own lease and
/// renews it on every re-check. Release deletes the file so a follower can
/// take over without waiting out the lease.
pub struct LeaderLock {
    path: PathBuf,
    worker_id: String,
    ttl_micros: u64,
}

impl LeaderLock {
    /// Return a new instance.
    pub fn new(path: &str, worker_id: &str, ttl_seconds: u64) -> Arc<Self> {
        Arc::new(Self {
            path: PathBuf::from(path),
            worker_id: worker_id.to_owned(),
            ttl_micros: ttl_seconds * 1_000_000,
        })
    }

    /// Acquire the lease if it is free (or own) and renew it. Return `true`
    /// while this worker is the leader.
    pub fn try_acquire_or_renew(&self) -> bool {
        let now = opal_client::time::get_timestamp_micros();
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let mut parts = content.split_whitespace();
                let owner = parts.next().unwrap_or_default();
                let expires_at: u64 = parts
                    .next()
                    .and_then(|raw| raw.parse().ok())
                    .unwrap_or_default();
                if owner != self.worker_id && expires_at > now {
                    return false;
                }
                if owner != self.worker_id {
                    log::info!(
                        "Taking over the expired leader lease from worker '{owner}'."
                    );
                }
            }
            Err(_) => {
                log::info!("Leader lock '{}' is free.", self.path.display());
            }
        }
        self.write_lease(now)
    }

    /// Write (or refresh) the own lease.
    fn write_lease(&self, now: u64) -> bool {
        let lease = format!("{} {}", &self.worker_id, now + self.ttl_micros);
        std::fs::write(&self.path, lease)
            .map_err(|e| {
                log::warn!(
                    "Failed to write leader lock '{}': {e}",
                    self.path.display()
                );
            })
            .is_ok()
    }

    /// Release the lease on graceful shutdown.
    pub fn release(&self) {
        if let Ok(content) = std::fs::read_to_string(&self.path) {
            if content.starts_with(&self.worker_id) {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    log::debug!("Failed to remove leader lock: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_comer_wins_until_lease_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leader.lock");
        let path = path.to_str().unwrap();
        let a = LeaderLock::new(path, "worker-a", 60);
        let b = LeaderLock::new(path, "worker-b", 60);
        assert!(a.try_acquire_or_renew());
        assert!(!b.try_acquire_or_renew());
        // The holder renews its own lease freely.
        assert!(a.try_acquire_or_renew());
    }

    #[test]
    fn expired_lease_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leader.lock");
        let path = path.to_str().unwrap();
        let a = LeaderLock::new(path, "worker-a", 0);
        let b = LeaderLock::new(path, "worker-b", 60);
        assert!(a.try_acquire_or_renew());
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(b.try_acquire_or_renew());
        assert!(!a.try_acquire_or_renew());
    }

    #[test]
    fn release_frees_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leader.lock");
        let path = path.to_str().unwrap();
        let a = LeaderLock::new(path, "worker-a", 60);
        let b = LeaderLock::new(path, "worker-b", 60);
        assert!(a.try_acquire_or_renew());
        a.release();
        assert!(b.try_acquire_or_renew());
    }
}
