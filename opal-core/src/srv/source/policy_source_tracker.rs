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

//! Watches the policy source for new revisions.

use super::LeaderLock;
use super::RevisionChange;
use super::TrackedPolicySource;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Duration;
use tokio::time::sleep;

/// Watches the tracked policy source and emits [RevisionChange] events.
///
/// Only the current leader polls upstream; followers keep bidding for the
/// lease so the first replica to find it expired restarts tracking from its
/// own last known revision. A webhook trigger forces an immediate re-check.
pub struct PolicySourceTracker {
    source: Arc<dyn TrackedPolicySource>,
    leader_lock: Arc<LeaderLock>,
    polling_interval_micros: u64,
    lease_check_micros: u64,
    trigger: Notify,
    is_leader: AtomicBool,
    last_poll_micros: AtomicU64,
    event_tx: UnboundedSender<RevisionChange>,
}

impl PolicySourceTracker {
    /// Return a new instance and start the tracking loop.
    pub fn new(
        source: &Arc<dyn TrackedPolicySource>,
        leader_lock: &Arc<LeaderLock>,
        polling_interval_seconds: u64,
        leader_ttl_seconds: u64,
        event_tx: UnboundedSender<RevisionChange>,
    ) -> Arc<Self> {
        Arc::new(Self {
            source: Arc::clone(source),
            leader_lock: Arc::clone(leader_lock),
            polling_interval_micros: polling_interval_seconds * 1_000_000,
            lease_check_micros: leader_ttl_seconds * 1_000_000 / 2,
            trigger: Notify::new(),
            is_leader: AtomicBool::new(false),
            last_poll_micros: AtomicU64::new(0),
            event_tx,
        })
        .init()
    }

    /// Start the tracking loop.
    fn init(self: Arc<Self>) -> Arc<Self> {
        let self_clone = Arc::clone(&self);
        tokio::spawn(async move { self_clone.run().await });
        self
    }

    /// Force an immediate re-check (validated webhook).
    pub fn trigger_recheck(&self) {
        self.trigger.notify_one();
    }

    /// Return `true` while this worker holds the leader lease.
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Relaxed)
    }

    /// Main loop: bid for the lease, poll while leading.
    async fn run(&self) {
        loop {
            let leading = self.leader_lock.try_acquire_or_renew();
            let was_leading = self.is_leader.swap(leading, Ordering::Relaxed);
            if leading && !was_leading {
                log::info!("This worker is now the policy source leader.");
            } else if !leading && was_leading {
                log::info!("This worker lost the policy source lease.");
            }
            if leading && self.poll_is_due() {
                self.last_poll_micros.store(
                    opal_client::time::get_timestamp_micros(),
                    Ordering::Relaxed,
                );
                match self.source.refresh().await {
                    Ok(Some(change)) => {
                        if self.event_tx.send(change).is_err() {
                            log::warn!("Revision event consumer is gone. Stopping tracker.");
                            break;
                        }
                    }
                    Ok(None) => {
                        if log::log_enabled!(log::Level::Trace) {
                            log::trace!("Policy source is unchanged.");
                        }
                    }
                    Err(e) => {
                        // The last known revision stays served.
                        log::warn!("Policy source refresh failed: {e}");
                    }
                }
            }
            tokio::select! {
                _ = self.trigger.notified() => {
                    // Force the next poll regardless of the interval.
                    self.last_poll_micros.store(0, Ordering::Relaxed);
                },
                _ = sleep(Duration::from_micros(self.sleep_micros())) => {},
            }
        }
    }

    /// Polling is due when the interval elapsed (interval 0 means webhook
    /// triggers only).
    fn poll_is_due(&self) -> bool {
        let last_poll = self.last_poll_micros.load(Ordering::Relaxed);
        if last_poll == 0 {
            return true;
        }
        if self.polling_interval_micros == 0 {
            return false;
        }
        last_poll + self.polling_interval_micros
            <= opal_client::time::get_timestamp_micros()
    }

    /// Sleep no longer than half the lease so renewal never lapses.
    fn sleep_micros(&self) -> u64 {
        if self.polling_interval_micros == 0 {
            self.lease_check_micros.max(1_000_000)
        } else {
            self.polling_interval_micros
                .min(self.lease_check_micros)
                .max(1_000_000)
        }
    }
}
