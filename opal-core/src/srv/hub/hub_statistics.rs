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

//! Aggregate client/worker statistics across server replicas.

use crossbeam_skiplist::SkipMap;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// Reserved topic: a worker gained a client.
pub const STATS_ADD_TOPIC: &str = "__opal_stats_add";
/// Reserved topic: a worker lost a client.
pub const STATS_REMOVE_TOPIC: &str = "__opal_stats_rm";
/// Reserved topic: a starting worker asks peers for their subscriber table.
pub const STATS_WAKEUP_TOPIC: &str = "__opal_stats_wakeup";
/// Reserved topic: a worker's full subscriber table, sent in response to a
/// wakeup.
pub const STATS_STATE_SYNC_TOPIC: &str = "__opal_stats_state_sync";
/// Reserved topic: periodic worker liveness beacon.
pub const STATS_SERVER_KEEPALIVE_TOPIC: &str = "__opal_stats_server_keepalive";

/// One connected client as tracked by statistics.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ClientStat {
    /// Assigned client identifier.
    pub client_id: String,
    /// Subscribed topics at registration time.
    pub topics: Vec<String>,
    /// Connect time in epoch microseconds.
    pub connected_at_micros: u64,
    /// Remote peer address.
    pub remote_address: String,
}

/// State of one remote worker.
struct RemoteWorker {
    last_seen_micros: AtomicU64,
    clients: SkipMap<String, ClientStat>,
}

/// Statistics view of this worker and its peers.
///
/// Workers announce client adds/removes on reserved topics and reconstruct
/// the aggregate view after a (re)start through the wakeup/state-sync
/// exchange. Peers without a keepalive for the forget interval are dropped,
/// so statistics do not survive a backbone outage; the hub re-runs the
/// wakeup exchange after a resync instead.
pub struct HubStatistics {
    worker_id: String,
    started_at_micros: u64,
    local_clients: SkipMap<String, ClientStat>,
    remote_workers: SkipMap<String, Arc<RemoteWorker>>,
    forget_after_micros: u64,
}

impl HubStatistics {
    /// Return a new instance.
    pub fn new(worker_id: &str, forget_after_seconds: u64) -> Arc<Self> {
        Arc::new(Self {
            worker_id: worker_id.to_owned(),
            started_at_micros: opal_client::time::get_timestamp_micros(),
            local_clients: SkipMap::default(),
            remote_workers: SkipMap::default(),
            forget_after_micros: forget_after_seconds * 1_000_000,
        })
    }

    /// This worker's identifier.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Record a local client and return the add event payload to publish.
    pub fn local_client_added(&self, client: ClientStat) -> serde_json::Value {
        let payload = serde_json::json!({"worker_id": &self.worker_id, "client": &client});
        self.local_clients.insert(client.client_id.clone(), client);
        payload
    }

    /// Drop a local client and return the remove event payload to publish.
    pub fn local_client_removed(&self, client_id: &str) -> serde_json::Value {
        self.local_clients.remove(client_id);
        serde_json::json!({"worker_id": &self.worker_id, "client_id": client_id})
    }

    /// The payload announcing this worker's full subscriber table.
    pub fn state_sync_payload(&self) -> serde_json::Value {
        let clients: Vec<ClientStat> = self
            .local_clients
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        serde_json::json!({"worker_id": &self.worker_id, "clients": clients})
    }

    /// The payload of a wakeup or keepalive beacon.
    pub fn beacon_payload(&self) -> serde_json::Value {
        serde_json::json!({"worker_id": &self.worker_id})
    }

    /// Get (or create) the entry of a remote worker and stamp it alive.
    fn remote_worker(&self, worker_id: &str) -> Arc<RemoteWorker> {
        let entry = self
            .remote_workers
            .get_or_insert_with(worker_id.to_owned(), || {
                Arc::new(RemoteWorker {
                    last_seen_micros: AtomicU64::new(0),
                    clients: SkipMap::default(),
                })
            });
        let worker = Arc::clone(entry.value());
        worker
            .last_seen_micros
            .store(opal_client::time::get_timestamp_micros(), Ordering::Relaxed);
        worker
    }

    /// Handle a statistics event from a peer worker.
    ///
    /// Return `true` when the peer asked for a state sync reply.
    pub fn handle_remote(&self, topic: &str, data: &serde_json::Value) -> bool {
        let Some(worker_id) = data.get("worker_id").and_then(|v| v.as_str()) else {
            log::debug!("Dropping statistics event without worker_id on '{topic}'.");
            return false;
        };
        if worker_id == self.worker_id {
            return false;
        }
        let worker = self.remote_worker(worker_id);
        match topic {
            STATS_ADD_TOPIC => {
                if let Ok(client) =
                    serde_json::from_value::<ClientStat>(data["client"].clone())
                {
                    worker.clients.insert(client.client_id.clone(), client);
                }
                false
            }
            STATS_REMOVE_TOPIC => {
                if let Some(client_id) = data.get("client_id").and_then(|v| v.as_str()) {
                    worker.clients.remove(client_id);
                }
                false
            }
            STATS_STATE_SYNC_TOPIC => {
                if let Some(clients) = data.get("clients").and_then(|v| v.as_array()) {
                    worker.clients.clear();
                    for client in clients {
                        if let Ok(client) =
                            serde_json::from_value::<ClientStat>(client.clone())
                        {
                            worker.clients.insert(client.client_id.clone(), client);
                        }
                    }
                }
                false
            }
            STATS_WAKEUP_TOPIC => true,
            STATS_SERVER_KEEPALIVE_TOPIC => false,
            other => {
                log::debug!("Unhandled statistics topic '{other}'.");
                false
            }
        }
    }

    /// Forget peers without a keepalive for the forget interval.
    pub fn prune_expired(&self) {
        let now = opal_client::time::get_timestamp_micros();
        for entry in self.remote_workers.iter() {
            let last_seen = entry.value().last_seen_micros.load(Ordering::Relaxed);
            if last_seen + self.forget_after_micros < now {
                log::info!("Forgetting silent peer worker '{}'.", entry.key());
                entry.remove();
            }
        }
    }

    /// Drop all peer state (after a backbone resync).
    pub fn reset_remote(&self) {
        self.remote_workers.clear();
    }

    /// Aggregate counts for `GET /stats`.
    pub fn aggregate(&self) -> serde_json::Value {
        let remote_clients: usize = self
            .remote_workers
            .iter()
            .map(|entry| entry.value().clients.len())
            .sum();
        serde_json::json!({
            "workers": 1 + self.remote_workers.len(),
            "clients": self.local_clients.len() + remote_clients,
        })
    }

    /// Detailed view for `GET /statistics`.
    pub fn detailed(&self) -> serde_json::Value {
        let local: Vec<ClientStat> = self
            .local_clients
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let peers: serde_json::Map<String, serde_json::Value> = self
            .remote_workers
            .iter()
            .map(|entry| {
                let clients: Vec<ClientStat> = entry
                    .value()
                    .clients
                    .iter()
                    .map(|client| client.value().clone())
                    .collect();
                (
                    entry.key().clone(),
                    serde_json::json!({"clients": clients}),
                )
            })
            .collect();
        serde_json::json!({
            "worker_id": &self.worker_id,
            "uptime_micros":
                opal_client::time::get_timestamp_micros() - self.started_at_micros,
            "clients": local,
            "peers": peers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: &str) -> ClientStat {
        ClientStat {
            client_id: id.to_string(),
            topics: vec!["policy_data".to_string()],
            connected_at_micros: 1,
            remote_address: "127.0.0.1:1234".to_string(),
        }
    }

    #[test]
    fn aggregate_counts_local_and_remote() {
        let stats = HubStatistics::new("w1", 60);
        stats.local_client_added(client("a"));
        let add = serde_json::json!({"worker_id": "w2", "client": client("b")});
        stats.handle_remote(STATS_ADD_TOPIC, &add);
        let aggregate = stats.aggregate();
        assert_eq!(aggregate["workers"], 2);
        assert_eq!(aggregate["clients"], 2);
    }

    #[test]
    fn wakeup_requests_a_state_sync_reply() {
        let stats = HubStatistics::new("w1", 60);
        let wakeup = serde_json::json!({"worker_id": "w2"});
        assert!(stats.handle_remote(STATS_WAKEUP_TOPIC, &wakeup));
        // Own events are ignored.
        let own = serde_json::json!({"worker_id": "w1"});
        assert!(!stats.handle_remote(STATS_WAKEUP_TOPIC, &own));
    }

    #[test]
    fn state_sync_replaces_the_peer_table() {
        let stats = HubStatistics::new("w1", 60);
        let add = serde_json::json!({"worker_id": "w2", "client": client("old")});
        stats.handle_remote(STATS_ADD_TOPIC, &add);
        let sync = serde_json::json!({"worker_id": "w2", "clients": [client("x"), client("y")]});
        stats.handle_remote(STATS_STATE_SYNC_TOPIC, &sync);
        assert_eq!(stats.aggregate()["clients"], 2);
    }

    #[test]
    fn silent_peers_are_forgotten() {
        let stats = HubStatistics::new("w1", 0);
        let add = serde_json::json!({"worker_id": "w2", "client": client("b")});
        stats.handle_remote(STATS_ADD_TOPIC, &add);
        assert_eq!(stats.aggregate()["workers"], 2);
        std::thread::sleep(std::time::Duration::from_millis(5));
        stats.prune_expired();
        assert_eq!(stats.aggregate()["workers"], 1);
    }
}
