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

//! Transaction log over policy store mutations and derived health.

use serde::Deserialize;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Number of transactions retained. Older entries are dropped.
const DEFAULT_CAPACITY: usize = 100;

/// Kind of policy store mutation.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Bundle application (modules and deletions as one unit).
    SetPolicies,
    /// Single policy module write.
    SetPolicy,
    /// Single policy module removal.
    DeletePolicy,
    /// Data document write.
    SetPolicyData,
    /// Data document removal.
    DeletePolicyData,
}

impl TransactionKind {
    /// Return `true` for policy-write kinds.
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            Self::SetPolicies | Self::SetPolicy | Self::DeletePolicy
        )
    }

    /// Return `true` for data-write kinds.
    pub fn is_data(&self) -> bool {
        matches!(self, Self::SetPolicyData | Self::DeletePolicyData)
    }
}

/// One recorded attempt to mutate the policy store.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Transaction {
    /// Kind of mutation.
    pub kind: TransactionKind,
    /// Whether the store accepted it.
    pub success: bool,
    /// Failure details, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Time of the attempt in epoch microseconds.
    pub at_micros: u64,
    /// Human readable actions, e.g. affected paths.
    pub actions: Vec<String>,
}

impl Transaction {
    /// Return a new instance stamped with the current time.
    pub fn new(
        kind: TransactionKind,
        success: bool,
        error: Option<String>,
        actions: Vec<String>,
    ) -> Self {
        Self {
            kind,
            success,
            error,
            at_micros: crate::time::get_timestamp_micros(),
            actions,
        }
    }
}

/// Bounded, append-only (within capacity) log of [Transaction]s.
///
/// Single writer (the sync engine); readers derive health from a snapshot.
/// Reset only by process restart.
pub struct TransactionLog {
    entries: Mutex<VecDeque<Transaction>>,
    capacity: usize,
}

impl TransactionLog {
    /// Return a new instance with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Return a new instance retaining the last `capacity` transactions.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Append a transaction, dropping the oldest entry when full.
    pub fn append(&self, transaction: Transaction) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(transaction);
    }

    /// Clone the current entries, oldest first.
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    /// *ready*: at least one successful policy write and at least one
    /// successful data write exist in the log.
    pub fn is_ready(&self) -> bool {
        let entries = self.entries.lock().unwrap();
        let policy_ok = entries.iter().any(|t| t.kind.is_policy() && t.success);
        let data_ok = entries.iter().any(|t| t.kind.is_data() && t.success);
        policy_ok && data_ok
    }

    /// *healthy*: *ready* and the most recent policy write and the most
    /// recent data write both succeeded.
    pub fn is_healthy(&self) -> bool {
        let entries = self.entries.lock().unwrap();
        let last_policy = entries.iter().rev().find(|t| t.kind.is_policy());
        let last_data = entries.iter().rev().find(|t| t.kind.is_data());
        let policy_ok = entries.iter().any(|t| t.kind.is_policy() && t.success);
        let data_ok = entries.iter().any(|t| t.kind.is_data() && t.success);
        policy_ok
            && data_ok
            && last_policy.is_some_and(|t| t.success)
            && last_data.is_some_and(|t| t.success)
    }

    /// Render the healthcheck document as a pure function of the current
    /// snapshot.
    pub fn healthcheck_document(&self) -> serde_json::Value {
        let snapshot = self.snapshot();
        let last_policy = snapshot
            .iter()
            .rev()
            .find(|t| t.kind.is_policy() && t.success)
            .map(|t| t.at_micros);
        let last_data = snapshot
            .iter()
            .rev()
            .find(|t| t.kind.is_data() && t.success)
            .map(|t| t.at_micros);
        serde_json::json!({
            "ready": self.is_ready(),
            "healthy": self.is_healthy(),
            "last_policy_update_micros": last_policy,
            "last_data_update_micros": last_data,
            "transactions": snapshot,
        })
    }
}

impl Default for TransactionLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transaction(kind: TransactionKind, success: bool) -> Transaction {
        Transaction::new(kind, success, (!success).then(|| "boom".to_string()), vec![])
    }

    #[test]
    fn ready_needs_one_of_each() {
        let log = TransactionLog::new();
        assert!(!log.is_ready());
        log.append(transaction(TransactionKind::SetPolicies, true));
        assert!(!log.is_ready());
        log.append(transaction(TransactionKind::SetPolicyData, true));
        assert!(log.is_ready());
    }

    #[test]
    fn healthy_follows_most_recent_writes() {
        let log = TransactionLog::new();
        log.append(transaction(TransactionKind::SetPolicies, true));
        log.append(transaction(TransactionKind::SetPolicyData, true));
        assert!(log.is_healthy());
        // A failed data write flips healthy but not ready.
        log.append(transaction(TransactionKind::SetPolicyData, false));
        assert!(log.is_ready());
        assert!(!log.is_healthy());
        // A later successful data write restores healthy.
        log.append(transaction(TransactionKind::SetPolicyData, true));
        assert!(log.is_healthy());
    }

    #[test]
    fn failed_writes_alone_never_make_ready() {
        let log = TransactionLog::new();
        log.append(transaction(TransactionKind::SetPolicies, false));
        log.append(transaction(TransactionKind::SetPolicyData, false));
        assert!(!log.is_ready());
        assert!(!log.is_healthy());
    }

    #[test]
    fn ring_buffer_drops_oldest() {
        let log = TransactionLog::with_capacity(2);
        log.append(transaction(TransactionKind::SetPolicies, true));
        log.append(transaction(TransactionKind::SetPolicyData, true));
        assert!(log.is_ready());
        // Two more data writes push the policy write out of the window.
        log.append(transaction(TransactionKind::SetPolicyData, true));
        log.append(transaction(TransactionKind::SetPolicyData, true));
        assert!(!log.is_ready());
        assert_eq!(log.snapshot().len(), 2);
    }

    #[test]
    fn healthcheck_document_reflects_log() {
        let log = TransactionLog::new();
        log.append(transaction(TransactionKind::SetPolicies, true));
        log.append(transaction(TransactionKind::SetPolicyData, true));
        let doc = log.healthcheck_document();
        assert_eq!(doc["ready"], true);
        assert_eq!(doc["healthy"], true);
        assert_eq!(doc["transactions"].as_array().unwrap().len(), 2);
    }
}
