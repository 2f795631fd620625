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

//! Fan-out envelope wire format.

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Envelope published on the backbone (and delivered to websocket clients)
/// for every topic event.
///
/// The `notifier_id` identifies the originating server replica so that the
/// replica that published an envelope can suppress re-delivery of its own
/// traffic when it comes back over the backbone.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FanoutEnvelope {
    /// Identifier of the originating server replica.
    pub notifier_id: Uuid,
    /// The target topic.
    pub topic: String,
    /// Topic-specific payload.
    pub data: serde_json::Value,
}

impl FanoutEnvelope {
    /// Return a new instance.
    pub fn new(notifier_id: Uuid, topic: &str, data: serde_json::Value) -> Self {
        Self {
            notifier_id,
            topic: topic.to_owned(),
            data,
        }
    }

    /// Serialize to the JSON wire format.
    pub fn as_bytes(&self) -> Vec<u8> {
        // Serialization of this struct cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parse from the JSON wire format.
    pub fn from_slice(message: &[u8]) -> Option<Self> {
        serde_json::from_slice(message)
            .map_err(|e| {
                log::warn!("Dropping malformed fan-out envelope: {e}");
            })
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_wire_format_round_trip() {
        let envelope = FanoutEnvelope::new(
            Uuid::new_v4(),
            "policy:app/rbac",
            serde_json::json!({"revision": "abc123", "old_revision": "def456"}),
        );
        let bytes = envelope.as_bytes();
        let parsed = FanoutEnvelope::from_slice(&bytes).expect("round trip failed");
        assert_eq!(parsed.notifier_id, envelope.notifier_id);
        assert_eq!(parsed.topic, envelope.topic);
        assert_eq!(parsed.data, envelope.data);
    }

    #[test]
    fn malformed_envelope_is_dropped() {
        assert!(FanoutEnvelope::from_slice(b"{not json").is_none());
        assert!(FanoutEnvelope::from_slice(b"{\"topic\":\"t\"}").is_none());
    }
}
