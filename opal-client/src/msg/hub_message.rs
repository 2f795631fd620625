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

//! WebSocket messages sent from client to the PubSub Hub.
//!
//! Messages from the hub to the client reuse
//! [FanoutEnvelope](opal_backbone::FanoutEnvelope); the initial welcome is an
//! envelope on the reserved [WELCOME_TOPIC] carrying the assigned client id.

use serde::Deserialize;
use serde::Serialize;

/// Reserved topic for the initial hub-to-client welcome envelope. Payload:
/// `{"client_id": "..."}`.
pub const WELCOME_TOPIC: &str = "__opal_welcome";

/// Operations a client can request over the hub websocket.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum HubCommand {
    /// Add the connection to the subscriber set of each listed topic.
    Subscribe {
        /// Topics to subscribe to.
        topics: Vec<String>,
    },
    /// Remove the connection from the subscriber set of each listed topic.
    Unsubscribe {
        /// Topics to unsubscribe from.
        topics: Vec<String>,
    },
    /// Publish a payload on a topic through the hub.
    Notify {
        /// The target topic.
        topic: String,
        /// Topic-specific payload.
        data: serde_json::Value,
    },
}

/// WebSocket message sent from client to the PubSub Hub.
#[derive(Debug, Deserialize, Serialize)]
pub struct HubRequest {
    /// Client-assigned request identifier (echoing is not required).
    pub id: u64,
    /// The requested operation.
    #[serde(flatten)]
    pub command: HubCommand,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_wire_shape() {
        let request = HubRequest {
            id: 7,
            command: HubCommand::Subscribe {
                topics: vec!["policy_data".to_string(), "policy:.".to_string()],
            },
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&request).unwrap()).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["method"], "subscribe");
        assert_eq!(json["params"]["topics"][1], "policy:.");
    }

    #[test]
    fn notify_parses_from_wire() {
        let request: HubRequest = serde_json::from_str(
            r#"{"id":1,"method":"notify","params":{"topic":"t","data":{"k":"v"}}}"#,
        )
        .unwrap();
        match request.command {
            HubCommand::Notify { topic, data } => {
                assert_eq!(topic, "t");
                assert_eq!(data["k"], "v");
            }
            other => panic!("Unexpected command: {other:?}"),
        }
    }
}
