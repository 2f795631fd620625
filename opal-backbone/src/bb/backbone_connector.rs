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

//! Connector trait for the shared pub/sub backbone.

use super::BackboneError;
use tokio::sync::mpsc::UnboundedReceiver;

/// Well-known backbone channel carrying [FanoutEnvelope](super::FanoutEnvelope)
/// messages between server replicas.
pub const EVENT_NOTIFIER_CHANNEL: &str = "EventNotifier";

/// Reserved topic for periodic keepalive envelopes used to surface silent
/// backbone failures.
pub const KEEPALIVE_TOPIC: &str = "__opal_keepalive";

/// Item yielded by a [BackboneSubscription].
#[derive(Debug)]
pub enum BackboneItem {
    /// A message published on the subscribed channel.
    Message(Vec<u8>),
    /// The connection to the backbone was lost (or lagged) long enough that
    /// messages may have been missed. Consumers must re-bootstrap any state
    /// that is derived from the message stream.
    Resync,
}

/// Stream of [BackboneItem]s for one subscribed channel.
///
/// Implementations push items into the channel handed over at construction
/// and may inject [BackboneItem::Resync] at any point.
pub struct BackboneSubscription {
    rx: UnboundedReceiver<BackboneItem>,
}

impl BackboneSubscription {
    /// Return a new instance wrapping the receiving end of the subscription.
    pub fn new(rx: UnboundedReceiver<BackboneItem>) -> Self {
        Self { rx }
    }

    /// Await the next item. `None` means the subscription has ended for good
    /// (backbone closed).
    pub async fn next(&mut self) -> Option<BackboneItem> {
        self.rx.recv().await
    }
}

/// Uniform publish/subscribe access to one backbone implementation.
///
/// The backbone is only required when more than one server replica exists.
/// Implementations own reconnection with exponential backoff and signal
/// prolonged disconnects as [BackboneItem::Resync] on open subscriptions.
#[async_trait::async_trait]
pub trait BackboneConnector: Send + Sync {
    /// Publish `message` on the named channel.
    async fn publish(&self, channel: &str, message: &[u8]) -> Result<(), BackboneError>;

    /// Subscribe to the named channel.
    async fn subscribe(&self, channel: &str) -> Result<BackboneSubscription, BackboneError>;

    /// Close the backbone connection and end all subscriptions.
    async fn close(&self);
}
