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

//! Ephemeral in-memory implementation of [BackboneConnector].

use crossbeam_skiplist::SkipMap;
use opal_backbone::BackboneConnector;
use opal_backbone::BackboneError;
use opal_backbone::BackboneErrorKind;
use opal_backbone::BackboneItem;
use opal_backbone::BackboneSubscription;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use tokio::sync::broadcast;
use tokio::sync::mpsc;

/// Buffered messages per channel before slow subscribers are forced to
/// resync.
const CHANNEL_CAPACITY: usize = 1024;

/// Ephemeral in-memory implementation of [BackboneConnector].
///
/// Every named channel is backed by a process local broadcast queue. A
/// subscriber that falls more than [CHANNEL_CAPACITY] messages behind gets a
/// [BackboneItem::Resync] instead of the lost messages, mirroring what a
/// networked backbone does after a prolonged disconnect.
pub struct InMemoryBackbone {
    channels: SkipMap<String, broadcast::Sender<Vec<u8>>>,
    closed: AtomicBool,
}

impl InMemoryBackbone {
    /// Return a new instance.
    pub async fn new() -> Arc<Self> {
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("Using in-mem backbone.");
        }
        Arc::new(Self {
            channels: SkipMap::default(),
            closed: AtomicBool::new(false),
        })
    }

    /// Get (or lazily create) the broadcast queue of a channel.
    fn sender_for(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .get_or_insert_with(channel.to_owned(), || {
                broadcast::channel(CHANNEL_CAPACITY).0
            })
            .value()
            .clone()
    }
}

#[async_trait::async_trait]
impl BackboneConnector for InMemoryBackbone {
    async fn publish(&self, channel: &str, message: &[u8]) -> Result<(), BackboneError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(BackboneErrorKind::Disconnected.error());
        }
        // A send error only means that there is no subscriber right now.
        let _ = self.sender_for(channel).send(message.to_vec());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BackboneSubscription, BackboneError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(BackboneErrorKind::SubscribeFailure
                .error_with_msg("The in-memory backbone is closed."));
        }
        let mut broadcast_rx = self.sender_for(channel).subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(message) => {
                        if tx.send(BackboneItem::Message(message)).is_err() {
                            // Subscriber is gone.
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::info!("In-memory backbone subscriber lagged {missed} messages.");
                        if tx.send(BackboneItem::Resync).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        });
        Ok(BackboneSubscription::new(rx))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        // Dropping the senders ends all forwarding tasks.
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let backbone = InMemoryBackbone::new().await;
        let mut sub_a = backbone.subscribe("EventNotifier").await.unwrap();
        let mut sub_b = backbone.subscribe("EventNotifier").await.unwrap();
        backbone.publish("EventNotifier", b"hello").await.unwrap();
        for sub in [&mut sub_a, &mut sub_b] {
            match sub.next().await {
                Some(BackboneItem::Message(message)) => assert_eq!(message, b"hello"),
                other => panic!("Expected message, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let backbone = InMemoryBackbone::new().await;
        let mut sub = backbone.subscribe("a").await.unwrap();
        backbone.publish("b", b"other channel").await.unwrap();
        backbone.publish("a", b"own channel").await.unwrap();
        match sub.next().await {
            Some(BackboneItem::Message(message)) => assert_eq!(message, b"own channel"),
            other => panic!("Expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lagged_subscriber_gets_resync() {
        let backbone = InMemoryBackbone::new().await;
        let mut sub = backbone.subscribe("a").await.unwrap();
        // Overflow the broadcast queue before the forwarding task catches up
        // is not deterministic, so force the situation by publishing more
        // than the queue holds while the subscriber is blocked on the
        // broadcast receiver side only after the flood.
        for i in 0..(CHANNEL_CAPACITY * 2) {
            backbone
                .publish("a", format!("m{i}").as_bytes())
                .await
                .unwrap();
        }
        // Drain until a resync (or all messages) observed. The forwarding
        // task may have kept up with an arbitrary prefix.
        let mut saw_resync = false;
        let mut received = 0usize;
        while let Ok(Some(item)) =
            tokio::time::timeout(tokio::time::Duration::from_secs(5), sub.next()).await
        {
            match item {
                BackboneItem::Resync => {
                    saw_resync = true;
                    break;
                }
                BackboneItem::Message(_) => {
                    received += 1;
                    if received == CHANNEL_CAPACITY * 2 {
                        break;
                    }
                }
            }
        }
        assert!(
            saw_resync || received == CHANNEL_CAPACITY * 2,
            "lost messages without a resync signal"
        );
    }

    #[tokio::test]
    async fn publish_after_close_is_rejected() {
        let backbone = InMemoryBackbone::new().await;
        backbone.close().await;
        assert!(backbone.publish("a", b"x").await.is_err());
        assert!(backbone.subscribe("a").await.is_err());
    }
}
