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

//! Long-lived websocket connection to the OPAL server.

use crate::msg::HubRequest;
use futures::SinkExt;
use futures::StreamExt;
use futures::stream::SplitSink;
use futures::stream::SplitStream;
use opal_backbone::FanoutEnvelope;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::ClientRequestBuilder;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use uuid::Uuid;

/// One websocket connection to the server's PubSub Hub endpoint.
///
/// Received envelopes are queued for the sync engine to pick up. The
/// connection pings the server at a regular interval and signals
/// termination on any failure so that the engine can reconnect.
pub struct ServerConnection {
    ws_write_stream: Arc<Mutex<SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>>>,
    ws_read_stream: Arc<Mutex<SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>>>,
    tx: UnboundedSender<FanoutEnvelope>,
    termination_semaphore: Semaphore,
}

impl ServerConnection {
    /// Try to create and connect a new instance.
    ///
    /// Return `None` if the connection attempt failed.
    pub async fn connect(
        url: &str,
        authorization_header_value: Option<&str>,
        tx: &UnboundedSender<FanoutEnvelope>,
    ) -> Option<Arc<Self>> {
        let url = if url.starts_with("http") {
            url.replacen("http", "ws", 1)
        } else {
            url.to_owned()
        };
        let uri: Uri = url
            .parse()
            .map_err(|e| {
                log::warn!("Invalid server URL '{url}': {e}");
            })
            .ok()?;
        let mut builder = ClientRequestBuilder::new(uri);
        if let Some(authorization_header_value) = authorization_header_value {
            builder = builder.with_header("Authorization", authorization_header_value);
        }
        if let Ok((ws_stream, _res)) = tokio_tungstenite::connect_async_with_config(
            builder,
            Some(WebSocketConfig::default()),
            true,
        )
        .await
        .map_err(|e| {
            log::debug!("Failed to connect to '{url}': {e:?}");
        }) {
            if log::log_enabled!(log::Level::Debug) {
                log::debug!("Opened websocket to '{url}'");
            }
            let (write, read) = ws_stream.split();
            Some(Arc::new(Self {
                ws_write_stream: Arc::new(Mutex::new(write)),
                ws_read_stream: Arc::new(Mutex::new(read)),
                tx: tx.clone(),
                termination_semaphore: Semaphore::new(0),
            }))
        } else {
            None
        }
    }

    /// Wait for this instance to terminate.
    pub async fn await_termination(&self) {
        let _ = self.termination_semaphore.acquire().await;
    }

    /// Return `true` if this instance is signaled to terminate.
    pub fn is_signaled_to_terminate(&self) -> bool {
        self.termination_semaphore.available_permits() > 0
    }

    /// Signal this instance to terminate.
    pub fn signal_termination(&self) {
        self.termination_semaphore.add_permits(1);
    }

    /// Recieve envelopes from the web socket and queue them for the sync
    /// engine to pick up.
    pub async fn handle_messages(self: &Arc<Self>, ping_interval_micros: u64) {
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("Starting worker to handle incoming messages.");
        }
        // Send ping messages at regular intervals
        let self_clone = Arc::clone(self);
        let ping_task = tokio::spawn(async move {
            // Use an unique ping indetifier for each connection.
            let ping_id = Uuid::new_v4().into_bytes().to_vec();
            while !self_clone.is_signaled_to_terminate() {
                tokio::time::sleep(tokio::time::Duration::from_micros(ping_interval_micros)).await;
                if let Err(e) = self_clone
                    .ws_write_stream
                    .lock()
                    .await
                    .send(Message::Ping(ping_id.clone()))
                    .await
                {
                    log::debug!("Sending ping failed: {e:?}");
                    break;
                }
            }
        });
        // Recieve new messages from the web socket.
        while !ping_task.is_finished() {
            let res = {
                let mut web_socket_mutex = self.ws_read_stream.lock().await;
                web_socket_mutex.next().await
            };
            match res {
                Some(Ok(Message::Text(text))) => {
                    if log::log_enabled!(log::Level::Trace) {
                        log::trace!("Got text: {text}");
                    }
                    // Malformed envelopes are dropped with a warning.
                    if let Some(envelope) = FanoutEnvelope::from_slice(text.as_bytes()) {
                        if let Err(e) = self.tx.send(envelope) {
                            log::info!("Unable to write to queue: {e:?}");
                            break;
                        }
                    }
                }
                // Respond to ping with pong right away.
                Some(Ok(Message::Ping(payload))) => {
                    if log::log_enabled!(log::Level::Trace) {
                        log::trace!("Got ping: {payload:?}");
                    }
                    if let Err(e) = self
                        .ws_write_stream
                        .lock()
                        .await
                        .send(Message::Pong(payload))
                        .await
                    {
                        log::debug!("Pong send failed: {e:?}");
                        break;
                    }
                }
                Some(Ok(Message::Pong(payload))) => {
                    if log::log_enabled!(log::Level::Trace) {
                        log::trace!("Got pong: {payload:?}");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    log::debug!("Server closed the connection: {frame:?}");
                    break;
                }
                None => {
                    log::debug!("None next() message result.");
                    tokio::time::sleep(tokio::time::Duration::from_millis(32)).await;
                }
                Some(Err(e)) => {
                    log::info!("recv_next: {e:?}");
                    break;
                }
                r => {
                    log::info!("Unhandled result: {r:?}");
                    tokio::time::sleep(tokio::time::Duration::from_millis(32)).await;
                }
            }
        }
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("Stopping worker to handle incoming messages.");
        }
        self.signal_termination();
    }

    /// Send a request to the hub and flush.
    pub async fn send(&self, request: &HubRequest) {
        let msg = Message::Text(
            serde_json::to_string(&request).unwrap_or_default(),
        );
        let mut web_socket = self.ws_write_stream.lock().await;
        if let Err(e) = web_socket.send(msg).await {
            if log::log_enabled!(log::Level::Debug) {
                log::debug!("Send failed: {e:?}");
            }
            self.signal_termination();
        };
    }

    /// Close the connection with a normal close code.
    pub async fn close(&self) {
        let mut web_socket = self.ws_write_stream.lock().await;
        if let Err(e) = web_socket.send(Message::Close(None)).await {
            log::debug!("Close failed: {e:?}");
        }
        self.signal_termination();
    }
}
