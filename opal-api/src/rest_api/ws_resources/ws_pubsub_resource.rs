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

//! WebSocket endpoint of the PubSub Hub.

use crate::rest_api::AppState;
use crate::rest_api::common::ApiErrorMapper;
use crate::rest_api::common::get_identity;
use actix_web::Error;
use actix_web::HttpRequest;
use actix_web::HttpResponse;
use actix_web::get;
use actix_web::rt;
use actix_web::web;
use actix_web::web::Data;
use actix_ws::AggregatedMessage;
use actix_ws::AggregatedMessageStream;
use actix_ws::Session;
use futures::StreamExt;
use opal_backbone::FanoutEnvelope;
use opal_client::msg::HubCommand;
use opal_client::msg::HubRequest;
use opal_core::srv::auth::PeerKind;
use opal_core::srv::hub::ConnectionHandle;
use opal_core::srv::hub::PublishOrigin;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Duration;
use tokio::time::sleep;

/// A connection without any inbound ping for this long is dropped; the
/// client reconnects and re-bootstraps.
const IDLE_DROP_MICROS: u64 = 60_000_000;

/// Open the PubSub Hub websocket channel.
///
/// Clients authenticate on connect, receive a welcome envelope with their
/// assigned client id and then exchange subscribe/unsubscribe/notify
/// requests against topic envelopes.
#[utoipa::path(
    tag = "web_socket",
    responses(
        (status = 101, description = "Switching protocols to websocket."),
        (status = 401, description = "Unauthorized: Authentication failure."),
        (status = 400, description = "Bad Request."),
    ),
    security(("bearer_auth" = [])),
)]
#[get("/ws")]
pub async fn pubsub_channel(
    http_request: HttpRequest,
    app_state: Data<AppState>,
    stream: web::Payload,
) -> Result<HttpResponse, Error> {
    let identity = get_identity(app_state.srv.auth_gate(), &http_request, PeerKind::Client)
        .map_err(ApiErrorMapper::from_server_error)?;
    let remote_address = http_request
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    log::info!(
        "Peer '{}' opened a hub connection from {remote_address}.",
        identity.identity_string()
    );
    let (http_upgrade_response, session, stream) = actix_ws::handle(&http_request, stream)?;
    let stream = stream
        .aggregate_continuations()
        // aggregate continuation frames up to 1 MiB
        .max_continuation_size(2_usize.pow(20));
    let (handle, envelope_rx) = app_state.srv.hub().register_connection(&remote_address).await;
    let last_ping = Arc::new(AtomicU64::new(opal_client::time::get_timestamp_micros()));
    let last_ping_clone = Arc::clone(&last_ping);
    // Ship envelopes to this stream
    rt::spawn(async move {
        ship_envelopes_to_stream(session, envelope_rx, last_ping).await;
    });
    // Pull requests from this stream
    rt::spawn(async move {
        pull_requests_from_stream(app_state, handle, stream, last_ping_clone).await;
    });
    // Respond immediately with the WebSocket upgrade response
    Ok(http_upgrade_response)
}

/// Ship queued envelopes to the connected client.
async fn ship_envelopes_to_stream(
    mut session: Session,
    mut envelope_rx: UnboundedReceiver<FanoutEnvelope>,
    last_ping: Arc<AtomicU64>,
) {
    loop {
        tokio::select! {
            maybe_envelope = envelope_rx.recv() => {
                match maybe_envelope {
                    Some(envelope) => {
                        let text = match serde_json::to_string(&envelope) {
                            Ok(text) => text,
                            Err(e) => {
                                log::warn!("Unserializable envelope: {e}");
                                continue;
                            }
                        };
                        if log::log_enabled!(log::Level::Trace) {
                            log::trace!("Sending text: {text}");
                        }
                        if let Err(e) = session.text(text).await {
                            if log::log_enabled!(log::Level::Debug) {
                                log::debug!("Send failed with: {e:?}");
                            }
                            break;
                        }
                    }
                    None => {
                        break;
                    }
                }
            },
            _ = sleep(Duration::from_micros(IDLE_DROP_MICROS / 4)) => {
                let now = opal_client::time::get_timestamp_micros();
                if last_ping.load(Ordering::Relaxed) + IDLE_DROP_MICROS < now {
                    if log::log_enabled!(log::Level::Debug) {
                        log::debug!("Last ping on this web-socket connection was too old.");
                    }
                    break;
                }
                if let Err(e) = session.ping("ping".as_bytes()).await {
                    if log::log_enabled!(log::Level::Debug) {
                        log::debug!("Ping failed with: {e:?}");
                    }
                    break;
                }
            },
        }
    }
    session
        .close(None)
        .await
        .map_err(|e| {
            log::debug!("Failed to close session: {e:?}");
        })
        .ok();
}

/// Pull subscribe/unsubscribe/notify requests from the client.
async fn pull_requests_from_stream(
    app_state: Data<AppState>,
    handle: Arc<ConnectionHandle>,
    mut stream: AggregatedMessageStream,
    last_ping: Arc<AtomicU64>,
) {
    let mut ping_id = None;
    loop {
        match stream.next().await {
            Some(Ok(AggregatedMessage::Text(text))) => {
                if !handle.allow_inbound() {
                    log::info!(
                        "Client '{}' exceeded the rate limit. Dropping the message.",
                        handle.client_id()
                    );
                    continue;
                }
                match serde_json::from_str::<HubRequest>(&text) {
                    Ok(request) => {
                        handle_request(&app_state, &handle, request).await;
                    }
                    Err(e) => {
                        // Integrity policy: drop with a warning.
                        log::warn!("Dropping malformed hub request: {e}");
                    }
                }
            }
            Some(Ok(AggregatedMessage::Binary(_bin))) => {
                if log::log_enabled!(log::Level::Debug) {
                    log::debug!("Ignoring binary message");
                }
            }
            Some(Ok(AggregatedMessage::Ping(msg))) => {
                if log::log_enabled!(log::Level::Trace) {
                    log::trace!("Got ping message");
                }
                // Allow client to use an unique identifier
                if ping_id.is_none() {
                    ping_id = Some(msg.to_vec());
                }
                if ping_id.as_ref().is_some_and(|ping_id| ping_id.eq(&msg)) {
                    let ping_ts = opal_client::time::get_timestamp_micros();
                    last_ping.store(ping_ts, Ordering::Relaxed);
                }
            }
            Some(Ok(AggregatedMessage::Pong(_msg))) => {
                if log::log_enabled!(log::Level::Trace) {
                    log::trace!("Ignoring pong message");
                }
            }
            Some(Ok(AggregatedMessage::Close(frame))) => {
                if log::log_enabled!(log::Level::Debug) {
                    log::debug!("Client closed the connection: {frame:?}");
                }
                break;
            }
            Some(Err(e)) => {
                if log::log_enabled!(log::Level::Debug) {
                    log::debug!("Failed to get next message: {e:?}");
                }
                break;
            }
            None => {
                break;
            }
        }
    }
    app_state.srv.hub().unregister_connection(handle.conn_id());
}

/// Apply one hub request from the client.
async fn handle_request(
    app_state: &Data<AppState>,
    handle: &Arc<ConnectionHandle>,
    request: HubRequest,
) {
    match request.command {
        HubCommand::Subscribe { topics } => {
            app_state.srv.hub().subscribe(handle, &topics);
        }
        HubCommand::Unsubscribe { topics } => {
            app_state.srv.hub().unsubscribe(handle, &topics);
        }
        HubCommand::Notify { topic, data } => {
            app_state
                .srv
                .hub()
                .publish(&topic, data, PublishOrigin::Local)
                .await;
        }
    }
}
