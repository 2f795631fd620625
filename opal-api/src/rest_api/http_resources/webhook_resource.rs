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

//! API resource for inbound policy webhooks.

use crate::rest_api::AppState;
use crate::rest_api::common::ApiErrorMapper;
use actix_web::Error;
use actix_web::HttpRequest;
use actix_web::HttpResponse;
use actix_web::post;
use actix_web::web::Bytes;
use actix_web::web::Data;
use std::collections::BTreeMap;

/// Receive a change notification from the policy repository host.
///
/// The shared secret is validated before anything is triggered; requests
/// filtered by event type or branch are acknowledged without a re-check.
#[utoipa::path(
    tag = "policy",
    request_body(content = Vec<u8>, description = "Raw webhook payload", content_type = "application/octet-stream"),
    responses(
        (status = 204, description = "Accepted."),
        (status = 403, description = "Secret validation failed."),
    ),
)]
#[post("/webhook")]
pub async fn webhook(
    http_request: HttpRequest,
    body: Bytes,
    app_state: Data<AppState>,
) -> Result<HttpResponse, Error> {
    let headers: BTreeMap<String, String> = http_request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_lowercase(), value.to_string()))
        })
        .collect();
    let triggered = app_state
        .srv
        .handle_webhook(&headers, &body)
        .map_err(ApiErrorMapper::from_server_error)?;
    if log::log_enabled!(log::Level::Debug) {
        log::debug!("Webhook accepted (re-check triggered: {triggered}).");
    }
    Ok(HttpResponse::NoContent().finish())
}
