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

//! API resource for minting peer JWTs.

use crate::rest_api::AppState;
use crate::rest_api::common::ApiErrorMapper;
use crate::rest_api::common::bearer_token;
use actix_web::Error;
use actix_web::HttpRequest;
use actix_web::HttpResponse;
use actix_web::post;
use actix_web::web::Data;
use actix_web::web::Json;
use opal_core::srv::auth::PeerKind;
use serde::Deserialize;
use utoipa::ToSchema;

/// Token request body.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenRequest {
    /// Peer kind the token is minted for.
    #[serde(rename = "type")]
    peer_type: PeerKind,
}

/// Mint a JWT for a client or datasource peer.
///
/// Requires the configured master token as bearer credential.
#[utoipa::path(
    tag = "auth",
    responses(
        (status = 200, description = "Minted token."),
        (status = 403, description = "Master token mismatch."),
    ),
    security(("bearer_auth" = [])),
)]
#[post("/token")]
pub async fn mint_token(
    http_request: HttpRequest,
    body: Json<TokenRequest>,
    app_state: Data<AppState>,
) -> Result<HttpResponse, Error> {
    let master_token = bearer_token(&http_request).map_err(ApiErrorMapper::from_server_error)?;
    let token = app_state
        .srv
        .mint_token(master_token.as_deref(), body.peer_type)
        .map_err(ApiErrorMapper::from_server_error)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "token": token,
        "type": "bearer",
        "details": {"peer_type": body.peer_type},
    })))
}
