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

//! API resources for data-update notifications and the base data
//! configuration.

use crate::rest_api::AppState;
use crate::rest_api::common::ApiErrorMapper;
use crate::rest_api::common::get_identity;
use actix_web::Error;
use actix_web::HttpRequest;
use actix_web::HttpResponse;
use actix_web::get;
use actix_web::post;
use actix_web::web::Data;
use actix_web::web::Json;
use actix_web::web::Query;
use opal_client::msg::DataUpdate;
use opal_core::srv::auth::PeerKind;
use serde::Deserialize;

/// Optional scope selector.
#[derive(Debug, Deserialize)]
pub struct ScopeQueryParams {
    /// Scope to route to.
    scope_id: Option<String>,
}

/// Accept a data update from an authorized publisher.
#[utoipa::path(
    tag = "data",
    params(("scope_id" = Option<String>, Query, description = "Scope to route to.")),
    responses(
        (status = 200, description = "Update accepted, id assigned."),
        (status = 401, description = "Unauthorized: Authentication failure."),
        (status = 403, description = "The peer is not a data source."),
    ),
    security(("bearer_auth" = [])),
)]
#[post("/data/config")]
pub async fn post_data_config(
    http_request: HttpRequest,
    query: Query<ScopeQueryParams>,
    body: Json<DataUpdate>,
    app_state: Data<AppState>,
) -> Result<HttpResponse, Error> {
    publish(http_request, query, body, app_state).await
}

/// Alias of `POST /data/config` with identical semantics.
#[utoipa::path(
    tag = "data",
    params(("scope_id" = Option<String>, Query, description = "Scope to route to.")),
    responses(
        (status = 200, description = "Update accepted, id assigned."),
        (status = 401, description = "Unauthorized: Authentication failure."),
        (status = 403, description = "The peer is not a data source."),
    ),
    security(("bearer_auth" = [])),
)]
#[post("/data/update")]
pub async fn post_data_update(
    http_request: HttpRequest,
    query: Query<ScopeQueryParams>,
    body: Json<DataUpdate>,
    app_state: Data<AppState>,
) -> Result<HttpResponse, Error> {
    publish(http_request, query, body, app_state).await
}

/// Shared handler of both publish endpoints.
async fn publish(
    http_request: HttpRequest,
    query: Query<ScopeQueryParams>,
    body: Json<DataUpdate>,
    app_state: Data<AppState>,
) -> Result<HttpResponse, Error> {
    let identity = get_identity(
        app_state.srv.auth_gate(),
        &http_request,
        PeerKind::Datasource,
    )
    .map_err(ApiErrorMapper::from_server_error)?;
    let update_id = app_state
        .srv
        .publish_data_update(
            &identity,
            body.into_inner(),
            query.scope_id.as_deref(),
        )
        .await
        .map_err(ApiErrorMapper::from_server_error)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"id": update_id})))
}

/// The base data-source directives clients execute at bootstrap.
#[utoipa::path(
    tag = "data",
    params(("scope_id" = Option<String>, Query, description = "Scope to read from.")),
    responses(
        (status = 200, description = "The base data configuration."),
        (status = 404, description = "Unknown scope."),
    ),
)]
#[get("/data/config")]
pub async fn get_data_config(
    query: Query<ScopeQueryParams>,
    app_state: Data<AppState>,
) -> Result<HttpResponse, Error> {
    let data_config = app_state
        .srv
        .base_data_config(query.scope_id.as_deref())
        .map_err(ApiErrorMapper::from_server_error)?;
    Ok(HttpResponse::Ok().json(data_config))
}
