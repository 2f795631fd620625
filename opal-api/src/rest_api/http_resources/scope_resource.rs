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

//! API resources for the multi-tenant scope surface.

use crate::rest_api::AppState;
use crate::rest_api::common::ApiErrorMapper;
use actix_web::Error;
use actix_web::HttpResponse;
use actix_web::delete;
use actix_web::get;
use actix_web::put;
use actix_web::web::Data;
use actix_web::web::Json;
use actix_web::web::Path;
use opal_core::srv::ServerErrorKind;
use opal_core::srv::scope::ScopeDefinition;

/// Create or update a scope definition.
#[utoipa::path(
    tag = "scopes",
    responses(
        (status = 200, description = "Scope is ready."),
        (status = 404, description = "Scopes mode is not enabled."),
    ),
)]
#[put("/scopes")]
pub async fn put_scope(
    body: Json<ScopeDefinition>,
    app_state: Data<AppState>,
) -> Result<HttpResponse, Error> {
    let scope_manager = app_state.srv.scope_manager().ok_or_else(|| {
        ApiErrorMapper::from_server_error(
            ServerErrorKind::ScopeNotFound.error_with_msg("Scopes mode is not enabled."),
        )
    })?;
    let definition = body.into_inner();
    let scope_id = definition.scope_id.clone();
    scope_manager
        .upsert(definition)
        .await
        .map_err(ApiErrorMapper::from_server_error)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"scope_id": scope_id})))
}

/// All scope definitions.
#[utoipa::path(
    tag = "scopes",
    responses(
        (status = 200, description = "Scope definitions."),
        (status = 404, description = "Scopes mode is not enabled."),
    ),
)]
#[get("/scopes")]
pub async fn get_scopes(app_state: Data<AppState>) -> Result<HttpResponse, Error> {
    let scope_manager = app_state.srv.scope_manager().ok_or_else(|| {
        ApiErrorMapper::from_server_error(
            ServerErrorKind::ScopeNotFound.error_with_msg("Scopes mode is not enabled."),
        )
    })?;
    Ok(HttpResponse::Ok().json(scope_manager.list()))
}

/// Delete a scope.
#[utoipa::path(
    tag = "scopes",
    params(("scope_id", description = "Scope identifier.")),
    responses(
        (status = 204, description = "Scope removed."),
        (status = 404, description = "Unknown scope."),
    ),
)]
#[delete("/scopes/{scope_id}")]
pub async fn delete_scope(
    path: Path<String>,
    app_state: Data<AppState>,
) -> Result<HttpResponse, Error> {
    let scope_manager = app_state.srv.scope_manager().ok_or_else(|| {
        ApiErrorMapper::from_server_error(
            ServerErrorKind::ScopeNotFound.error_with_msg("Scopes mode is not enabled."),
        )
    })?;
    if scope_manager.delete(&path.into_inner()) {
        Ok(HttpResponse::NoContent().finish())
    } else {
        Err(ApiErrorMapper::from_server_error(
            ServerErrorKind::ScopeNotFound.error(),
        ))
    }
}
