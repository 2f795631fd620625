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

//! API resource for serving policy bundles.

use crate::rest_api::AppState;
use crate::rest_api::common::ApiErrorMapper;
use actix_web::Error;
use actix_web::HttpResponse;
use actix_web::get;
use actix_web::web::Data;
use actix_web::web::Query;

/// Serve a complete or delta bundle for the requested directories.
///
/// `path` repeats per subscribed directory; `base_hash` requests a delta
/// from that revision; `scope_id` routes to a scope's source.
#[utoipa::path(
    tag = "policy",
    params(
        ("path" = Option<String>, Query, description = "Subscribed directory (repeatable)."),
        ("base_hash" = Option<String>, Query, description = "Delta base revision."),
        ("scope_id" = Option<String>, Query, description = "Scope to serve from."),
    ),
    responses(
        (status = 200, description = "The bundle."),
        (status = 404, description = "Unknown scope."),
    ),
)]
#[get("/policy")]
pub async fn policy_bundle(
    query: Query<Vec<(String, String)>>,
    app_state: Data<AppState>,
) -> Result<HttpResponse, Error> {
    let mut dirs = Vec::new();
    let mut base_hash = None;
    let mut scope_id = None;
    for (key, value) in query.into_inner() {
        match key.as_str() {
            "path" => dirs.push(value),
            "base_hash" => base_hash = Some(value),
            "scope_id" => scope_id = Some(value),
            _ => {}
        }
    }
    let bundle = app_state
        .srv
        .policy_bundle(&dirs, base_hash.as_deref(), scope_id.as_deref())
        .await
        .map_err(ApiErrorMapper::from_server_error)?;
    Ok(HttpResponse::Ok().json(bundle))
}
