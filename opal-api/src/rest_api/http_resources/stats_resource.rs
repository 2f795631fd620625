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

//! API resources for client/worker statistics.

use crate::rest_api::AppState;
use actix_web::HttpResponse;
use actix_web::Responder;
use actix_web::get;
use actix_web::web::Data;

/// Aggregate worker and client counts across replicas.
#[utoipa::path(
    tag = "stats",
    responses((status = 200, description = "Aggregate counts.")),
)]
#[get("/stats")]
pub async fn stats(app_state: Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(app_state.srv.hub().statistics().aggregate())
}

/// Detailed per-client view of this worker and its peers.
#[utoipa::path(
    tag = "stats",
    responses((status = 200, description = "Detailed statistics.")),
)]
#[get("/statistics")]
pub async fn statistics(app_state: Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(app_state.srv.hub().statistics().detailed())
}
