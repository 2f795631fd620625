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

//! Health REST API of the client daemon.

use crate::conf::ClientConfig;
use crate::sync::SyncEngine;
use actix_web::App;
use actix_web::HttpResponse;
use actix_web::HttpServer;
use actix_web::Responder;
use actix_web::get;
use actix_web::http::header::ContentType;
use actix_web::web::Data;
use std::sync::Arc;
use utoipa::OpenApi;

/// Shared state between requests.
#[derive(Clone)]
struct AppState {
    engine: Arc<SyncEngine>,
}

/// Run HTTP server.
pub async fn run_http_server(
    client_config: &Arc<ClientConfig>,
    engine: &Arc<SyncEngine>,
) -> Result<(), Box<dyn core::error::Error>> {
    let client_config = Arc::clone(client_config);
    log::info!(
        "Client health API described by http://{}:{}/openapi.json.",
        &client_config.api.bind_address(),
        &client_config.api.bind_port(),
    );
    let app_state = AppState {
        engine: Arc::clone(engine),
    };
    let app_data = Data::<AppState>::new(app_state);
    HttpServer::new(move || {
        App::new()
            .app_data(app_data.clone())
            .service(get_openapi)
            .service(root)
            .service(healthcheck)
            .service(healthy)
            .service(ready)
            .service(policy_store_config)
    })
    .bind_auto_h2c((
        client_config.api.bind_address(),
        client_config.api.bind_port(),
    ))?
    .disable_signals()
    .shutdown_timeout(5)
    .run()
    .await?;
    Ok(())
}

/// Serve Open API documentation.
#[get("/openapi.json")]
async fn get_openapi() -> impl Responder {
    HttpResponse::Ok()
        .content_type(ContentType::json())
        .body(openapi_as_string())
}

/// Get the OpenAPI definition as a pretty JSON String.
pub fn openapi_as_string() -> String {
    #[derive(OpenApi)]
    #[openapi(
        // Use Cargo.toml as source for the "info" section
        paths(root, healthcheck, healthy, ready, policy_store_config)
    )]
    struct ApiDoc;
    ApiDoc::openapi().to_pretty_json().unwrap_or_default()
}

/// Health of the sync engine, also served at the root for probes that
/// cannot be pointed at a path.
#[utoipa::path(
    tag = "health",
    responses(
        (status = 200, description = "The engine is healthy."),
        (status = 503, description = "The engine is not healthy."),
    ),
)]
#[get("/")]
async fn root(app_state: Data<AppState>) -> impl Responder {
    health_response(app_state.engine.is_healthy())
}

/// Alias kept for probes configured against `/healthcheck`.
#[utoipa::path(
    tag = "health",
    responses(
        (status = 200, description = "The engine is healthy."),
        (status = 503, description = "The engine is not healthy."),
    ),
)]
#[get("/healthcheck")]
async fn healthcheck(app_state: Data<AppState>) -> impl Responder {
    health_response(app_state.engine.is_healthy())
}

/// 200 while the most recent policy and data writes succeeded.
#[utoipa::path(
    tag = "health",
    responses(
        (status = 200, description = "The engine is healthy."),
        (status = 503, description = "The engine is not healthy."),
    ),
)]
#[get("/healthy")]
async fn healthy(app_state: Data<AppState>) -> impl Responder {
    health_response(app_state.engine.is_healthy())
}

/// 200 once at least one policy write and one data write succeeded.
#[utoipa::path(
    tag = "health",
    responses(
        (status = 200, description = "The engine is ready."),
        (status = 503, description = "The engine is not ready."),
    ),
)]
#[get("/ready")]
async fn ready(app_state: Data<AppState>) -> impl Responder {
    health_response(app_state.engine.is_ready())
}

/// Policy store connection view, secrets redacted unless configured
/// otherwise.
#[utoipa::path(
    tag = "config",
    responses((status = 200, description = "Policy store connection view.")),
)]
#[get("/policy-store/config")]
async fn policy_store_config(app_state: Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(app_state.engine.policy_store_view())
}

/// Map a health predicate to 200/503.
fn health_response(ok: bool) -> HttpResponse {
    if ok {
        HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
    } else {
        HttpResponse::ServiceUnavailable().json(serde_json::json!({"status": "unavailable"}))
    }
}
