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

//! REST API server and resources.
//!
//! API types:
//!
//! 1. REST resources for bundles, data updates, token minting, webhooks,
//!    statistics and scopes.
//! 2. Actorless WebSocket duplex channel (the PubSub Hub endpoint).

mod http_resources {
    //! API resources

    pub mod data_update_resource;
    pub mod policy_bundle_resource;
    pub mod scope_resource;
    pub mod stats_resource;
    pub mod token_resource;
    pub mod webhook_resource;
}
mod common {
    //! Common REST API resources and utils.

    mod api_error_mapper;
    mod peer_authentication;

    pub use api_error_mapper::*;
    pub use peer_authentication::*;
}
mod ws_resources {
    //! WebSocket resources.

    pub mod ws_pubsub_resource;
}

use actix_web::App;
use actix_web::HttpResponse;
use actix_web::HttpServer;
use actix_web::Responder;
use actix_web::get;
use actix_web::http::header::ContentType;
use actix_web::web;
use opal_core::ServerConfig;
use opal_core::SyncServer;
use std::sync::Arc;
use utoipa::OpenApi;

/// Number of parallel requests that can be served for each assigned CPU
/// core.
const WORKERS_PER_CORE: usize = 1024;

/// Shared state between requests.
#[derive(Clone)]
struct AppState {
    srv: Arc<SyncServer>,
}

/// Run HTTP server.
pub async fn run_http_server(
    server_config: &Arc<ServerConfig>,
    srv: &Arc<SyncServer>,
) -> Result<(), Box<dyn core::error::Error>> {
    let server_config = Arc::clone(server_config);
    let workers = std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1);
    let max_connections = WORKERS_PER_CORE * workers;
    log::info!(
        "API described by http://{}:{}/openapi.json allows {max_connections} concurrent connections.",
        &server_config.api.bind_address(),
        &server_config.api.bind_port(),
    );
    let app_state: AppState = AppState {
        srv: Arc::clone(srv),
    };
    let app_data = web::Data::<AppState>::new(app_state);

    HttpServer::new(move || {
        App::new()
            .app_data(app_data.clone())
            .service(get_openapi)
            .service(root)
            .service(healthcheck)
            .service(http_resources::token_resource::mint_token)
            .service(http_resources::policy_bundle_resource::policy_bundle)
            .service(http_resources::webhook_resource::webhook)
            .service(http_resources::data_update_resource::post_data_config)
            .service(http_resources::data_update_resource::post_data_update)
            .service(http_resources::data_update_resource::get_data_config)
            .service(http_resources::stats_resource::stats)
            .service(http_resources::stats_resource::statistics)
            .service(http_resources::scope_resource::put_scope)
            .service(http_resources::scope_resource::get_scopes)
            .service(http_resources::scope_resource::delete_scope)
            .service(ws_resources::ws_pubsub_resource::pubsub_channel)
    })
    .workers(workers)
    .backlog(u32::try_from(max_connections / 2).unwrap()) // Default is 2048
    .worker_max_blocking_threads(max_connections)
    .max_connections(max_connections)
    .bind_auto_h2c((
        server_config.api.bind_address(),
        server_config.api.bind_port(),
    ))?
    .disable_signals()
    .shutdown_timeout(5) // Default 30
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
        paths(
            root,
            healthcheck,
            http_resources::token_resource::mint_token,
            http_resources::policy_bundle_resource::policy_bundle,
            http_resources::webhook_resource::webhook,
            http_resources::data_update_resource::post_data_config,
            http_resources::data_update_resource::post_data_update,
            http_resources::data_update_resource::get_data_config,
            http_resources::stats_resource::stats,
            http_resources::stats_resource::statistics,
            http_resources::scope_resource::put_scope,
            http_resources::scope_resource::get_scopes,
            http_resources::scope_resource::delete_scope,
            ws_resources::ws_pubsub_resource::pubsub_channel,
        )
    )]
    struct ApiDoc;
    ApiDoc::openapi().to_pretty_json().unwrap_or_default()
}

/// Liveness of the server process.
#[utoipa::path(
    tag = "health",
    responses((status = 200, description = "The server is up.")),
)]
#[get("/")]
async fn root() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}

/// Readiness of the server: the policy source serves a revision.
#[utoipa::path(
    tag = "health",
    responses((status = 200, description = "The server is up.")),
)]
#[get("/healthcheck")]
async fn healthcheck(app_state: web::Data<AppState>) -> impl Responder {
    if app_state.srv.is_health_ready() {
        HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
    } else {
        HttpResponse::Ok().json(serde_json::json!({"status": "starting"}))
    }
}
