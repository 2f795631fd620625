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

//! OPAL client daemon entrypoint.

use opal_client::ClientConfig;
use opal_client::SyncEngine;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;

/// Application main entrypoint.
fn main() -> ExitCode {
    let startup_ts_micros = u64::try_from(
        std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .expect("System time is apparently before unix epoch time which is highly unexpected.")
            .as_micros(),
    )
    .expect("Current epoch time in microseconds did not fit inside a 64-bit unsigned.");
    if let Err(e) = init_logger() {
        println!("Failed to initialize configuration: {e:?}");
        return ExitCode::FAILURE;
    }
    let client_config = Arc::new(ClientConfig::new("opal", startup_ts_micros));
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(run_async(client_config))
}

/// Initialize the logging system and apply filters.
fn init_logger() -> Result<(), log::SetLoggerError> {
    env_logger::builder()
        // Set default log level
        .filter_level(log::LevelFilter::Debug)
        // Customize logging for dependencies
        .filter(Some("actix_server::builder"), log::LevelFilter::Warn)
        .filter(Some("actix_http::h1"), log::LevelFilter::Info)
        .filter(Some("mio::poll"), log::LevelFilter::Info)
        .filter(Some("rustls::client"), log::LevelFilter::Info)
        .filter(Some("reqwest::connect"), log::LevelFilter::Info)
        .filter(Some("tungstenite"), log::LevelFilter::Info)
        .filter(Some("opal_client::sync"), log::LevelFilter::Debug)
        .write_style(env_logger::fmt::WriteStyle::Auto)
        .target(env_logger::fmt::Target::Stdout)
        .is_test(false)
        .parse_env(
            env_logger::Env::new()
                .filter("LOG_LEVEL")
                .write_style("LOG_STYLE"),
        )
        .try_init()
}

/// Async code entry point.
async fn run_async(client_config: Arc<ClientConfig>) -> ExitCode {
    let engine = SyncEngine::new(&client_config).await;
    let app_future = opal_client::rest_api::run_http_server(&client_config, &engine);
    let signals_future = block_until_signaled();
    let res = tokio::select! {
        res = app_future => {
            log::trace!("app_future finished");
            res
        },
        _ = signals_future => {
            log::trace!("signals_future finished");
            Ok(())
        },
    }
    .map_err(|e| log::error!("{e}"));
    engine.exit_hook().await;
    if res.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Block until SIGTERM or SIGINT is recieved.
async fn block_until_signaled() {
    let mut sigint = signal(SignalKind::interrupt()).unwrap();
    let mut sigterm = signal(SignalKind::terminate()).unwrap();
    tokio::select! {
        _ = sigterm.recv() => {
            log::debug!("SIGTERM recieved.")
        },
        _ = sigint.recv() => {
            log::debug!("SIGINT recieved.")
        },
    };
}
