// Copyright 2025-Present Flexprice, Inc. https://flexprice.io/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use flexprice_agent::server::AgentServer;
use flexprice_connector::{ConnectorConfig, UsageConnector};

const DEFAULT_AGENT_PORT: u16 = 8686;
const MAX_REQUEST_CONTENT_LENGTH: usize = 10 * 1024 * 1024; // 10MB in Bytes

#[tokio::main]
pub async fn main() {
    let log_level = env::var("FLEXPRICE_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match ConnectorConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Error creating config on agent startup: {e}");
            return;
        }
    };

    let port: u16 = env::var("FLEXPRICE_AGENT_PORT")
        .ok()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(DEFAULT_AGENT_PORT);

    let handle = match UsageConnector::start(config) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Error starting usage connector: {e}");
            return;
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind agent port {port}: {e}");
            return;
        }
    };
    info!("agent: listening on port {port}");

    let cancel = CancellationToken::new();
    let server = AgentServer {
        handle: handle.clone(),
        max_request_content_length: MAX_REQUEST_CONTENT_LENGTH,
    };
    let server_cancel = cancel.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.serve(listener, server_cancel).await {
            error!("Agent server error: {e:?}");
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining connector");

    // Stop taking ingest requests first so the drain is not racing new events.
    cancel.cancel();
    if let Err(e) = handle.close().await {
        error!("Error draining connector: {e}");
    }
    let _ = server_task.await;
    info!("agent stopped");
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            return;
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}
