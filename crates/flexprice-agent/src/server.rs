// Copyright 2025-Present Flexprice, Inc. https://flexprice.io/
// SPDX-License-Identifier: Apache-2.0

//! HTTP surface of the agent.
//!
//! The host pipeline pushes batches of transformed events to
//! `POST /v1/ingest` and gets back 202 once they are buffered into the
//! connector; the connector's own batching, retries, and dead-lettering take
//! it from there. `GET /health` and `GET /metrics` exist for probes and
//! scrapers.

use std::io;
use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::service::service_fn;
use hyper::{http, Method, Response, StatusCode};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use flexprice_connector::{ConnectorError, ConnectorHandle, UsageEvent, CONNECTOR_VERSION};

use crate::http_utils::{
    body_from, log_and_create_http_response, verify_request_content_length, Body,
};

pub const INGEST_ENDPOINT_PATH: &str = "/v1/ingest";
pub const HEALTH_ENDPOINT_PATH: &str = "/health";
pub const METRICS_ENDPOINT_PATH: &str = "/metrics";

pub struct AgentServer {
    pub handle: ConnectorHandle,
    pub max_request_content_length: usize,
}

impl AgentServer {
    /// Accept loop. Runs until the cancellation token fires or the listener
    /// fails with a non-transient error.
    pub async fn serve(
        self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let state = Arc::new(self);
        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                _ = cancel.cancelled() => break,
                conn_res = listener.accept() => match conn_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        // Don't kill the server on a handler panic.
                        error!("Connection handler panicked: {e:?}");
                        continue;
                    }
                    Ok(()) | Err(_) => continue,
                },
            };

            let io = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let state = Arc::clone(&state);
            joinset.spawn(async move {
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { state.route(req).await }
                });
                if let Err(e) = server.serve_connection(io, service).await {
                    debug!("Connection error: {e}");
                }
            });
        }

        debug!("agent server stopped");
        Ok(())
    }

    async fn route(
        &self,
        req: hyper::Request<hyper::body::Incoming>,
    ) -> http::Result<Response<Body>> {
        match (req.method(), req.uri().path()) {
            (&Method::POST, INGEST_ENDPOINT_PATH) => self.ingest_handler(req).await,
            (_, HEALTH_ENDPOINT_PATH) => self.health_handler(),
            (_, METRICS_ENDPOINT_PATH) => self.metrics_handler(),
            _ => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(body_from("")),
        }
    }

    /// Accepts a JSON array of events from the host pipeline.
    ///
    /// The whole payload is validated before anything is buffered, so a 400
    /// means none of its events entered the pipeline. A 202 means every
    /// event is buffered; `add` blocks under backpressure, so a saturated
    /// connector slows this endpoint down rather than dropping data.
    async fn ingest_handler(
        &self,
        req: hyper::Request<hyper::body::Incoming>,
    ) -> http::Result<Response<Body>> {
        let (parts, body) = req.into_parts();
        if let Some(response) = verify_request_content_length(
            &parts.headers,
            self.max_request_content_length,
            "Error processing ingest request",
        ) {
            return response;
        }

        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Error reading ingest request body: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        let events: Vec<UsageEvent> = match serde_json::from_slice(&body_bytes) {
            Ok(events) => events,
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Error parsing ingest payload: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        for (index, event) in events.iter().enumerate() {
            if let Err(e) = event.validate() {
                return log_and_create_http_response(
                    &format!("Rejected event at index {index}: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        }

        let accepted = events.len();
        for event in events {
            match self.handle.add(event).await {
                Ok(()) => {}
                Err(ConnectorError::Closed) => {
                    return log_and_create_http_response(
                        "Connector is draining, not accepting events",
                        StatusCode::SERVICE_UNAVAILABLE,
                    );
                }
                Err(e) => {
                    return log_and_create_http_response(
                        &format!("Unrecoverable delivery failure: {e}"),
                        StatusCode::INTERNAL_SERVER_ERROR,
                    );
                }
            }
        }

        debug!("Buffered {accepted} events from ingest request");
        let body = json!({ "accepted": accepted }).to_string();
        Response::builder()
            .status(StatusCode::ACCEPTED)
            .body(body_from(body))
    }

    fn health_handler(&self) -> http::Result<Response<Body>> {
        let response_json = json!({
            "status": "ok",
            "version": CONNECTOR_VERSION,
            "endpoints": [
                INGEST_ENDPOINT_PATH,
                HEALTH_ENDPOINT_PATH,
                METRICS_ENDPOINT_PATH
            ]
        });
        Response::builder()
            .status(200)
            .body(body_from(response_json.to_string()))
    }

    fn metrics_handler(&self) -> http::Result<Response<Body>> {
        match serde_json::to_string(&self.handle.metrics()) {
            Ok(body) => Response::builder().status(200).body(body_from(body)),
            Err(e) => log_and_create_http_response(
                &format!("Error serializing metrics: {e}"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        }
    }
}
