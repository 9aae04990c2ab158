// Copyright 2025-Present Flexprice, Inc. https://flexprice.io/
// SPDX-License-Identifier: Apache-2.0

//! Mock HTTP intake for testing the connector end to end.
//!
//! Responses can be scripted per request (e.g. `[500, 500, 200]`), an
//! artificial handling delay can be injected, and the server tracks how many
//! requests it was handling at once so tests can assert the in-flight bound.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

#[derive(Clone, Debug)]
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parses the body as a JSON array and returns its length.
    pub fn event_count(&self) -> usize {
        serde_json::from_slice::<Vec<serde_json::Value>>(&self.body)
            .map(|events| events.len())
            .unwrap_or(0)
    }
}

#[derive(Default)]
struct ServerState {
    received: Mutex<Vec<ReceivedRequest>>,
    /// Status codes to return, consumed one per request; empty = 200.
    script: Mutex<VecDeque<u16>>,
    delay: Mutex<Option<Duration>>,
    current_in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Clone)]
pub struct MockServer {
    pub addr: SocketAddr,
    state: Arc<ServerState>,
}

impl MockServer {
    /// Start a mock HTTP server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let state = Arc::new(ServerState::default());
        let accept_state = state.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };

                let io = TokioIo::new(stream);
                let state = accept_state.clone();

                tokio::spawn(async move {
                    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let state = state.clone();
                        async move { handle_request(state, req).await }
                    });

                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        MockServer { addr, state }
    }

    /// Get the base URL of the mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queue status codes to return, one per request, in order.
    pub fn script_statuses(&self, statuses: &[u16]) {
        self.state
            .script
            .lock()
            .unwrap()
            .extend(statuses.iter().copied());
    }

    /// Delay every response by the given duration.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = Some(delay);
    }

    /// Get all received requests
    pub fn get_requests(&self) -> Vec<ReceivedRequest> {
        self.state.received.lock().unwrap().clone()
    }

    /// Get requests matching a path
    #[allow(dead_code)]
    pub fn get_requests_for_path(&self, path: &str) -> Vec<ReceivedRequest> {
        self.state
            .received
            .lock()
            .unwrap()
            .iter()
            .filter(|req| req.path == path)
            .cloned()
            .collect()
    }

    /// Highest number of requests handled concurrently so far.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` requests have arrived, or panic after a
    /// couple of seconds.
    #[allow(dead_code)]
    pub async fn wait_for_requests(&self, count: usize) {
        for _ in 0..200 {
            if self.state.received.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "mock server received {} of {count} expected requests",
            self.state.received.lock().unwrap().len()
        );
    }
}

async fn handle_request(
    state: Arc<ServerState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    let in_flight = state.current_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

    // Capture the request
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();

    let body = req
        .into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes().to_vec())
        .unwrap_or_default();

    let delay = *state.delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let status = state
        .script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(200);

    state.received.lock().unwrap().push(ReceivedRequest {
        method,
        path,
        headers,
        body,
    });

    state.current_in_flight.fetch_sub(1, Ordering::SeqCst);

    let body = if (200..300).contains(&status) {
        r#"{"ok":true}"#
    } else {
        r#"{"error":"scripted failure"}"#
    };
    Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK))
        .body(Full::new(Bytes::from(body)))
}
