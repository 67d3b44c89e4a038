//! Route handlers for the inference gateway.
//!
//! ## Routes
//!
//! - `POST /infer`: admits the raw request body as a job and answers with the
//!   model's JSON payload, or with the status mapped by [`HttpError`].
//! - `GET /metrics`: the current [`MetricsSnapshot`] as pretty-printed JSON.
//! - `POST /metrics/reset`: clears the metrics window.
//! - `GET /healthz`: liveness only.
//!
//! [`MetricsSnapshot`]: infergate_core::MetricsSnapshot

use crate::server::{
    service::error::HttpError,
    telemetry::{
        decrement_requests_inflight, increment_rejections, increment_request_errors,
        increment_requests, increment_requests_inflight, record_request_duration,
    },
};
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use infergate_core::{Dispatcher, Error};
use std::{sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

/// Shared state of every route.
#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
}

/// Builds the gateway's router around `dispatcher`.
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/infer", post(infer))
        .route("/metrics", get(metrics))
        .route("/metrics/reset", post(reset_metrics))
        .route("/healthz", get(healthz))
        .layer(
            ServiceBuilder::new().layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(AppState { dispatcher })
}

async fn infer(State(state): State<AppState>, body: Bytes) -> Result<Response, HttpError> {
    let start = Instant::now();
    increment_requests();

    // axum drops this future when the client disconnects, which cancels the
    // job through the guard.
    let client = CancellationToken::new();
    let _disconnect = client.clone().drop_guard();

    let pending = state.dispatcher.enqueue(body, &client).inspect_err(|e| {
        if *e == Error::QueueFull {
            increment_rejections();
        }
    })?;

    let response = {
        let _inflight = InflightMetric::new();
        pending.wait().await
    };
    record_request_duration(start.elapsed().as_secs_f64() * 1_000.0);

    match response {
        Ok(body) => Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response()),
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::debug!("Request failed: {e}");
            increment_request_errors();
            Err(HttpError(e))
        }
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    match serde_json::to_string_pretty(&state.dispatcher.metrics().snapshot()) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn reset_metrics(State(state): State<AppState>) -> &'static str {
    state.dispatcher.metrics().reset();
    "reset\n"
}

async fn healthz() -> &'static str {
    "ok"
}

/// Keeps the `requests_inflight` instrument up for as long as a caller waits,
/// including when the handler future is dropped mid-wait.
struct InflightMetric;

impl InflightMetric {
    fn new() -> Self {
        increment_requests_inflight();
        Self
    }
}

impl Drop for InflightMetric {
    fn drop(&mut self) {
        decrement_requests_inflight();
    }
}
