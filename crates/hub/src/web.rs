use anyhow::{Context, Result};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::engine::SimulationEngine;
use crate::scenario::{ApplyOutcome, ScenarioUpdate};

const DEFAULT_WINDOW_SECS: f64 = 600.0;

type AppState = Arc<SimulationEngine>;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(engine: AppState) -> Router {
    Router::new()
        .route("/api/samples", get(api_samples))
        .route("/api/status", get(api_status))
        .route("/api/scenario", post(api_scenario))
        .route("/api/start", post(api_start))
        .route("/api/stop", post(api_stop))
        .route("/api/reset", post(api_reset))
        .with_state(engine)
}

/// `?window=<secs>` (default 600) or `?last=<n>`; `last` wins when both
/// are given.
#[derive(Debug, Deserialize)]
struct SamplesQuery {
    window: Option<f64>,
    last: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct Running {
    running: bool,
}

async fn api_samples(
    State(engine): State<AppState>,
    query: Result<Query<SamplesQuery>, QueryRejection>,
) -> Response {
    let q = match query {
        Ok(Query(q)) => q,
        Err(rejection) => {
            let body = ErrorBody {
                error: rejection.body_text(),
            };
            return (rejection.status(), Json(body)).into_response();
        }
    };
    let samples = match q.last {
        Some(n) => engine.tail(n).await,
        None => {
            let window = q.window.unwrap_or(DEFAULT_WINDOW_SECS);
            engine.recent_samples(window).await
        }
    };
    Json(samples).into_response()
}

async fn api_status(State(engine): State<AppState>) -> impl IntoResponse {
    Json(engine.status().await)
}

async fn api_scenario(
    State(engine): State<AppState>,
    body: Result<Json<ScenarioUpdate>, JsonRejection>,
) -> Response {
    let update = match body {
        Ok(Json(update)) => update,
        Err(rejection) => {
            let outcome = ApplyOutcome {
                ok: false,
                applied: Vec::new(),
                rejected: Vec::new(),
                error: Some(rejection.body_text()),
            };
            return (rejection.status(), Json(outcome)).into_response();
        }
    };

    let outcome = engine.apply_scenario(&update).await;
    let status = if outcome.ok {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(outcome)).into_response()
}

async fn api_start(State(engine): State<AppState>) -> impl IntoResponse {
    engine.start().await;
    Json(Running {
        running: engine.is_running(),
    })
}

async fn api_stop(State(engine): State<AppState>) -> impl IntoResponse {
    engine.stop().await;
    Json(Running {
        running: engine.is_running(),
    })
}

async fn api_reset(State(engine): State<AppState>) -> impl IntoResponse {
    engine.reset().await;
    Json(Running {
        running: engine.is_running(),
    })
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(engine: AppState) -> Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    tracing::info!(%addr, "http api listening");

    axum::serve(listener, router(engine))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
