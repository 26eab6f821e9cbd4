/**
 * CONTROL API - HTTP surface of the aggregator
 *
 * ROLE :
 * Thin callers into the engine for dashboards, scripts and operators.
 *
 * ROUTES :
 * - GET  /health           : liveness, always open
 * - GET  /system/health    : uptime, broker status, pause flag
 * - GET  /get_best_node    : current optimum
 * - POST /pause, /resume   : ingestion control
 * - GET  /nodes            : latest report per node
 * - GET  /diagnostics      : latency / throughput windows and counters
 * - GET  /selection        : criterion + weights
 * - PUT  /selection        : replace criterion + weights
 *
 * SECURITY :
 * - When FLEET_API_KEY is set, every route except /health* needs the
 *   x-api-key header. Without it the API is open.
 */

use crate::engine::{Diagnostics, Engine, SelectionConfig};
use crate::health::{HealthTracker, KernelHealth};
use crate::models::{BestNodeState, MetricReport};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::warn;

pub const API_KEY_ENV: &str = "FLEET_API_KEY";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub health_tracker: HealthTracker,
    /// Expected x-api-key, `None` leaves the API open.
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, health_tracker: HealthTracker) -> Self {
        let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        Self {
            engine,
            health_tracker,
            api_key,
        }
    }
}

#[derive(Debug, Serialize)]
struct BestNodeView {
    best_node: Option<String>,
    /// `null` while no node has been selected.
    optimal_value: Option<f64>,
    last_updated: Option<String>,
}

fn to_rfc3339(unix_secs: f64) -> Option<String> {
    let nanos = (unix_secs * 1e9) as i128;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()?
        .format(&Rfc3339)
        .ok()
}

fn to_view(best: &BestNodeState) -> BestNodeView {
    BestNodeView {
        best_node: best.node_id.clone(),
        optimal_value: best.node_id.as_ref().map(|_| best.score),
        last_updated: best.last_updated.and_then(to_rfc3339),
    }
}

#[derive(Debug, Serialize)]
struct MessageView {
    message: &'static str,
}

async fn require_api_key(
    State(app): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = app.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };
    if req.uri().path().starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!(path = %req.uri().path(), "rejected request without valid api key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/get_best_node", get(get_best_node))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/nodes", get(get_nodes))
        .route("/diagnostics", get(get_diagnostics))
        .route("/selection", get(get_selection).put(put_selection))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(&app.engine))
}

// GET /get_best_node
async fn get_best_node(State(app): State<AppState>) -> Json<BestNodeView> {
    Json(to_view(&app.engine.best_node()))
}

// POST /pause
async fn pause(State(app): State<AppState>) -> Json<MessageView> {
    app.engine.pause();
    Json(MessageView { message: "Listener paused" })
}

// POST /resume
async fn resume(State(app): State<AppState>) -> Json<MessageView> {
    app.engine.resume();
    Json(MessageView { message: "Listener resumed" })
}

// GET /nodes
async fn get_nodes(State(app): State<AppState>) -> Json<Vec<MetricReport>> {
    Json(app.engine.nodes())
}

// GET /diagnostics
async fn get_diagnostics(State(app): State<AppState>) -> Json<Diagnostics> {
    Json(app.engine.diagnostics())
}

// GET /selection
async fn get_selection(State(app): State<AppState>) -> Json<SelectionConfig> {
    Json(app.engine.selection())
}

// PUT /selection
async fn put_selection(
    State(app): State<AppState>,
    Json(selection): Json<SelectionConfig>,
) -> Result<Json<SelectionConfig>, (StatusCode, Json<serde_json::Value>)> {
    match app.engine.set_selection(selection) {
        Ok(()) => Ok(Json(app.engine.selection())),
        Err(e) => Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e.to_string() })),
        )),
    }
}
