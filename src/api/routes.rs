//! API route definitions.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::ApiError;
use super::state::AppState;
use crate::display;
use crate::sampler::chart;
use crate::storage::history_stats;

const CHART_WIDTH: f64 = 600.0;
const CHART_HEIGHT: f64 = 200.0;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/test/state", get(test_state))
        .route("/test/start", post(test_start))
        .route("/test/stop", post(test_stop))
        .route("/test/samples", get(test_samples))
        .route("/test/chart.svg", get(test_chart_svg))
        .route("/network", get(network))
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/sign-in", post(sign_in))
        .route("/auth/sign-out", post(sign_out))
        .route("/auth/me", get(me))
        .route("/results", get(results))
        .route("/results/stats", get(results_stats))
        .route("/notifications/recent", get(recent_notifications))
}

fn envelope<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({
        "data": data,
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn health() -> Json<Value> {
    envelope(json!({ "status": "ok" }))
}

async fn test_state(State(app): State<AppState>) -> Json<Value> {
    let state = app.dashboard.state();
    envelope(json!({
        "panel": display::stats_panel(&state),
        "meter": display::meter(&state),
        "state": state,
    }))
}

async fn test_start(State(app): State<AppState>) -> Result<(StatusCode, Json<Value>), ApiError> {
    if !app.dashboard.start_run() {
        return Err(ApiError::RunActive);
    }
    Ok((StatusCode::ACCEPTED, envelope(app.dashboard.state())))
}

async fn test_stop(State(app): State<AppState>) -> Result<Json<Value>, ApiError> {
    if !app.dashboard.stop_run() {
        return Err(ApiError::NotRunning);
    }
    Ok(envelope(json!({ "stopping": true })))
}

async fn test_samples(State(app): State<AppState>) -> Json<Value> {
    let samples = app.dashboard.samples();
    let series = chart::project(&samples, CHART_WIDTH, CHART_HEIGHT);
    envelope(json!({
        "capacity": app.dashboard.sample_capacity(),
        "samples": samples,
        "chart": series,
    }))
}

#[derive(Debug, Deserialize)]
struct ChartQuery {
    width: Option<f64>,
    height: Option<f64>,
}

async fn test_chart_svg(State(app): State<AppState>, Query(q): Query<ChartQuery>) -> impl IntoResponse {
    let width = q.width.filter(|w| *w > 0.0).unwrap_or(CHART_WIDTH);
    let height = q.height.filter(|h| *h > 0.0).unwrap_or(CHART_HEIGHT);
    let svg = chart::render_svg(&app.dashboard.samples(), width, height);
    ([(header::CONTENT_TYPE, "image/svg+xml")], svg)
}

async fn network(State(app): State<AppState>) -> Json<Value> {
    envelope(json!({
        "view": app.dashboard.network(),
        "capability": app.dashboard.capability(),
    }))
}

#[derive(Debug, Deserialize)]
struct SignUpRequest {
    email: String,
    password: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct SignInRequest {
    email: String,
    password: String,
}

async fn sign_up(State(app): State<AppState>, Json(req): Json<SignUpRequest>) -> Result<(StatusCode, Json<Value>), ApiError> {
    let user = app
        .dashboard
        .sign_up(&req.email, &req.password, &req.display_name)
        .await?;
    Ok((StatusCode::CREATED, envelope(user)))
}

async fn sign_in(State(app): State<AppState>, Json(req): Json<SignInRequest>) -> Result<Json<Value>, ApiError> {
    let user = app.dashboard.sign_in(&req.email, &req.password).await?;
    Ok(envelope(user))
}

async fn sign_out(State(app): State<AppState>) -> Result<Json<Value>, ApiError> {
    app.dashboard.sign_out().await?;
    Ok(envelope(json!({ "signed_out": true })))
}

async fn me(State(app): State<AppState>) -> Json<Value> {
    envelope(app.dashboard.current_user())
}

async fn results(State(app): State<AppState>) -> Result<Json<Value>, ApiError> {
    let results = app.dashboard.load_history().await?;
    let total = results.len();
    Ok(Json(json!({ "data": results, "meta": { "total": total } })))
}

async fn results_stats(State(app): State<AppState>) -> Result<Json<Value>, ApiError> {
    let results = app.dashboard.load_history().await?;
    Ok(envelope(history_stats(&results)))
}

async fn recent_notifications(State(app): State<AppState>) -> Json<Value> {
    let recent = app.notifications.recent();
    let total = recent.len();
    Json(json!({ "data": recent, "meta": { "total": total } }))
}
