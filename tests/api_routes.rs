//! HTTP surface exercised in-process with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use speedboard::api::{self, state::AppState};
use speedboard::config::{Config, PhaseTiming};
use speedboard::dashboard::{Dashboard, DashboardDeps};
use speedboard::notify::BroadcastNotifier;
use speedboard::sequencer::metrics::{FixedMetrics, MetricSource};
use speedboard::session::LocalSessions;
use speedboard::storage::{open_pool, SqliteResultStore};

struct TestApp {
    _dir: tempfile::TempDir,
    router: Router,
    dashboard: Dashboard,
}

fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let pool = open_pool(dir.path().join("api.db")).unwrap();

    let mut config = Config::default();
    config.sequencer.ping = PhaseTiming { steps: 2, delay_ms: 10 };
    config.sequencer.download = PhaseTiming { steps: 4, delay_ms: 10 };
    config.sequencer.upload = PhaseTiming { steps: 4, delay_ms: 10 };

    let notifications = BroadcastNotifier::new(10);
    let mut deps = DashboardDeps::new(
        config,
        Arc::new(LocalSessions::new(pool.clone())),
        Arc::new(SqliteResultStore::new(pool)),
        Arc::new(notifications.clone()),
    );
    deps.metrics = Arc::new(|| {
        Box::new(FixedMetrics {
            ping: 12.0,
            jitter: 1.5,
            download: 200.0,
            upload: 50.0,
        }) as Box<dyn MetricSource>
    });
    let dashboard = Dashboard::new(deps);
    let router = api::router(AppState {
        dashboard: dashboard.clone(),
        notifications,
    });

    TestApp {
        _dir: dir,
        router,
        dashboard,
    }
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health_and_idle_state() {
    let app = test_app();

    let (status, body) = call(&app.router, "GET", "/api/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
    assert!(body["meta"]["version"].is_string());

    let (status, body) = call(&app.router, "GET", "/api/v1/test/state", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"]["phase"], "idle");
    assert_eq!(body["data"]["state"]["is_running"], false);
    assert_eq!(body["data"]["panel"]["latency"], "—");
    assert_eq!(body["data"]["panel"]["ratio"], "0.0:1");

    let (status, _) = call(&app.router, "GET", "/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_start_twice_conflicts_and_stop_when_idle_conflicts() {
    let app = test_app();

    let (status, _) = call(&app.router, "POST", "/api/v1/test/stop", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(&app.router, "POST", "/api/v1/test/start", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["phase"], "ping");
    assert_eq!(body["data"]["is_running"], true);

    let (status, body) = call(&app.router, "POST", "/api/v1/test/start", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "A test is already running");

    app.dashboard.wait_idle().await;
    let (_, body) = call(&app.router, "GET", "/api/v1/test/state", None).await;
    assert_eq!(body["data"]["state"]["phase"], "complete");
    assert_eq!(body["data"]["state"]["progress"], 100.0);
    assert_eq!(body["data"]["panel"]["ratio"], "4.0:1");
}

#[tokio::test]
async fn test_results_require_sign_in() {
    let app = test_app();

    let (status, body) = call(&app.router, "GET", "/api/v1/results", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Please sign in to view your test results.");

    let (status, _) = call(&app.router, "POST", "/api/v1/auth/sign-out", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signed_in_run_is_listed_in_results() {
    let app = test_app();

    let (status, body) = call(
        &app.router,
        "POST",
        "/api/v1/auth/sign-up",
        Some(json!({ "email": "Api@Example.com", "password": "secret99", "display_name": "Api" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["email"], "api@example.com");

    let (status, _) = call(
        &app.router,
        "POST",
        "/api/v1/auth/sign-up",
        Some(json!({ "email": "api@example.com", "password": "secret99" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = call(&app.router, "GET", "/api/v1/auth/me", None).await;
    assert_eq!(body["data"]["display_name"], "Api");

    let (status, _) = call(&app.router, "POST", "/api/v1/test/start", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    app.dashboard.wait_idle().await;

    let (status, body) = call(&app.router, "GET", "/api/v1/results", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], 1);
    assert_eq!(body["data"][0]["download_speed"], 200.0);
    assert_eq!(body["data"][0]["server_location"], "San Francisco, CA");

    let (_, body) = call(&app.router, "GET", "/api/v1/results/stats", None).await;
    assert_eq!(body["data"]["total_tests"], 1);
    assert_eq!(body["data"]["max_upload"], 50.0);

    let (_, body) = call(&app.router, "GET", "/api/v1/notifications/recent", None).await;
    let titles: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|n| n["title"].as_str())
        .collect();
    assert!(titles.contains(&"Account created!"));
    assert!(titles.contains(&"Test Saved"));
}

#[tokio::test]
async fn test_bad_credentials_and_weak_password() {
    let app = test_app();

    let (status, _) = call(
        &app.router,
        "POST",
        "/api/v1/auth/sign-up",
        Some(json!({ "email": "weak@example.com", "password": "123" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = call(
        &app.router,
        "POST",
        "/api/v1/auth/sign-in",
        Some(json!({ "email": "ghost@example.com", "password": "whatever" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid login credentials");
}

#[tokio::test]
async fn test_samples_and_chart_svg() {
    let app = test_app();

    let (status, body) = call(&app.router, "GET", "/api/v1/test/samples", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["capacity"], 20);
    assert_eq!(body["data"]["samples"], json!([]));

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/test/chart.svg?width=300&height=100")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/svg+xml");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let svg = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(svg.starts_with("<svg"));
}

#[tokio::test]
async fn test_network_view_defaults_to_placeholders() {
    let app = test_app();
    let (status, body) = call(&app.router, "GET", "/api/v1/network", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["view"]["ip"], "—");
    assert_eq!(body["data"]["view"]["connection"], "Unknown");
}
