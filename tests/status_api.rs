// HTTP-level tests for the status router, exercised with
// tower::ServiceExt::oneshot instead of a socket.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use chrono::Utc;
use jobmonitor::dedup::{DedupStore, SqliteDedupStore};
use jobmonitor::models::listing::SourceId;
use jobmonitor::monitor::{Monitor, StatusHandle};
use jobmonitor::notify::NotificationDispatcher;
use jobmonitor::runner::RunnerState;
use jobmonitor::routes::{self, AppState};
use serde_json::Value;
use tower::ServiceExt as _;

use common::{RecordingSurface, ScriptedAdapter, listing, remove_db, settings, temp_db_path};

const BODY_LIMIT: usize = 1024 * 1024;

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let json = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, json)
}

async fn wait_for_first_cycle(status: &StatusHandle, source: SourceId) {
    for _ in 0..200 {
        if status
            .source(source)
            .await
            .is_some_and(|s| s.cycles >= 1 && s.state == RunnerState::Sleeping)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{source} never completed a cycle");
}

#[tokio::test]
async fn status_and_seen_endpoints() {
    let path = temp_db_path();
    let store = Arc::new(SqliteDedupStore::open(&path).await.unwrap());
    store
        .mark_seen(SourceId::Jobright, "old", Utc::now() - chrono::Duration::days(1))
        .await
        .unwrap();

    let monitor = Monitor::spawn(
        settings(3600),
        vec![Box::new(ScriptedAdapter::steady(
            SourceId::Github,
            vec![listing(SourceId::Github, "abc")],
        ))],
        store.clone(),
        NotificationDispatcher::new(Arc::new(RecordingSurface::default())),
    );
    let status = monitor.status();
    wait_for_first_cycle(&status, SourceId::Github).await;

    let app = routes::router(AppState {
        status: status.clone(),
        pool: store.pool().clone(),
    });

    let (code, body) = get(&app, "/healthz").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, Value::String("ok".to_string()));

    let (code, body) = get(&app, "/status").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["running"], true);
    assert_eq!(body["sources"][0]["source"], "github");
    assert_eq!(body["sources"][0]["cycles"], 1);
    assert_eq!(body["sources"][0]["listings_notified"], 1);
    assert_eq!(body["sources"][0]["state"], "sleeping");

    let (code, body) = get(&app, "/seen?limit=1").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["listings"].as_array().unwrap().len(), 1);
    assert_eq!(body["listings"][0]["external_id"], "abc");

    let (code, body) = get(&app, "/seen?source=jobright").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["listings"].as_array().unwrap().len(), 1);
    assert_eq!(body["listings"][0]["external_id"], "old");

    let (code, body) = get(&app, "/seen?source=monster").await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("monster"));

    let (code, body) = get(&app, "/seen/github/abc").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["source"], "github");

    let (code, _) = get(&app, "/seen/github/nope").await;
    assert_eq!(code, StatusCode::NOT_FOUND);

    monitor.stop(Duration::from_secs(5)).await;
    let (code, body) = get(&app, "/healthz").await;
    assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "monitor is stopped");

    store.close().await;
    remove_db(&path);
}
