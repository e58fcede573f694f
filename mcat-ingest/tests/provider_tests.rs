//! Metadata provider client tests against a local HTTP stub

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use mcat_ingest::services::{FetchError, MetadataSource, TitleQuery, TmdbClient, TmdbConfig};
use mcat_ingest::utils::{retry, Classify, ErrorClass, RetryPolicy};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
struct Stub {
    calls: Arc<AtomicUsize>,
    /// Statuses returned for the first calls, then 200
    script: Arc<Vec<u16>>,
}

async fn search(State(stub): State<Stub>, Query(params): Query<HashMap<String, String>>) -> Response {
    let call = stub.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(code) = stub.script.get(call) {
        let status = StatusCode::from_u16(*code).unwrap();
        return (status, "scripted failure").into_response();
    }

    if params.get("api_key").map(String::as_str) != Some("test-key") {
        return (StatusCode::UNAUTHORIZED, "bad key").into_response();
    }

    let results = match (params.get("query").map(String::as_str), params.get("year").map(String::as_str)) {
        (Some("The Matrix"), Some("1999")) => json!([{
            "id": 603,
            "title": "The Matrix",
            "release_date": "1999-03-30",
            "overview": "A hacker learns the truth.",
            "vote_average": 8.2,
            "genre_ids": [28, 878]
        }]),
        _ => json!([]),
    };
    Json(json!({ "page": 1, "results": results })).into_response()
}

async fn start_stub(script: Vec<u16>) -> (String, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let stub = Stub {
        calls: Arc::clone(&calls),
        script: Arc::new(script),
    };
    let app = Router::new()
        .route("/3/search/movie", get(search))
        .with_state(stub);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/3", addr), calls)
}

fn client(base_url: String, api_key: &str) -> TmdbClient {
    TmdbClient::new(TmdbConfig {
        base_url,
        api_key: api_key.to_string(),
        requests_per_second: 50,
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn matrix() -> TitleQuery {
    TitleQuery {
        title: "The Matrix".to_string(),
        year: Some(1999),
    }
}

#[tokio::test]
async fn lookup_returns_first_hit() {
    let (base_url, calls) = start_stub(vec![]).await;
    let client = client(base_url, "test-key");

    let meta = client.lookup(&matrix()).await.unwrap();

    assert_eq!(meta.title, "The Matrix");
    assert_eq!(meta.year, Some(1999));
    assert_eq!(meta.provider_id.as_deref(), Some("603"));
    assert_eq!(meta.genres, vec!["Action", "Science Fiction"]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_title_is_permanent_not_found() {
    let (base_url, _calls) = start_stub(vec![]).await;
    let client = client(base_url, "test-key");

    let err = client
        .lookup(&TitleQuery {
            title: "No Such Film".to_string(),
            year: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::NotFound(_)));
    assert_eq!(err.class(), ErrorClass::Permanent);
}

#[tokio::test]
async fn bad_key_is_not_retried() {
    let (base_url, calls) = start_stub(vec![]).await;
    let client = client(base_url, "wrong-key");
    let policy = RetryPolicy::new(3, Duration::from_millis(10));
    let query = matrix();

    let err = retry("metadata lookup", &policy, || client.lookup(&query))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Unauthorized(401)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rate_limit_and_server_errors_are_retried() {
    let (base_url, calls) = start_stub(vec![429, 503]).await;
    let client = client(base_url, "test-key");
    let policy = RetryPolicy::new(3, Duration::from_millis(10));
    let query = matrix();

    let meta = retry("metadata lookup", &policy, || client.lookup(&query))
        .await
        .unwrap();

    assert_eq!(meta.title, "The Matrix");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn unreachable_provider_is_transient() {
    // Nothing listens on port 1
    let client = client("http://127.0.0.1:1/3".to_string(), "test-key");

    let err = client.lookup(&matrix()).await.unwrap_err();

    assert!(matches!(err, FetchError::Network { .. }));
    assert_eq!(err.class(), ErrorClass::Transient);
}
