//! HTTP Backend Integration Tests
//!
//! Runs `HttpBackend` against an in-process axum server bound to an
//! ephemeral port.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use bucketlens::backend::error::PERMISSION_WARNING_CODE;
use bucketlens::{
    AnalysisBackend, AnalysisOrchestrator, AnalysisSession, BackendError, CaseId, HttpBackend,
    RefreshOutcome, SystemModel,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOKEN: &str = "test-token";

#[derive(Clone, Default)]
struct Captured {
    analyses: Arc<Mutex<Vec<Value>>>,
    auth: Arc<Mutex<Vec<Option<String>>>>,
    output_queries: Arc<Mutex<Vec<String>>>,
}

fn record_auth(state: &Captured, headers: &HeaderMap) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    state.auth.lock().unwrap().push(auth);
}

async fn analyses(
    State(state): State<Captured>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    record_auth(&state, &headers);
    state.analyses.lock().unwrap().push(body.clone());

    if body["system_ids"] == "broken" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error_code": -1, "detail": "analysis failed"})),
        );
    }

    let analysis = json!({
        "analysis_results": [{
            "cls_name": "BucketAnalysisResult",
            "name": "length",
            "description": "sentence length",
            "method": "continuous",
            "bucket_performances": [
                {"bucket_name": [0, 5], "n_samples": 2, "bucket_samples": [2, 1],
                 "performances": [{"metric_name": "F1", "value": 0.5}]},
                {"bucket_name": [5, 10], "n_samples": 1, "bucket_samples": [3],
                 "performances": [{"metric_name": "F1", "value": 0.75}]}
            ]
        }]
    });
    let ids = body["system_ids"].as_str().unwrap_or_default();
    let single: serde_json::Map<String, Value> = ids
        .split(',')
        .map(|id| (id.to_string(), analysis.clone()))
        .collect();
    (
        StatusCode::OK,
        Json(json!({"single_analyses": single, "system_insights": []})),
    )
}

async fn outputs(
    State(state): State<Captured>,
    Path(system_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let ids = query.get("output_ids").cloned().unwrap_or_default();
    state.output_queries.lock().unwrap().push(ids.clone());

    if system_id == "private" {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error_code": 40301, "detail": "system is private"})),
        );
    }
    let rows: Vec<Value> = ids
        .split(',')
        .map(|id| json!({"id": id, "output": "..."}))
        .collect();
    (
        StatusCode::OK,
        Json(json!({"system_outputs": rows, "total": rows.len()})),
    )
}

async fn metric_descriptions() -> Json<Value> {
    Json(json!({"F1": "F1 score", "Accuracy": "Fraction of correct predictions"}))
}

async fn spawn_backend() -> (String, Captured) {
    let state = Captured::default();
    let app = Router::new()
        .route("/api/systems/analyses", post(analyses))
        .route("/api/systems/:system_id/outputs", get(outputs))
        .route("/api/metric-descriptions", get(metric_descriptions))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/api/"), state)
}

fn make_client(base_url: &str) -> HttpBackend {
    HttpBackend::new(base_url, Some(TOKEN), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn recompute_round_trip_over_http() {
    let (url, captured) = spawn_backend().await;
    let client = make_client(&url);
    assert!(client.base_url().ends_with("/api"));

    let orchestrator = AnalysisOrchestrator::new(client);
    let mut session = AnalysisSession::new();
    session.open(vec![SystemModel::new("s1", "bert"), SystemModel::new("s2", "lstm")]);

    assert_eq!(orchestrator.refresh(&mut session).await, RefreshOutcome::Success);
    let f1 = session.results().unwrap().get("F1", "length").unwrap();
    assert_eq!(f1[1].values, vec![0.5, 0.75]);
    assert_eq!(f1[0].buckets_of_samples[0], vec![CaseId::from(2), CaseId::from(1)]);

    let bodies = captured.analyses.lock().unwrap().clone();
    assert_eq!(
        bodies[0],
        json!({
            "system_ids": "s1,s2",
            "pairwise_performance_gap": false,
            "feature_to_bucket_info": {}
        })
    );
    assert_eq!(
        captured.auth.lock().unwrap()[0].as_deref(),
        Some("Bearer test-token")
    );
}

#[tokio::test]
async fn outputs_query_is_comma_joined() {
    let (url, captured) = spawn_backend().await;
    let client = make_client(&url);

    let ids = vec![CaseId::from(3), CaseId::from("a7"), CaseId::from(12)];
    let response = client.system_outputs("s1", &ids).await.unwrap();
    assert_eq!(response.total, 3);
    assert_eq!(response.system_outputs[1]["id"], json!("a7"));
    assert_eq!(captured.output_queries.lock().unwrap()[0], "3,a7,12");
}

#[tokio::test]
async fn error_body_becomes_api_error() {
    let (url, _captured) = spawn_backend().await;
    let client = make_client(&url);

    let err = client
        .system_outputs("private", &[CaseId::from(1)])
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), Some(PERMISSION_WARNING_CODE));
    assert!(err.is_warning());
    assert_eq!(err.to_string(), "[403: 40301] system is private");
}

#[tokio::test]
async fn failed_recompute_maps_to_session_error() {
    let (url, _captured) = spawn_backend().await;
    let orchestrator = AnalysisOrchestrator::new(make_client(&url));
    let mut session = AnalysisSession::new();
    session.open(vec![SystemModel::new("broken", "broken")]);

    let outcome = orchestrator.refresh(&mut session).await;
    match outcome {
        RefreshOutcome::Failed(e) => {
            assert!(!e.is_fatal());
            assert_eq!(e.to_string(), "[500] analysis failed");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn metric_descriptions_decode() {
    let (url, _captured) = spawn_backend().await;
    let descriptions = make_client(&url).metric_descriptions().await.unwrap();
    assert_eq!(descriptions["F1"], "F1 score");
    assert_eq!(descriptions.len(), 2);
}

#[tokio::test]
async fn unreachable_backend_is_an_http_error() {
    // Bind then drop to get a port with nothing listening
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = make_client(&format!("http://{addr}"));
    let err = client.metric_descriptions().await.unwrap_err();
    assert!(matches!(err, BackendError::Http(_)));
    assert_eq!(err.error_code(), None);
}
