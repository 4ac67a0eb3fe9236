//! HTTP surface tests against the in-process router.

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use ohmserve::engine::NetlistEngineFactory;
use ohmserve::rpc::{self, AppState};
use ohmserve::stream::{RunController, StreamLimits};
use serde_json::{json, Value};
use tower::ServiceExt;

struct Harness {
    app: Router,
    state: AppState,
    _work_dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let work_dir = tempfile::tempdir().unwrap();
    let controller = RunController::new(Box::new(NetlistEngineFactory), StreamLimits::default());
    let state = AppState::new(controller, work_dir.path().to_path_buf());
    Harness {
        app: rpc::router(state.clone()),
        state,
        _work_dir: work_dir,
    }
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn load(app: &Router, netlist: &str) -> String {
    let (status, body) = call(
        app,
        Method::POST,
        "/v1/files",
        Some(json!({"files": [{"name": "top.cir", "contents": netlist}]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["run_handle"].as_str().unwrap().to_string()
}

async fn start_run(app: &Router, run_handle: &str, vectors: &[&str]) -> (StatusCode, Value) {
    call(
        app,
        Method::POST,
        &format!("/v1/runs/{run_handle}"),
        Some(json!({ "vectors": vectors })),
    )
    .await
}

/// Poll until `more` is false; returns every non-empty `data` entry in order.
async fn read_all(app: &Router, result_handle: &str) -> (Option<String>, Vec<Value>) {
    let uri = format!("/v1/results/{result_handle}/read");
    let mut scale = None;
    let mut data = Vec::new();
    for _ in 0..10_000 {
        let (status, body) = call(app, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        if let Some(s) = body["scale"].as_str() {
            scale = Some(s.to_string());
        }
        for entry in body["data"].as_array().unwrap() {
            if !entry["values"].as_array().unwrap().is_empty() {
                data.push(entry.clone());
            }
        }
        if body["more"] == json!(false) {
            return (scale, data);
        }
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    panic!("stream never ended");
}

#[tokio::test]
async fn op_round_trip() {
    let h = harness();
    let run = load(&h.app, "V1 1 0 DC 10\nR1 1 2 1k\nR2 2 0 1k\n.OP\n").await;
    let (status, body) = start_run(&h.app, &run, &["V(2)"]).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let result = body["result_handle"].as_str().unwrap().to_string();

    let (scale, data) = read_all(&h.app, &result).await;
    assert_eq!(scale.as_deref(), Some("V(2)"));
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["step"], "op0");
    assert_eq!(data[0]["name"], "V(2)");
    assert_eq!(data[0]["kind"], "real");
    let v = data[0]["values"][0].as_f64().unwrap();
    assert!((v - 5.0).abs() < 1e-6, "{v}");

    // end of stream is stable
    let (status, body) = call(&h.app, Method::POST, &format!("/v1/results/{result}/read"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"more": false, "scale": "V(2)", "data": [{"step": "op0", "name": "V(2)", "kind": "real", "values": []}]}));
}

#[tokio::test]
async fn ac_values_are_complex_objects() {
    let h = harness();
    let run = load(&h.app, "V1 1 0 AC 1\nR1 1 2 1k\nC1 2 0 1u\n.AC LIN 2 10 20\n").await;
    let (_, body) = start_run(&h.app, &run, &["V(2)"]).await;
    let result = body["result_handle"].as_str().unwrap().to_string();

    let (scale, data) = read_all(&h.app, &result).await;
    assert_eq!(scale.as_deref(), Some("FREQ"));
    let freq: Vec<&Value> = data.iter().filter(|d| d["name"] == "FREQ").collect();
    assert!(freq.iter().all(|d| d["kind"] == "complex"));
    let first = &freq[0]["values"][0];
    assert_eq!(first["re"].as_f64(), Some(10.0));
    assert_eq!(first["im"].as_f64(), Some(0.0));
}

#[tokio::test]
async fn setup_error_is_422_and_issues_no_handle() {
    let h = harness();
    let run = load(&h.app, "R1 1 0\n.OP\n").await;
    let (status, body) = start_run(&h.app, &run, &[]).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["status"], 422);
    assert!(body["error"]["message"].as_str().unwrap().contains("Parse error"));
    assert_eq!(h.state.open_results(), 0);
}

#[tokio::test]
async fn unknown_handles_are_404() {
    let h = harness();
    let missing = uuid::Uuid::new_v4();
    let (status, _) = start_run(&h.app, &missing.to_string(), &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&h.app, Method::POST, &format!("/v1/results/{missing}/read"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&h.app, Method::DELETE, &format!("/v1/results/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bad_file_names_are_rejected() {
    let h = harness();
    let (status, body) = call(
        &h.app,
        Method::POST,
        "/v1/files",
        Some(json!({"files": [{"name": "../escape.cir", "contents": ".OP"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("path components"));

    let (status, _) = call(&h.app, Method::POST, "/v1/files", Some(json!({"files": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn files_are_staged_under_the_run_handle() {
    let h = harness();
    let run = load(&h.app, "V1 1 0 1\nR1 1 0 1k\n.OP\n").await;
    let staged = h.state.work_dir().join(&run).join("top.cir");
    assert_eq!(std::fs::read_to_string(staged).unwrap(), "V1 1 0 1\nR1 1 0 1k\n.OP\n");
}

#[tokio::test]
async fn one_run_handle_serves_many_runs() {
    let h = harness();
    let run = load(&h.app, "V1 1 0 DC 0\nR1 1 0 1k\n.DC V1 0 1 0.5\n").await;
    let (_, first) = start_run(&h.app, &run, &["V(1)"]).await;
    let (_, second) = start_run(&h.app, &run, &["I(V1)"]).await;
    assert_ne!(first["result_handle"], second["result_handle"]);
    assert_eq!(h.state.open_results(), 2);

    let (_, a) = read_all(&h.app, first["result_handle"].as_str().unwrap()).await;
    let (_, b) = read_all(&h.app, second["result_handle"].as_str().unwrap()).await;
    let names = |d: &[Value]| {
        let mut names: Vec<String> = d
            .iter()
            .map(|e| e["name"].as_str().unwrap().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    };
    assert_eq!(names(&a), vec!["V(1)", "V1"]);
    assert_eq!(names(&b), vec!["I(V1)", "V1"]);
}

#[tokio::test]
async fn release_drops_result_handle() {
    let h = harness();
    let run = load(&h.app, "V1 1 0 1\nR1 1 0 1k\n.OP\n").await;
    let (_, body) = start_run(&h.app, &run, &[]).await;
    let result = body["result_handle"].as_str().unwrap().to_string();

    let (status, _) = call(&h.app, Method::DELETE, &format!("/v1/results/{result}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(h.state.open_results(), 0);
    let (status, _) = call(&h.app, Method::POST, &format!("/v1/results/{result}/read"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn overlapping_reads_conflict() {
    let h = harness();
    let run = load(&h.app, "V1 1 0 1\nR1 1 0 1k\n.OP\n").await;
    let (_, body) = start_run(&h.app, &run, &["V(1)"]).await;
    let result = body["result_handle"].as_str().unwrap().to_string();
    let handle: uuid::Uuid = result.parse().unwrap();

    // a read still in flight holds the cursor
    let cursor = h.state.result(handle).unwrap();
    let in_flight = cursor.lock().unwrap();
    let read_uri = format!("/v1/results/{result}/read");
    let (status, body) = call(&h.app, Method::POST, &read_uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["status"], 409);
    let (status, _) = call(&h.app, Method::POST, &format!("/v1/results/{result}/read_all"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    drop(in_flight);

    let (status, _) = call(&h.app, Method::POST, &read_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, data) = read_all(&h.app, &result).await;
    assert!(data.iter().all(|d| d["name"] == "V(1)"));
}

#[tokio::test]
async fn read_all_returns_the_whole_run_at_once() {
    let h = harness();
    let run = load(&h.app, "V1 1 0 DC 1\nR1 1 2 1k\nC1 2 0 1u\n.TRAN 10u 5m UIC\n").await;
    let (_, body) = start_run(&h.app, &run, &["V(2)"]).await;
    let result = body["result_handle"].as_str().unwrap().to_string();

    let (status, body) = call(&h.app, Method::POST, &format!("/v1/results/{result}/read_all"), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["more"], false);
    assert_eq!(body["scale"], "TIME");
    let data = body["data"].as_array().unwrap();
    for name in ["TIME", "V(2)"] {
        let entry = data.iter().find(|d| d["name"] == name).unwrap();
        assert_eq!(entry["values"].as_array().unwrap().len(), 501);
    }

    // nothing is delivered twice
    let (_, body) = call(&h.app, Method::POST, &format!("/v1/results/{result}/read"), None).await;
    assert_eq!(body["more"], false);
    assert!(body["data"]
        .as_array()
        .unwrap()
        .iter()
        .all(|d| d["values"].as_array().unwrap().is_empty()));
}

#[tokio::test]
async fn unloading_files_removes_run_handle_and_directory() {
    let h = harness();
    let run = load(&h.app, "V1 1 0 1\nR1 1 0 1k\n.OP\n").await;
    let (_, body) = start_run(&h.app, &run, &["V(1)"]).await;
    let result = body["result_handle"].as_str().unwrap().to_string();
    let staged = h.state.work_dir().join(&run);
    assert!(staged.is_dir());

    let (status, _) = call(&h.app, Method::DELETE, &format!("/v1/files/{run}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!staged.exists());
    assert_eq!(h.state.open_runs(), 0);

    let (status, _) = start_run(&h.app, &run, &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&h.app, Method::DELETE, &format!("/v1/files/{run}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // runs started before the unload are unaffected
    let (_, data) = read_all(&h.app, &result).await;
    let v = data.iter().find(|d| d["name"] == "V(1)").unwrap();
    let v = v["values"][0].as_f64().unwrap();
    assert!((v - 1.0).abs() < 1e-9, "{v}");
}
