//! End-to-end tests of the HTTP control surface against a simulated instance.

mod common;

use common::{get_free_port, spawn_demo, wait_for_listening};

#[tokio::test]
async fn health_responds_without_touching_the_provider() {
    let port = get_free_port();
    let _service = spawn_demo(port, 100);
    wait_for_listening(port, 30).await;

    let body: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "vm-controller");
}

#[tokio::test]
async fn service_info_names_the_managed_instance() {
    let port = get_free_port();
    let _service = spawn_demo(port, 100);
    wait_for_listening(port, 30).await;

    let body: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{port}/"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["service"], "vm-controller");
    assert_eq!(body["vm_name"], "demo-instance");
    assert_eq!(body["zone"], "demo-zone-a");
}

#[tokio::test]
async fn full_lifecycle_over_http() {
    let port = get_free_port();
    let _service = spawn_demo(port, 200);
    wait_for_listening(port, 30).await;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");

    // A fresh process trusts nothing until a reconciliation lands.
    let status: serde_json::Value = client
        .get(format!("{base}/vm/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["phase"], "unknown");
    assert_eq!(status["stale"], true);

    // Start and wait for the outcome.
    let started: serde_json::Value = client
        .post(format!("{base}/vm/start?wait=true"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(started["outcome"], "completed");
    assert_eq!(started["phase"], "running");

    // Repeating the request is a no-op success without a new operation.
    let repeated: serde_json::Value = client
        .post(format!("{base}/vm/start"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(repeated["outcome"], "already-in-desired-state");
    assert_eq!(repeated["phase"], "running");

    // The running instance exposes its reachable address.
    let info = client
        .get(format!("{base}/vm/connection-info"))
        .send()
        .await
        .unwrap();
    assert_eq!(info.status(), 200);
    let info: serde_json::Value = info.json().await.unwrap();
    assert_eq!(info["status"], "running");
    assert!(info["vm_ip"].is_string());

    // Stop and wait; the cycle ends where it began.
    let stopped: serde_json::Value = client
        .post(format!("{base}/vm/stop?wait=true"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stopped["outcome"], "completed");
    assert_eq!(stopped["phase"], "stopped");

    let status: serde_json::Value = client
        .get(format!("{base}/vm/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["phase"], "stopped");
}

#[tokio::test]
async fn opposite_direction_request_conflicts_while_in_flight() {
    // Slow transition so the start is reliably still in flight.
    let port = get_free_port();
    let _service = spawn_demo(port, 5000);
    wait_for_listening(port, 30).await;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");

    let started: serde_json::Value = client
        .post(format!("{base}/vm/start"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(started["outcome"], "accepted");
    assert_eq!(started["phase"], "starting");

    let conflict = client
        .post(format!("{base}/vm/stop"))
        .send()
        .await
        .unwrap();
    assert_eq!(conflict.status(), 409);

    // Same-kind requests coalesce instead of conflicting.
    let coalesced: serde_json::Value = client
        .post(format!("{base}/vm/start"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(coalesced["outcome"], "reused");

    let status: serde_json::Value = client
        .get(format!("{base}/vm/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["phase"], "starting");
    assert_eq!(status["operation_in_flight"], "start");
}

#[tokio::test]
async fn connection_info_unavailable_while_stopped() {
    let port = get_free_port();
    let _service = spawn_demo(port, 100);
    wait_for_listening(port, 30).await;

    let response = reqwest::get(format!("http://127.0.0.1:{port}/vm/connection-info"))
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("not running")
    );
}
