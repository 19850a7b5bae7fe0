use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchboard_core::control::{ControlBridge, ControlServer, RouteChangeRequest};
use switchboard_core::protocol::{Pipeline, ProtocolError};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tower::ServiceExt;

/// Fake switch answering `port` with `current` and echoing port changes,
/// except for ports listed in `silent_on`
fn spawn_switch(mut device: DuplexStream, current: u32, silent_on: &'static [&'static str]) -> Arc<Mutex<Vec<String>>> {
    let received = Arc::new(Mutex::new(Vec::new()));
    let log = received.clone();

    tokio::spawn(async move {
        let mut buf = [0u8; 256];
        loop {
            let n = match device.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let instruction = String::from_utf8_lossy(&buf[..n]).trim_end().to_string();
            log.lock().unwrap().push(instruction.clone());

            if silent_on.contains(&instruction.as_str()) {
                continue;
            }
            let answer = match instruction.split_once(' ') {
                Some((_, arg)) => format!("{}\r\n", arg),
                None => format!("{}\r\n", current),
            };
            let _ = device.write_all(answer.as_bytes()).await;
        }
    });

    received
}

fn connected_server(current: u32, silent_on: &'static [&'static str]) -> (Router, ControlServer, Arc<Mutex<Vec<String>>>) {
    let (link, device) = tokio::io::duplex(1024);
    let (pipeline, _errors) = Pipeline::spawn(link);
    let received = spawn_switch(device, current, silent_on);

    let server = ControlServer::new();
    server.install(ControlBridge::new(Arc::new(pipeline)));
    (server.router(Duration::from_secs(10)), server, received)
}

fn put_input(body: &str) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri("/input")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_input() -> Request<Body> {
    Request::builder().uri("/input").body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_get_reports_current_source() {
    let (router, _server, received) = connected_server(2, &[]);

    let response = router.oneshot(get_input()).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        serde_json::json!({ "sourceID": 2, "sources": [] })
    );
    assert_eq!(*received.lock().unwrap(), vec!["port"]);
}

#[tokio::test(start_paused = true)]
async fn test_get_reports_null_when_no_port_is_routed() {
    let (router, _server, _received) = connected_server(0, &[]);

    let response = router.oneshot(get_input()).await.unwrap();

    assert_eq!(
        json_body(response).await,
        serde_json::json!({ "sourceID": null, "sources": [] })
    );
}

#[tokio::test(start_paused = true)]
async fn test_put_sets_port_then_default_port() {
    let (router, _server, received) = connected_server(1, &[]);

    let response = router.oneshot(put_input(r#"{"sourceID": 2}"#)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(*received.lock().unwrap(), vec!["port 2", "defaultport 2"]);
}

#[tokio::test(start_paused = true)]
async fn test_put_skips_default_port_when_port_change_fails() {
    let (router, _server, received) = connected_server(1, &["port 2"]);

    let response = router.oneshot(put_input(r#"{"sourceID": 2}"#)).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(*received.lock().unwrap(), vec!["port 2"]);
}

#[tokio::test(start_paused = true)]
async fn test_put_null_disables_routing() {
    let (router, _server, received) = connected_server(1, &[]);

    let response = router.oneshot(put_input(r#"{"sourceID": null}"#)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(*received.lock().unwrap(), vec!["port 0", "defaultport 0"]);
}

#[tokio::test(start_paused = true)]
async fn test_put_without_source_is_bad_request() {
    let (router, _server, received) = connected_server(1, &[]);

    let response = router.oneshot(put_input("{}")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_put_without_body_is_bad_request() {
    let (router, _server, received) = connected_server(1, &[]);

    let request = Request::builder()
        .method("PUT")
        .uri("/input")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router.oneshot(put_input("")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_put_with_malformed_source_is_bad_request() {
    let (router, _server, received) = connected_server(1, &[]);

    for body in [r#"{"sourceID": "x"}"#, r#"{"sourceID": -1}"#, "[]", "{"] {
        let response = router.clone().oneshot(put_input(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {:?}", body);
    }
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_requests_fail_without_device() {
    let server = ControlServer::new();
    let router = server.router(Duration::from_secs(10));

    let response = router.clone().oneshot(get_input()).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = router.oneshot(put_input(r#"{"sourceID": 1}"#)).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test(start_paused = true)]
async fn test_uninstall_detaches_bridge() {
    let (router, server, _received) = connected_server(1, &[]);
    server.uninstall();

    assert!(server.bridge().is_none());
    let response = router.oneshot(get_input()).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test(start_paused = true)]
async fn test_bridge_propagates_closed_pipeline() {
    let (link, _device) = tokio::io::duplex(64);
    let (pipeline, _errors) = Pipeline::spawn(link);
    pipeline.close();
    let bridge = ControlBridge::new(Arc::new(pipeline));

    let result = bridge.change_route(RouteChangeRequest { source_id: Some(1) }).await;
    assert!(matches!(result, Err(ProtocolError::NotConnected)));
}
