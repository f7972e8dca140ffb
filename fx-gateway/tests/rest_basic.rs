mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::fixture;
use std::time::Duration;
use tower::util::ServiceExt;

fn app() -> Router {
    fx_gateway::build_router(fixture().service, Duration::from_secs(2))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, String) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let res = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

#[tokio::test]
async fn healthz_is_ok() {
    let app = app();
    let (status, body) = send(&app, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["msg"], "OK");
}

#[tokio::test]
async fn deploy_then_list_and_conflict() {
    let app = app();
    let spec = serde_json::json!({"service": "echo", "image": "echo:v1"});
    let (status, _) =
        send(&app, "POST", "/system/functions", Some(spec.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) =
        send(&app, "POST", "/system/functions", Some(spec)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["error"]["code"], "ALREADY_EXISTS");

    let (status, body) = send(&app, "GET", "/system/functions", None).await;
    assert_eq!(status, StatusCode::OK);
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    let list = v.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["name"], "echo");
    assert_eq!(list[0]["replicas"], 1);
}

#[tokio::test]
async fn missing_function_is_404_json() {
    let app = app();
    let (status, body) =
        send(&app, "GET", "/system/function/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["error"]["code"], "NOT_FOUND");

    let (status, _) = send(
        &app,
        "DELETE",
        "/system/functions",
        Some(serde_json::json!({"function_name": "missing"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let app = app();
    let (status, _) = send(&app, "GET", "/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invoke_scale_and_metrics() {
    let app = app();
    let spec = serde_json::json!({"service": "echo", "image": "echo:v1"});
    send(&app, "POST", "/system/functions", Some(spec)).await;

    let req = Request::builder()
        .method("POST")
        .uri("/function/echo")
        .body(Body::from("hi"))
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"hi");

    let (status, _) = send(
        &app,
        "POST",
        "/system/scale-function/echo",
        Some(serde_json::json!({"replicas": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&app, "GET", "/system/function/echo", None).await;
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["replicas"], 3);
    assert_eq!(v["invocation_count"], 1);
    assert_eq!(v["last_status"], "success");

    let (status, body) = send(&app, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(concat!(
        "gateway_function_invocation_total",
        "{function_name=\"echo\",outcome=\"success\"} 1"
    )));
}

#[tokio::test]
async fn invoke_unknown_function_is_404() {
    let app = app();
    let req = Request::builder()
        .method("POST")
        .uri("/function/ghost")
        .body(Body::from("hi"))
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn info_and_logs() {
    let app = app();
    let (status, body) = send(&app, "GET", "/system/info", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("fx-gateway"));

    send(
        &app,
        "POST",
        "/system/functions",
        Some(serde_json::json!({"service": "echo", "image": "echo:v1"})),
    )
    .await;
    let (status, _) =
        send(&app, "GET", "/system/function-log/echo", None).await;
    assert_eq!(status, StatusCode::OK);
}
