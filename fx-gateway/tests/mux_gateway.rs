mod common;

use common::{fixture, spec};
use fx_gateway::metrics::{MetricOptions, Outcome};
use fx_pb::fx_gateway_client::FxGatewayClient;
use fx_pb::{Empty, FunctionRequest, InvokeServiceRequest};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn start_gateway() -> (SocketAddr, Arc<MetricOptions>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let fx = fixture();
    let service = fx.service;
    tokio::spawn(async move {
        fx_gateway::serve(listener, service, std::future::pending()).await
    });
    (addr, fx.metrics)
}

async fn closed_by_peer(stream: &mut TcpStream, within: Duration) -> bool {
    let mut buf = [0u8; 64];
    match tokio::time::timeout(within, stream.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => true,
        _ => false,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn rpc_and_http_share_the_port() {
    let (addr, _) = start_gateway().await;

    let mut client = FxGatewayClient::connect(format!("http://{}", addr))
        .await
        .unwrap();
    let health = client.health_check(Empty {}).await.unwrap().into_inner();
    assert_eq!(health.msg, "OK");
    client.deploy(spec("echo")).await.unwrap();
    let functions = client.list(Empty {}).await.unwrap().into_inner();
    assert_eq!(functions.functions.len(), 1);

    let http = reqwest::Client::new();
    let res = http
        .get(format!("http://{}/healthz", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::OK);

    let res = http
        .post(format!("http://{}/function/echo", addr))
        .body("hi")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "hi");

    let meta = client
        .get_meta(FunctionRequest {
            function_name: "echo".into(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(meta.invocation_count, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn rpc_errors_are_statuses() {
    let (addr, _) = start_gateway().await;
    let mut client = FxGatewayClient::connect(format!("http://{}", addr))
        .await
        .unwrap();
    let err = client
        .invoke(InvokeServiceRequest {
            service: "ghost".into(),
            input: b"hi".to_vec(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::NotFound);

    client.deploy(spec("echo")).await.unwrap();
    let err = client.deploy(spec("echo")).await.unwrap_err();
    assert_eq!(err.code(), tonic::Code::AlreadyExists);
}

#[tokio::test(flavor = "multi_thread")]
async fn idle_connection_does_not_block_others() {
    let (addr, _) = start_gateway().await;
    let mut idle = TcpStream::connect(addr).await.unwrap();

    let res = reqwest::get(format!("http://{}/healthz", addr)).await.unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::OK);

    // read timeout of the test config is 300ms
    assert!(closed_by_peer(&mut idle, Duration::from_secs(2)).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn unmatched_prefix_is_closed() {
    let (addr, _) = start_gateway().await;
    let mut garbage = TcpStream::connect(addr).await.unwrap();
    garbage.write_all(b"\x16\x03\x01\x02\x00garbage").await.unwrap();
    assert!(closed_by_peer(&mut garbage, Duration::from_secs(2)).await);

    let res = reqwest::get(format!("http://{}/healthz", addr)).await.unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn caller_deadline_is_counted_as_failure() {
    let (addr, metrics) = start_gateway().await;
    let mut client = FxGatewayClient::connect(format!("http://{}", addr))
        .await
        .unwrap();
    client.deploy(spec("slow")).await.unwrap();

    let mut req = tonic::Request::new(InvokeServiceRequest {
        service: "slow".into(),
        input: b"hang".to_vec(),
    });
    req.set_timeout(Duration::from_millis(50));
    assert!(client.invoke(req).await.is_err());

    // the server drops the handler once the caller gives up
    let mut recorded = 0;
    for _ in 0..50 {
        recorded = metrics.invocations("slow", Outcome::Failure);
        if recorded > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(recorded, 1);
    assert_eq!(metrics.invocations("slow", Outcome::Success), 0);
}
