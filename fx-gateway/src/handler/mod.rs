use axum::Extension;
use axum::Router;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use fx_pb::fx_gateway_server::FxGatewayServer;
use http::StatusCode;
use std::time::Duration;
use tonic::transport::Server;
use tonic::transport::server::Router as RpcRouter;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::conf::Config;
use crate::service::FxService;

mod grpc;
mod rest;

use grpc::GatewayHandler;

/// HTTP/1 surface. System routes are bounded by `write_timeout`; invocation
/// carries its own deadline.
pub fn build_router(service: FxService, write_timeout: Duration) -> Router {
    let system = Router::new()
        .route(
            "/system/functions",
            get(rest::list)
                .post(rest::deploy)
                .put(rest::update)
                .delete(rest::delete),
        )
        .route("/system/function/{name}", get(rest::get_meta))
        .route("/system/function-log/{name}", get(rest::get_log))
        .route("/system/scale-function/{name}", post(rest::scale))
        .route("/system/info", get(rest::info))
        .layer(TimeoutLayer::new(write_timeout));
    Router::new()
        .route("/function/{name}", post(rest::invoke))
        .merge(system)
        .route("/healthz", get(rest::healthz))
        .route("/metrics", get(rest::metrics))
        .fallback(no_found)
        .layer(Extension(service))
        .layer(TraceLayer::new_for_http())
}

/// gRPC surface with server reflection. HTTP/2 keepalive pings close
/// connections whose peer stops answering.
pub fn build_rpc(
    service: FxService,
    conf: &Config,
) -> Result<RpcRouter, tonic_reflection::server::Error> {
    let reflection_v1a = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(fx_pb::FILE_DESCRIPTOR_SET)
        .build_v1alpha()?;
    let reflection_v1 = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(fx_pb::FILE_DESCRIPTOR_SET)
        .build_v1()?;
    Ok(Server::builder()
        .http2_keepalive_interval(Some(conf.idle_timeout()))
        .http2_keepalive_timeout(Some(conf.read_timeout()))
        .add_service(FxGatewayServer::new(GatewayHandler::new(service)))
        .add_service(reflection_v1a)
        .add_service(reflection_v1))
}

pub async fn no_found() -> Response {
    (StatusCode::NOT_FOUND, String::from("NOT FOUND")).into_response()
}
