use axum::extract::Path;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use bytes::Bytes;
use fx_pb::{
    CreateFunctionRequest, DeleteFunctionRequest, Function,
    InvokeServiceRequest, Message,
};
use http::StatusCode;
use tracing::error;

use crate::error::GatewayError;
use crate::service::FxService;

#[derive(serde::Deserialize, Debug)]
pub struct ScaleBody {
    pub replicas: u64,
}

#[axum::debug_handler]
pub async fn invoke(
    Path(name): Path<String>,
    Extension(service): Extension<FxService>,
    body: Bytes,
) -> Result<String, GatewayError> {
    service
        .invoke(InvokeServiceRequest {
            service: name,
            input: body.to_vec(),
        })
        .await
}

pub async fn list(
    Extension(service): Extension<FxService>,
) -> Result<Json<Vec<Function>>, GatewayError> {
    Ok(Json(service.list().await?))
}

pub async fn deploy(
    Extension(service): Extension<FxService>,
    Json(spec): Json<CreateFunctionRequest>,
) -> Result<(StatusCode, Json<Message>), GatewayError> {
    service.deploy(spec).await?;
    Ok((StatusCode::ACCEPTED, Json(Message::ok())))
}

pub async fn update(
    Extension(service): Extension<FxService>,
    Json(spec): Json<CreateFunctionRequest>,
) -> Result<Json<Message>, GatewayError> {
    service.update(spec).await?;
    Ok(Json(Message::ok()))
}

pub async fn delete(
    Extension(service): Extension<FxService>,
    Json(req): Json<DeleteFunctionRequest>,
) -> Result<Json<Message>, GatewayError> {
    service.delete(&req.function_name).await?;
    Ok(Json(Message::ok()))
}

pub async fn get_meta(
    Path(name): Path<String>,
    Extension(service): Extension<FxService>,
) -> Result<Json<Function>, GatewayError> {
    Ok(Json(service.get_meta(&name).await?))
}

pub async fn get_log(
    Path(name): Path<String>,
    Extension(service): Extension<FxService>,
) -> Result<Json<Message>, GatewayError> {
    let msg = service.get_log(&name).await?;
    Ok(Json(Message { msg }))
}

pub async fn scale(
    Path(name): Path<String>,
    Extension(service): Extension<FxService>,
    Json(body): Json<ScaleBody>,
) -> Result<Json<Message>, GatewayError> {
    service.replica_update(&name, body.replicas).await?;
    Ok(Json(Message::ok()))
}

pub async fn info(
    Extension(service): Extension<FxService>,
) -> Result<Json<Message>, GatewayError> {
    let msg = service.info().await?;
    Ok(Json(Message { msg }))
}

pub async fn healthz(
    Extension(service): Extension<FxService>,
) -> Json<Message> {
    Json(Message {
        msg: service.health_check(),
    })
}

pub async fn metrics(Extension(service): Extension<FxService>) -> Response {
    match service.metrics().render() {
        Ok(text) => (
            [(http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
