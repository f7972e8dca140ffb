use axum::response::IntoResponse;
use http::StatusCode;
use tonic::Status;

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Invocation error: {0}")]
    Invoke(#[from] InvokeError),
}

/// Failures reported by the orchestration backend.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("No function {0} exists")]
    NotFound(String),
    #[error("Function {0} already exists")]
    AlreadyExists(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Backend timeout")]
    Timeout,
    #[error("Invalid function spec: {0}")]
    Invalid(String),
    #[error("Backend internal error: {0}")]
    Internal(String),
}

/// Failures of a single sidecar call.
#[derive(thiserror::Error, Debug)]
pub enum InvokeError {
    #[error("Invocation of {0} timed out")]
    Timeout(String),
    #[error("Sidecar of {0} unreachable: {1}")]
    Unreachable(String, String),
    #[error("Function {0} failed: {1}")]
    Failed(String, String),
    #[error("Invocation of {0} cancelled")]
    Cancelled(String),
    #[error("Invalid sidecar address {0}")]
    InvalidTarget(String),
}

/// Failure fetching live metrics for enrichment; never surfaced to callers.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("metrics query failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("metrics query rejected: {0}")]
    Rejected(String),
}

/// Transport-level failures of the connection demultiplexer.
#[derive(thiserror::Error, Debug)]
pub enum MuxError {
    #[error("no protocol matched the connection prefix {0:?}")]
    Unmatched(String),
    #[error("connection closed before a protocol matched")]
    ClosedBeforeMatch,
    #[error("no protocol matched within the read timeout")]
    SniffTimeout,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<kube::Error> for BackendError {
    fn from(value: kube::Error) -> Self {
        match value {
            kube::Error::Api(resp) => match resp.code {
                404 => BackendError::NotFound(resp.message),
                409 => BackendError::AlreadyExists(resp.message),
                401 | 403 => BackendError::PermissionDenied(resp.message),
                400 | 422 => BackendError::Invalid(resp.message),
                408 | 504 => BackendError::Timeout,
                500..=599 => BackendError::Unavailable(resp.message),
                _ => BackendError::Internal(resp.message),
            },
            kube::Error::HyperError(e) => {
                BackendError::Unavailable(e.to_string())
            }
            kube::Error::Service(e) => {
                BackendError::Unavailable(e.to_string())
            }
            other => BackendError::Internal(other.to_string()),
        }
    }
}

impl From<BackendError> for tonic::Status {
    fn from(value: BackendError) -> Self {
        let msg = value.to_string();
        match value {
            BackendError::NotFound(_) => Status::not_found(msg),
            BackendError::AlreadyExists(_) => Status::already_exists(msg),
            BackendError::PermissionDenied(_) => Status::permission_denied(msg),
            BackendError::Unavailable(_) => Status::unavailable(msg),
            BackendError::Timeout => Status::deadline_exceeded(msg),
            BackendError::Invalid(_) => Status::invalid_argument(msg),
            BackendError::Internal(_) => Status::internal(msg),
        }
    }
}

impl From<InvokeError> for tonic::Status {
    fn from(value: InvokeError) -> Self {
        let msg = value.to_string();
        match value {
            InvokeError::Timeout(_) => Status::deadline_exceeded(msg),
            InvokeError::Unreachable(..) => Status::unavailable(msg),
            InvokeError::Failed(..) => Status::internal(msg),
            InvokeError::Cancelled(_) => Status::cancelled(msg),
            InvokeError::InvalidTarget(_) => Status::invalid_argument(msg),
        }
    }
}

impl From<GatewayError> for tonic::Status {
    fn from(value: GatewayError) -> Self {
        match value {
            GatewayError::InvalidArgument(msg) => Status::invalid_argument(msg),
            GatewayError::Backend(e) => e.into(),
            GatewayError::Invoke(e) => e.into(),
        }
    }
}

impl GatewayError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        use GatewayError::*;
        match self {
            InvalidArgument(_) => (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT"),
            Backend(e) => match e {
                BackendError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND")
                }
                BackendError::AlreadyExists(_) => {
                    (StatusCode::CONFLICT, "ALREADY_EXISTS")
                }
                BackendError::PermissionDenied(_) => {
                    (StatusCode::FORBIDDEN, "PERMISSION_DENIED")
                }
                BackendError::Unavailable(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "BACKEND_UNAVAILABLE")
                }
                BackendError::Timeout => {
                    (StatusCode::GATEWAY_TIMEOUT, "BACKEND_TIMEOUT")
                }
                BackendError::Invalid(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT")
                }
                BackendError::Internal(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "BACKEND_ERROR")
                }
            },
            Invoke(e) => match e {
                InvokeError::Timeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "INVOKE_TIMEOUT")
                }
                InvokeError::Unreachable(..) => {
                    (StatusCode::BAD_GATEWAY, "SIDECAR_UNREACHABLE")
                }
                InvokeError::Failed(..) => {
                    (StatusCode::BAD_GATEWAY, "INVOKE_FAILED")
                }
                InvokeError::Cancelled(_) => {
                    (StatusCode::BAD_GATEWAY, "INVOKE_CANCELLED")
                }
                InvokeError::InvalidTarget(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_TARGET")
                }
            },
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let (code, code_str) = self.status_and_code();
        let body = serde_json::json!({
            "error": { "code": code_str, "message": self.to_string() }
        });
        let mut resp = (code, body.to_string()).into_response();
        resp.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        resp
    }
}
