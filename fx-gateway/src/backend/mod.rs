use async_trait::async_trait;
use fx_pb::{CreateFunctionRequest, Function};

use crate::error::BackendError;

mod k8s;
mod memory;

pub use k8s::KubeBackend;
pub use memory::MemoryBackend;

pub type BackendResult<T> = Result<T, BackendError>;

/// Settings applied when rendering a function workload.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub namespace: String,
    pub fxwatcher_port: u16,
    pub image_pull_policy: String,
    pub enable_http_probe: bool,
    pub secret_mount_path: String,
}

/// Orchestration capability used by the gateway. A function's name is the
/// only key; the namespace is fixed per backend instance.
#[async_trait]
pub trait FunctionBackend: Send + Sync {
    /// Create a new workload. Fails with `AlreadyExists` on a name collision.
    async fn create(&self, spec: &CreateFunctionRequest) -> BackendResult<()>;
    async fn get(&self, name: &str) -> BackendResult<Function>;
    async fn list(&self) -> BackendResult<Vec<Function>>;
    /// Replace the spec of an existing workload, keeping its scale.
    async fn update(&self, spec: &CreateFunctionRequest) -> BackendResult<()>;
    async fn delete(&self, name: &str) -> BackendResult<()>;
    async fn scale(&self, name: &str, replicas: u64) -> BackendResult<()>;
    async fn logs(&self, name: &str) -> BackendResult<String>;
    /// Human readable orchestrator version.
    async fn version(&self) -> BackendResult<String>;
}

pub(crate) fn validate_spec(spec: &CreateFunctionRequest) -> BackendResult<()> {
    if spec.service.is_empty() {
        return Err(BackendError::Invalid("function name is required".into()));
    }
    if spec.image.is_empty() {
        return Err(BackendError::Invalid(format!(
            "image is required for {}",
            spec.service
        )));
    }
    Ok(())
}
