#![allow(dead_code)]

use async_trait::async_trait;
use fx_gateway::backend::{BackendResult, FunctionBackend, MemoryBackend};
use fx_gateway::error::{BackendError, InvokeError};
use fx_gateway::invoke::{InvokeTarget, Invoker};
use fx_gateway::metrics::{MetricOptions, RegistryFetcher};
use fx_gateway::{Config, FxService};
use fx_pb::{CreateFunctionRequest, Function};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replies with the request input and remembers the last request.
#[derive(Default)]
pub struct EchoInvoker {
    pub last: Mutex<Option<(InvokeTarget, fx_pb::Request)>>,
}

#[async_trait]
impl Invoker for EchoInvoker {
    async fn invoke(
        &self,
        target: &InvokeTarget,
        request: fx_pb::Request,
        timeout: Duration,
    ) -> Result<String, InvokeError> {
        let input = String::from_utf8_lossy(&request.input).into_owned();
        *self.last.lock().unwrap() = Some((target.clone(), request));
        if input == "hang" {
            return match tokio::time::timeout(
                timeout,
                tokio::time::sleep(Duration::from_secs(30)),
            )
            .await
            {
                Ok(_) => Ok(input),
                Err(_) => Err(InvokeError::Timeout(target.name.clone())),
            };
        }
        Ok(input)
    }
}

/// Every call fails as if the orchestrator were down.
pub struct DownBackend;

#[async_trait]
impl FunctionBackend for DownBackend {
    async fn create(&self, _spec: &CreateFunctionRequest) -> BackendResult<()> {
        Err(BackendError::Unavailable("down".into()))
    }
    async fn get(&self, _name: &str) -> BackendResult<Function> {
        Err(BackendError::Unavailable("down".into()))
    }
    async fn list(&self) -> BackendResult<Vec<Function>> {
        Err(BackendError::Unavailable("down".into()))
    }
    async fn update(&self, _spec: &CreateFunctionRequest) -> BackendResult<()> {
        Err(BackendError::Unavailable("down".into()))
    }
    async fn delete(&self, _name: &str) -> BackendResult<()> {
        Err(BackendError::Unavailable("down".into()))
    }
    async fn scale(&self, _name: &str, _replicas: u64) -> BackendResult<()> {
        Err(BackendError::Unavailable("down".into()))
    }
    async fn logs(&self, _name: &str) -> BackendResult<String> {
        Err(BackendError::Unavailable("down".into()))
    }
    async fn version(&self) -> BackendResult<String> {
        Err(BackendError::Unavailable("down".into()))
    }
}

/// Answers `get` only after `delay`. Everything else goes to `inner`.
pub struct SlowGetBackend {
    pub inner: MemoryBackend,
    pub delay: Duration,
}

#[async_trait]
impl FunctionBackend for SlowGetBackend {
    async fn create(&self, spec: &CreateFunctionRequest) -> BackendResult<()> {
        self.inner.create(spec).await
    }
    async fn get(&self, name: &str) -> BackendResult<Function> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(name).await
    }
    async fn list(&self) -> BackendResult<Vec<Function>> {
        self.inner.list().await
    }
    async fn update(&self, spec: &CreateFunctionRequest) -> BackendResult<()> {
        self.inner.update(spec).await
    }
    async fn delete(&self, name: &str) -> BackendResult<()> {
        self.inner.delete(name).await
    }
    async fn scale(&self, name: &str, replicas: u64) -> BackendResult<()> {
        self.inner.scale(name, replicas).await
    }
    async fn logs(&self, name: &str) -> BackendResult<String> {
        self.inner.logs(name).await
    }
    async fn version(&self) -> BackendResult<String> {
        self.inner.version().await
    }
}

pub struct Fixture {
    pub service: FxService,
    pub backend: Arc<dyn FunctionBackend>,
    pub invoker: Arc<EchoInvoker>,
    pub metrics: Arc<MetricOptions>,
}

pub fn test_config() -> Config {
    Config {
        backend: "memory".into(),
        invoke_timeout_ms: 200,
        read_timeout_ms: 300,
        ..Default::default()
    }
}

pub fn fixture_with(
    conf: Config,
    backend: Arc<dyn FunctionBackend>,
) -> Fixture {
    let metrics = Arc::new(MetricOptions::new().unwrap());
    let invoker = Arc::new(EchoInvoker::default());
    let service = FxService::new(
        Arc::new(conf),
        backend.clone(),
        invoker.clone(),
        metrics.clone(),
        Arc::new(RegistryFetcher::new(metrics.clone())),
    );
    Fixture {
        service,
        backend,
        invoker,
        metrics,
    }
}

pub fn fixture() -> Fixture {
    let conf = test_config();
    let backend =
        Arc::new(MemoryBackend::new(conf.function_namespace.clone()));
    fixture_with(conf, backend)
}

pub fn spec(name: &str) -> CreateFunctionRequest {
    CreateFunctionRequest {
        service: name.into(),
        image: format!("{name}:v1"),
        runtime: "python3".into(),
        ..Default::default()
    }
}
