use fx_pb::{
    CreateFunctionRequest, Function, Info, InvokeServiceRequest, Resources,
    Trigger,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::FunctionBackend;
use crate::conf::Config;
use crate::error::{BackendError, GatewayError};
use crate::invoke::{InvokeTarget, Invoker};
use crate::metrics::{
    MetricOptions, MetricsFetcher, Outcome, add_metrics_function,
    add_metrics_functions,
};

/// Lifecycle and invocation operations shared by the gRPC and REST surfaces.
#[derive(Clone)]
pub struct FxService {
    conf: Arc<Config>,
    backend: Arc<dyn FunctionBackend>,
    invoker: Arc<dyn Invoker>,
    metrics: Arc<MetricOptions>,
    fetcher: Arc<dyn MetricsFetcher>,
}

fn format_timeout(timeout: Duration) -> String {
    format!("{}s", timeout.as_secs_f64())
}

fn require(value: &str, what: &str) -> Result<(), GatewayError> {
    if value.is_empty() {
        Err(GatewayError::InvalidArgument(format!("{} is required", what)))
    } else {
        Ok(())
    }
}

impl FxService {
    pub fn new(
        conf: Arc<Config>,
        backend: Arc<dyn FunctionBackend>,
        invoker: Arc<dyn Invoker>,
        metrics: Arc<MetricOptions>,
        fetcher: Arc<dyn MetricsFetcher>,
    ) -> Self {
        Self {
            conf,
            backend,
            invoker,
            metrics,
            fetcher,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.conf
    }

    pub fn metrics(&self) -> &Arc<MetricOptions> {
        &self.metrics
    }

    fn minimal_info(&self, name: &str) -> Info {
        Info {
            function_name: name.to_string(),
            timeout: format_timeout(self.conf.invoke_timeout()),
            ..Default::default()
        }
    }

    fn sidecar_info(&self, function: &Function) -> Info {
        Info {
            function_name: function.name.clone(),
            timeout: format_timeout(self.conf.invoke_timeout()),
            runtime: function.runtime.clone(),
            limits: function.limits.as_ref().map(Resources::from),
            trigger: function.trigger.as_ref().map(Trigger::from),
        }
    }

    /// Calls the function's sidecar once and records the outcome. The
    /// metadata lookup and the sidecar call share one deadline. Unknown
    /// functions are rejected before any series is touched.
    pub async fn invoke(
        &self,
        req: InvokeServiceRequest,
    ) -> Result<String, GatewayError> {
        let InvokeServiceRequest { service, input } = req;
        require(&service, "service name")?;
        let timeout = self.conf.invoke_timeout();
        let deadline = Instant::now() + timeout;
        let lookup = self.backend.get(&service);
        let info = match tokio::time::timeout_at(deadline, lookup).await {
            Ok(Ok(function)) => self.sidecar_info(&function),
            Ok(Err(e @ BackendError::NotFound(_))) => return Err(e.into()),
            Ok(Err(e)) => {
                warn!(
                    function = %service,
                    error = %e,
                    "metadata lookup failed"
                );
                self.minimal_info(&service)
            }
            Err(_) => {
                warn!(function = %service, "metadata lookup timed out");
                self.minimal_info(&service)
            }
        };
        let target = InvokeTarget {
            name: service.clone(),
            namespace: self.conf.function_namespace.clone(),
            port: self.conf.fxwatcher_port,
        };
        let request = fx_pb::Request {
            input,
            info: Some(info),
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        let guard = self.metrics.start(&service);
        let result = self.invoker.invoke(&target, request, remaining).await;
        let outcome = Outcome::from(&result);
        let elapsed = guard.finish(outcome);
        debug!(
            function = %service,
            ?elapsed,
            outcome = outcome.as_str(),
            "invoked"
        );
        Ok(result?)
    }

    pub async fn list(&self) -> Result<Vec<Function>, GatewayError> {
        let functions = self.backend.list().await?;
        Ok(add_metrics_functions(functions, self.fetcher.as_ref()).await)
    }

    pub async fn deploy(
        &self,
        spec: CreateFunctionRequest,
    ) -> Result<(), GatewayError> {
        require(&spec.service, "service name")?;
        self.backend.create(&spec).await?;
        info!(
            function = %spec.service,
            image = %spec.image,
            "deployed function"
        );
        Ok(())
    }

    pub async fn update(
        &self,
        spec: CreateFunctionRequest,
    ) -> Result<(), GatewayError> {
        require(&spec.service, "service name")?;
        self.backend.update(&spec).await?;
        info!(
            function = %spec.service,
            image = %spec.image,
            "updated function"
        );
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<(), GatewayError> {
        require(name, "function name")?;
        self.backend.delete(name).await?;
        info!(function = %name, "deleted function");
        Ok(())
    }

    pub async fn get_meta(
        &self,
        name: &str,
    ) -> Result<Function, GatewayError> {
        require(name, "function name")?;
        let function = self.backend.get(name).await?;
        Ok(add_metrics_function(function, self.fetcher.as_ref()).await)
    }

    pub async fn get_log(&self, name: &str) -> Result<String, GatewayError> {
        require(name, "function name")?;
        Ok(self.backend.logs(name).await?)
    }

    pub async fn replica_update(
        &self,
        name: &str,
        replicas: u64,
    ) -> Result<(), GatewayError> {
        require(name, "service name")?;
        self.backend.scale(name, replicas).await?;
        info!(function = %name, replicas, "scaled function");
        Ok(())
    }

    pub async fn info(&self) -> Result<String, GatewayError> {
        let version = self.backend.version().await?;
        Ok(format!(
            "fx-gateway {}; {}",
            env!("CARGO_PKG_VERSION"),
            version
        ))
    }

    /// Liveness only. Never consults the backend.
    pub fn health_check(&self) -> String {
        fx_pb::OK.to_string()
    }
}
