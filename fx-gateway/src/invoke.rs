use async_trait::async_trait;
use fx_pb::fx_watcher_client::FxWatcherClient;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tonic::Code;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

use crate::error::InvokeError;

/// Builds the sidecar address of a function.
pub type Resolver = fn(&str, &str, u16) -> String;

pub fn sidecar_uri(name: &str, namespace: &str, port: u16) -> String {
    format!("http://{}.{}:{}", name, namespace, port)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeTarget {
    pub name: String,
    pub namespace: String,
    pub port: u16,
}

/// Issues one bounded call to a function's sidecar. No retries.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(
        &self,
        target: &InvokeTarget,
        request: fx_pb::Request,
        timeout: Duration,
    ) -> Result<String, InvokeError>;
}

/// gRPC client for the `FxWatcher` sidecar protocol. Channels are created
/// lazily and cached per sidecar address.
pub struct GrpcInvoker {
    channels: RwLock<HashMap<String, Channel>>,
    resolve: Resolver,
}

impl Default for GrpcInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl GrpcInvoker {
    pub fn new() -> Self {
        Self::with_resolver(sidecar_uri)
    }

    pub fn with_resolver(resolve: Resolver) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            resolve,
        }
    }

    /// Connecting is bounded by the per-call timeout in `invoke`.
    async fn channel(&self, uri: &str) -> Result<Channel, InvokeError> {
        let channels = self.channels.read().await;
        if let Some(ch) = channels.get(uri) {
            return Ok(ch.clone());
        }
        drop(channels);
        let mut channels = self.channels.write().await;
        if let Some(ch) = channels.get(uri) {
            return Ok(ch.clone());
        }
        let channel = Endpoint::from_shared(uri.to_string())
            .map_err(|_| InvokeError::InvalidTarget(uri.to_string()))?
            .connect_lazy();
        info!("create sidecar channel for '{}'", uri);
        channels.insert(uri.to_string(), channel.clone());
        Ok(channel)
    }
}

fn classify(name: &str, status: tonic::Status) -> InvokeError {
    match status.code() {
        Code::DeadlineExceeded => InvokeError::Timeout(name.to_string()),
        Code::Unavailable => InvokeError::Unreachable(
            name.to_string(),
            status.message().to_string(),
        ),
        Code::Cancelled => InvokeError::Cancelled(name.to_string()),
        code => InvokeError::Failed(
            name.to_string(),
            format!("{:?}: {}", code, status.message()),
        ),
    }
}

#[async_trait]
impl Invoker for GrpcInvoker {
    async fn invoke(
        &self,
        target: &InvokeTarget,
        request: fx_pb::Request,
        timeout: Duration,
    ) -> Result<String, InvokeError> {
        let uri = (self.resolve)(&target.name, &target.namespace, target.port);
        let channel = self.channel(&uri).await?;
        let mut client = FxWatcherClient::new(channel);
        let mut req = tonic::Request::new(request);
        req.set_timeout(timeout);
        debug!(function = %target.name, %uri, "calling sidecar");
        match tokio::time::timeout(timeout, client.call(req)).await {
            Ok(Ok(resp)) => Ok(resp.into_inner().output),
            Ok(Err(status)) => Err(classify(&target.name, status)),
            Err(_) => Err(InvokeError::Timeout(target.name.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_from_name_and_namespace() {
        assert_eq!(
            sidecar_uri("echo", "openfx-fn", 50051),
            "http://echo.openfx-fn:50051"
        );
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify("f", tonic::Status::deadline_exceeded("x")),
            InvokeError::Timeout(_)
        ));
        assert!(matches!(
            classify("f", tonic::Status::unavailable("x")),
            InvokeError::Unreachable(..)
        ));
        assert!(matches!(
            classify("f", tonic::Status::internal("x")),
            InvokeError::Failed(..)
        ));
    }

    #[tokio::test]
    async fn invalid_target_is_typed() {
        let invoker = GrpcInvoker::with_resolver(|_, _, _| "not a uri".into());
        let target = InvokeTarget {
            name: "f".into(),
            namespace: "ns".into(),
            port: 1,
        };
        let err = invoker
            .invoke(
                &target,
                fx_pb::Request::default(),
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::InvalidTarget(_)));
    }

    #[tokio::test]
    async fn channels_are_cached_per_uri() {
        let invoker = GrpcInvoker::new();
        invoker.channel("http://a.ns:1").await.unwrap();
        invoker.channel("http://a.ns:1").await.unwrap();
        invoker.channel("http://b.ns:1").await.unwrap();
        assert_eq!(invoker.channels.read().await.len(), 2);
    }
}
