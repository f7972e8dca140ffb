use async_trait::async_trait;
use fx_pb::{CreateFunctionRequest, Function};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{BackendResult, FunctionBackend, validate_spec};
use crate::error::BackendError;

struct Entry {
    function: Function,
    logs: Vec<String>,
}

/// In-process backend. Functions are kept in insertion order so `list`
/// behaves like an ordered backend listing.
#[derive(Clone)]
pub struct MemoryBackend {
    namespace: String,
    store: Arc<RwLock<Vec<Entry>>>,
}

impl MemoryBackend {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            store: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Append a line to a function's log, as its runtime would.
    pub async fn push_log(
        &self,
        name: &str,
        line: impl Into<String>,
    ) -> BackendResult<()> {
        let mut store = self.store.write().await;
        let entry = find_mut(&mut store, name)?;
        entry.logs.push(line.into());
        Ok(())
    }

    fn render(&self, spec: &CreateFunctionRequest, replicas: u64) -> Function {
        Function {
            name: spec.service.clone(),
            namespace: self.namespace.clone(),
            image: spec.image.clone(),
            runtime: spec.runtime.clone(),
            limits: spec.limits.clone(),
            requests: spec.requests.clone(),
            trigger: spec.trigger.clone(),
            replicas,
            available_replicas: replicas,
            labels: spec.labels.clone(),
            annotations: spec.annotations.clone(),
            ..Default::default()
        }
    }
}

fn find_mut<'a>(
    store: &'a mut [Entry],
    name: &str,
) -> BackendResult<&'a mut Entry> {
    store
        .iter_mut()
        .find(|e| e.function.name == name)
        .ok_or_else(|| BackendError::NotFound(name.to_string()))
}

#[async_trait]
impl FunctionBackend for MemoryBackend {
    async fn create(&self, spec: &CreateFunctionRequest) -> BackendResult<()> {
        validate_spec(spec)?;
        let mut store = self.store.write().await;
        if store.iter().any(|e| e.function.name == spec.service) {
            return Err(BackendError::AlreadyExists(spec.service.clone()));
        }
        store.push(Entry {
            function: self.render(spec, 1),
            logs: Vec::new(),
        });
        Ok(())
    }

    async fn get(&self, name: &str) -> BackendResult<Function> {
        let store = self.store.read().await;
        store
            .iter()
            .find(|e| e.function.name == name)
            .map(|e| e.function.clone())
            .ok_or_else(|| BackendError::NotFound(name.to_string()))
    }

    async fn list(&self) -> BackendResult<Vec<Function>> {
        let store = self.store.read().await;
        Ok(store.iter().map(|e| e.function.clone()).collect())
    }

    async fn update(&self, spec: &CreateFunctionRequest) -> BackendResult<()> {
        validate_spec(spec)?;
        let mut store = self.store.write().await;
        let entry = find_mut(&mut store, &spec.service)?;
        let replicas = entry.function.replicas;
        entry.function = self.render(spec, replicas);
        Ok(())
    }

    async fn delete(&self, name: &str) -> BackendResult<()> {
        let mut store = self.store.write().await;
        let before = store.len();
        store.retain(|e| e.function.name != name);
        if store.len() == before {
            return Err(BackendError::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn scale(&self, name: &str, replicas: u64) -> BackendResult<()> {
        let mut store = self.store.write().await;
        let entry = find_mut(&mut store, name)?;
        entry.function.replicas = replicas;
        entry.function.available_replicas = replicas;
        Ok(())
    }

    async fn logs(&self, name: &str) -> BackendResult<String> {
        let store = self.store.read().await;
        store
            .iter()
            .find(|e| e.function.name == name)
            .map(|e| e.logs.join("\n"))
            .ok_or_else(|| BackendError::NotFound(name.to_string()))
    }

    async fn version(&self) -> BackendResult<String> {
        Ok("memory".to_string())
    }
}
