use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::MetricOptions;
use crate::backend::FunctionBackend;

/// Keeps replica gauges in line with the orchestration backend. It is the
/// only writer of `gateway_service_count`.
#[derive(Clone)]
pub struct Exporter {
    metrics: Arc<MetricOptions>,
    backend: Arc<dyn FunctionBackend>,
}

impl Exporter {
    pub fn new(
        metrics: Arc<MetricOptions>,
        backend: Arc<dyn FunctionBackend>,
    ) -> Self {
        Self { metrics, backend }
    }

    /// One watcher pass. The gauge follows the replica count the backend
    /// reports, ready or not. Functions absent from the listing keep their
    /// last gauge value.
    pub async fn observe_replicas(&self) {
        match self.backend.list().await {
            Ok(functions) => {
                for f in &functions {
                    self.metrics.set_replicas(&f.name, f.replicas);
                }
                debug!(functions = functions.len(), "replica gauges updated");
            }
            Err(e) => warn!(error = %e, "replica watcher: list failed"),
        }
    }

    /// Runs `observe_replicas` every `interval` for the process lifetime.
    pub fn start_service_watcher(&self, interval: Duration) -> JoinHandle<()> {
        let exporter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                exporter.observe_replicas().await;
            }
        })
    }
}
