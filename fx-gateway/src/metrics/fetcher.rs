use async_trait::async_trait;
use fx_pb::Function;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{MetricOptions, Outcome};
use crate::error::FetchError;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FunctionMetrics {
    pub invocation_count: u64,
    pub average_duration_seconds: f64,
    pub last_status: Option<Outcome>,
}

/// Source of live per-function metrics used to decorate List/GetMeta.
#[async_trait]
pub trait MetricsFetcher: Send + Sync {
    async fn fetch(
        &self,
    ) -> Result<HashMap<String, FunctionMetrics>, FetchError>;
}

/// Reads the gateway's own registry.
pub struct RegistryFetcher {
    metrics: Arc<MetricOptions>,
}

impl RegistryFetcher {
    pub fn new(metrics: Arc<MetricOptions>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl MetricsFetcher for RegistryFetcher {
    async fn fetch(
        &self,
    ) -> Result<HashMap<String, FunctionMetrics>, FetchError> {
        Ok(self
            .metrics
            .snapshot()
            .into_iter()
            .map(|(name, s)| {
                let average = if s.duration_count > 0 {
                    s.duration_sum / s.duration_count as f64
                } else {
                    0.0
                };
                let last_status = s.last_success.map(|ok| {
                    if ok { Outcome::Success } else { Outcome::Failure }
                });
                (
                    name,
                    FunctionMetrics {
                        invocation_count: s.success + s.failure,
                        average_duration_seconds: average,
                        last_status,
                    },
                )
            })
            .collect())
    }
}

/// Queries a Prometheus server that scrapes every gateway replica.
pub struct PrometheusQuery {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<QueryData>,
}

#[derive(Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<VectorSample>,
}

#[derive(Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: HashMap<String, String>,
    value: (f64, String),
}

impl PrometheusQuery {
    pub fn new(host: &str, port: u16, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: format!("http://{}:{}", host, port),
        }
    }

    async fn query(&self, expr: &str) -> Result<Vec<VectorSample>, FetchError> {
        let url = format!("{}/api/v1/query", self.base_url);
        let resp: QueryResponse = self
            .client
            .get(&url)
            .query(&[("query", expr)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if resp.status != "success" {
            return Err(FetchError::Rejected(
                resp.error.unwrap_or(resp.status),
            ));
        }
        Ok(resp.data.map(|d| d.result).unwrap_or_default())
    }
}

fn samples_by_function(
    samples: Vec<VectorSample>,
) -> impl Iterator<Item = (String, f64)> {
    samples.into_iter().filter_map(|s| {
        let name = s.metric.get("function_name")?.clone();
        let value = s.value.1.parse::<f64>().ok()?;
        Some((name, value))
    })
}

#[async_trait]
impl MetricsFetcher for PrometheusQuery {
    async fn fetch(
        &self,
    ) -> Result<HashMap<String, FunctionMetrics>, FetchError> {
        let mut out: HashMap<String, FunctionMetrics> = HashMap::new();

        let counts = self
            .query("sum(gateway_function_invocation_total) by (function_name)")
            .await?;
        for (name, v) in samples_by_function(counts) {
            out.entry(name).or_default().invocation_count = v as u64;
        }

        let avg = self
            .query(
                "sum(gateway_functions_seconds_sum) by (function_name) \
                 / sum(gateway_functions_seconds_count) by (function_name)",
            )
            .await?;
        for (name, v) in samples_by_function(avg) {
            if v.is_finite() {
                out.entry(name).or_default().average_duration_seconds = v;
            }
        }

        let last = self
            .query("min(gateway_function_last_success) by (function_name)")
            .await?;
        for (name, v) in samples_by_function(last) {
            out.entry(name).or_default().last_status = Some(if v >= 1.0 {
                Outcome::Success
            } else {
                Outcome::Failure
            });
        }
        debug!(functions = out.len(), "fetched function metrics");
        Ok(out)
    }
}

fn apply(function: &mut Function, metrics: &FunctionMetrics) {
    function.invocation_count = metrics.invocation_count;
    function.average_duration_seconds = metrics.average_duration_seconds;
    function.last_status = metrics
        .last_status
        .map(|o| o.as_str().to_string())
        .unwrap_or_default();
}

/// Decorates functions with live metrics. A failed fetch leaves them as-is.
pub async fn add_metrics_functions(
    mut functions: Vec<Function>,
    fetcher: &dyn MetricsFetcher,
) -> Vec<Function> {
    match fetcher.fetch().await {
        Ok(metrics) => {
            for f in functions.iter_mut() {
                if let Some(m) = metrics.get(&f.name) {
                    apply(f, m);
                }
            }
        }
        Err(e) => warn!(error = %e, "metrics enrichment skipped"),
    }
    functions
}

pub async fn add_metrics_function(
    function: Function,
    fetcher: &dyn MetricsFetcher,
) -> Function {
    add_metrics_functions(vec![function], fetcher)
        .await
        .pop()
        .unwrap_or_default()
}
