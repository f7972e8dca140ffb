use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

mod exporter;
mod fetcher;

pub use exporter::Exporter;
pub use fetcher::{
    FunctionMetrics, MetricsFetcher, PrometheusQuery, RegistryFetcher,
    add_metrics_function, add_metrics_functions,
};

pub const INVOCATION_TOTAL: &str = "gateway_function_invocation_total";
pub const INVOCATION_SECONDS: &str = "gateway_functions_seconds";
pub const SERVICE_COUNT: &str = "gateway_service_count";
pub const LAST_SUCCESS: &str = "gateway_function_last_success";

const FUNCTION_LABEL: &str = "function_name";
const OUTCOME_LABEL: &str = "outcome";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

impl<T, E> From<&Result<T, E>> for Outcome {
    fn from(value: &Result<T, E>) -> Self {
        if value.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

/// Process-wide metric series, keyed by function name. Created once at
/// startup and shared by `Arc`; every series is internally synchronized.
pub struct MetricOptions {
    registry: Registry,
    pub invocation_total: IntCounterVec,
    pub invocation_duration: HistogramVec,
    pub service_replicas: IntGaugeVec,
    pub last_success: IntGaugeVec,
}

impl MetricOptions {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let invocation_total = IntCounterVec::new(
            Opts::new(INVOCATION_TOTAL, "Individual function metrics"),
            &[FUNCTION_LABEL, OUTCOME_LABEL],
        )?;
        let invocation_duration = HistogramVec::new(
            HistogramOpts::new(
                INVOCATION_SECONDS,
                "Function time taken in seconds",
            ),
            &[FUNCTION_LABEL],
        )?;
        let service_replicas = IntGaugeVec::new(
            Opts::new(SERVICE_COUNT, "Current count of replicas for function"),
            &[FUNCTION_LABEL],
        )?;
        let last_success = IntGaugeVec::new(
            Opts::new(
                LAST_SUCCESS,
                "1 if the last invocation of the function succeeded",
            ),
            &[FUNCTION_LABEL],
        )?;
        registry.register(Box::new(invocation_total.clone()))?;
        registry.register(Box::new(invocation_duration.clone()))?;
        registry.register(Box::new(service_replicas.clone()))?;
        registry.register(Box::new(last_success.clone()))?;
        Ok(Self {
            registry,
            invocation_total,
            invocation_duration,
            service_replicas,
            last_success,
        })
    }

    /// Records one completed invocation. Never blocks on I/O.
    pub fn notify(&self, function: &str, elapsed: Duration, outcome: Outcome) {
        self.invocation_total
            .with_label_values(&[function, outcome.as_str()])
            .inc();
        self.invocation_duration
            .with_label_values(&[function])
            .observe(elapsed.as_secs_f64());
        self.last_success
            .with_label_values(&[function])
            .set((outcome == Outcome::Success) as i64);
    }

    /// Starts timing one invocation. The returned guard records a failure
    /// when dropped before `finish`, so an abandoned call is still counted.
    pub fn start<'a>(&'a self, function: &'a str) -> InvocationGuard<'a> {
        InvocationGuard {
            metrics: self,
            function,
            start: Instant::now(),
            armed: true,
        }
    }

    pub fn set_replicas(&self, function: &str, replicas: u64) {
        self.service_replicas
            .with_label_values(&[function])
            .set(i64::try_from(replicas).unwrap_or(i64::MAX));
    }

    /// Current replica gauge value, if the function was ever observed.
    pub fn replicas(&self, function: &str) -> Option<i64> {
        self.snapshot().get(function).and_then(|m| m.replicas)
    }

    /// Count of invocations recorded for a function and outcome.
    pub fn invocations(&self, function: &str, outcome: Outcome) -> u64 {
        self.snapshot()
            .get(function)
            .map(|m| match outcome {
                Outcome::Success => m.success,
                Outcome::Failure => m.failure,
            })
            .unwrap_or(0)
    }

    /// Reads every function series without creating new ones.
    pub fn snapshot(&self) -> HashMap<String, SeriesSnapshot> {
        let mut out: HashMap<String, SeriesSnapshot> = HashMap::new();
        for family in self.registry.gather() {
            for metric in family.get_metric() {
                let mut function = None;
                let mut outcome = None;
                for label in metric.get_label() {
                    match label.get_name() {
                        FUNCTION_LABEL => function = Some(label.get_value()),
                        OUTCOME_LABEL => outcome = Some(label.get_value()),
                        _ => {}
                    }
                }
                let Some(function) = function else { continue };
                let entry = out.entry(function.to_string()).or_default();
                match family.get_name() {
                    INVOCATION_TOTAL => {
                        let v = metric.get_counter().get_value() as u64;
                        if outcome == Some(Outcome::Success.as_str()) {
                            entry.success += v;
                        } else {
                            entry.failure += v;
                        }
                    }
                    INVOCATION_SECONDS => {
                        let h = metric.get_histogram();
                        entry.duration_sum += h.get_sample_sum();
                        entry.duration_count += h.get_sample_count();
                    }
                    SERVICE_COUNT => {
                        let v = metric.get_gauge().get_value() as i64;
                        entry.replicas = Some(v);
                    }
                    LAST_SUCCESS => {
                        entry.last_success =
                            Some(metric.get_gauge().get_value() >= 1.0);
                    }
                    _ => {}
                }
            }
        }
        out
    }

    /// Prometheus text exposition of the registry.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf)
            .map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Records exactly one outcome for an in-flight invocation.
pub struct InvocationGuard<'a> {
    metrics: &'a MetricOptions,
    function: &'a str,
    start: Instant,
    armed: bool,
}

impl InvocationGuard<'_> {
    pub fn finish(mut self, outcome: Outcome) -> Duration {
        self.armed = false;
        let elapsed = self.start.elapsed();
        self.metrics.notify(self.function, elapsed, outcome);
        elapsed
    }
}

impl Drop for InvocationGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let elapsed = self.start.elapsed();
            self.metrics.notify(self.function, elapsed, Outcome::Failure);
            debug!(function = %self.function, ?elapsed, "invocation abandoned");
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SeriesSnapshot {
    pub success: u64,
    pub failure: u64,
    pub duration_sum: f64,
    pub duration_count: u64,
    pub replicas: Option<i64>,
    pub last_success: Option<bool>,
}
