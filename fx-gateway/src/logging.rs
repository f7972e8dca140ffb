use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Installs the global subscriber. `RUST_LOG` wins over `default_level`.
pub fn setup_tracing(
    default_level: &str,
    json_format: bool,
) -> Result<(), TryInitError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_line_number(true);
    let fmt_layer = if json_format {
        fmt_layer.json().boxed()
    } else {
        fmt_layer.boxed()
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    Registry::default().with(env_filter).with(fmt_layer).try_init()
}
