pub mod backend;
mod conf;
pub mod error;
mod handler;
pub mod invoke;
mod logging;
pub mod metrics;
pub mod mux;
mod service;

pub use conf::Config;
pub use handler::{build_router, build_rpc};
pub use service::FxService;

use backend::{FunctionBackend, KubeBackend, MemoryBackend};
use invoke::GrpcInvoker;
use metrics::{
    Exporter, MetricOptions, MetricsFetcher, PrometheusQuery, RegistryFetcher,
};
use mux::Mux;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub async fn start_server(config: Config) -> Result<(), BoxError> {
    logging::setup_tracing("info", config.json_logs())?;

    let conf = Arc::new(config);
    let backend = build_backend(&conf).await?;
    let metrics = Arc::new(MetricOptions::new()?);
    let fetcher = build_fetcher(&conf, metrics.clone());
    let service = FxService::new(
        conf.clone(),
        backend.clone(),
        Arc::new(GrpcInvoker::new()),
        metrics.clone(),
        fetcher,
    );
    Exporter::new(metrics, backend)
        .start_service_watcher(conf.watch_interval());

    let listener = TcpListener::bind(("0.0.0.0", conf.tcp_port)).await?;
    info!("start server on port {:?}", conf.tcp_port);
    serve(listener, service, shutdown_signal()).await
}

async fn build_backend(
    conf: &Config,
) -> Result<Arc<dyn FunctionBackend>, BoxError> {
    match conf.backend.to_ascii_lowercase().as_str() {
        "kubernetes" | "k8s" => {
            let client = kube::Client::try_default().await?;
            info!(
                namespace = %conf.function_namespace,
                "using kubernetes backend"
            );
            Ok(Arc::new(KubeBackend::new(client, conf.deploy_options())))
        }
        "memory" => {
            info!(
                namespace = %conf.function_namespace,
                "using in-memory backend"
            );
            let namespace = conf.function_namespace.clone();
            Ok(Arc::new(MemoryBackend::new(namespace)))
        }
        other => Err(format!("unknown backend '{}'", other).into()),
    }
}

fn build_fetcher(
    conf: &Config,
    metrics: Arc<MetricOptions>,
) -> Arc<dyn MetricsFetcher> {
    match conf.prometheus_host.as_deref() {
        Some(host) if !host.is_empty() => {
            info!(
                %host,
                port = conf.prometheus_port,
                "enriching from prometheus"
            );
            Arc::new(PrometheusQuery::new(
                host,
                conf.prometheus_port,
                reqwest::Client::new(),
            ))
        }
        _ => Arc::new(RegistryFetcher::new(metrics)),
    }
}

/// Serves both protocols on `listener` until `shutdown` completes. Any serve
/// loop ending on its own is an error.
pub async fn serve<F>(
    listener: TcpListener,
    service: FxService,
    shutdown: F,
) -> Result<(), BoxError>
where
    F: Future<Output = ()> + Send,
{
    let conf = service.config().clone();
    let (mux, rpc_incoming, http_listener) =
        Mux::new(listener, conf.read_timeout())?;
    let rpc = build_rpc(service.clone(), &conf)?;
    let router = build_router(service, conf.write_timeout());

    tokio::select! {
        res = mux.run() => {
            error!("demultiplexer stopped: {:?}", res);
            Err(format!("demultiplexer stopped: {:?}", res).into())
        }
        res = rpc.serve_with_incoming(rpc_incoming) => {
            error!("rpc server stopped: {:?}", res);
            Err(format!("rpc server stopped: {:?}", res).into())
        }
        res = axum::serve(http_listener, router).into_future() => {
            error!("http server stopped: {:?}", res);
            Err(format!("http server stopped: {:?}", res).into())
        }
        _ = shutdown => {
            info!("shutdown signal received");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
