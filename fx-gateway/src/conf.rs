use envconfig::Envconfig;
use std::time::Duration;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "TCP_PORT", default = "10000")]
    pub tcp_port: u16,
    #[envconfig(from = "FUNCTION_NAMESPACE", default = "openfx-fn")]
    pub function_namespace: String,
    /// Port the per-function sidecar listens on.
    #[envconfig(from = "FXWATCHER_PORT", default = "50051")]
    pub fxwatcher_port: u16,
    #[envconfig(from = "INVOKE_TIMEOUT_MS", default = "60000")]
    pub invoke_timeout_ms: u64,
    #[envconfig(from = "READ_TIMEOUT_MS", default = "10000")]
    pub read_timeout_ms: u64,
    #[envconfig(from = "WRITE_TIMEOUT_MS", default = "10000")]
    pub write_timeout_ms: u64,
    #[envconfig(from = "IDLE_TIMEOUT_MS", default = "60000")]
    pub idle_timeout_ms: u64,
    #[envconfig(from = "IMAGE_PULL_POLICY", default = "Always")]
    pub image_pull_policy: String,
    #[envconfig(from = "ENABLE_HTTP_PROBE", default = "false")]
    pub enable_http_probe: bool,
    #[envconfig(from = "SECRET_MOUNT_PATH", default = "/var/openfx/secrets")]
    pub secret_mount_path: String,
    #[envconfig(from = "WATCH_INTERVAL_MS", default = "5000")]
    pub watch_interval_ms: u64,
    #[envconfig(from = "PROMETHEUS_HOST")]
    pub prometheus_host: Option<String>,
    #[envconfig(from = "PROMETHEUS_PORT", default = "9090")]
    pub prometheus_port: u16,
    /// Either "kubernetes" or "memory".
    #[envconfig(from = "BACKEND", default = "kubernetes")]
    pub backend: String,
    // "json" or "plain"/"text"; unset picks plain
    #[envconfig(from = "LOG_FORMAT")]
    pub log_format: Option<String>,
}

impl Config {
    #[inline]
    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }

    #[inline]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    #[inline]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    #[inline]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    #[inline]
    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }

    pub fn json_logs(&self) -> bool {
        match self.log_format.as_deref().map(|s| s.to_ascii_lowercase()) {
            Some(ref v) if v == "json" || v == "structured" => true,
            _ => false,
        }
    }

    /// Settings handed to the orchestration backend when rendering workloads.
    pub fn deploy_options(&self) -> crate::backend::DeployOptions {
        crate::backend::DeployOptions {
            namespace: self.function_namespace.clone(),
            fxwatcher_port: self.fxwatcher_port,
            image_pull_policy: self.image_pull_policy.clone(),
            enable_http_probe: self.enable_http_probe,
            secret_mount_path: self.secret_mount_path.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tcp_port: 10000,
            function_namespace: "openfx-fn".into(),
            fxwatcher_port: 50051,
            invoke_timeout_ms: 60000,
            read_timeout_ms: 10000,
            write_timeout_ms: 10000,
            idle_timeout_ms: 60000,
            image_pull_policy: "Always".into(),
            enable_http_probe: false,
            secret_mount_path: "/var/openfx/secrets".into(),
            watch_interval_ms: 5000,
            prometheus_host: None,
            prometheus_port: 9090,
            backend: "kubernetes".into(),
            log_format: None,
        }
    }
}
