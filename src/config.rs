use once_cell::sync::Lazy;
use std::net::SocketAddr;

/// Process-wide configuration, parsed once from the environment at startup.
///
/// Handlers read settings through shared `AppState`, never via `std::env`
/// directly, so tests can construct deterministic instances.
#[derive(Debug, Clone)]
pub struct HephaestusConfig {
    pub service_account_keys_path: String,
    pub audit_log_dir: String,
    pub plugin_config_path: String,
    pub marketplace_registry: String,
    pub rest_bind: SocketAddr,
    pub grpc_bind: SocketAddr,
    pub telemetry_enabled: bool,
    pub prometheus_host: String,
    pub prometheus_port: u16,
    pub task_default_timeout_secs: u64,
    pub task_max_concurrent: usize,
    pub task_retention_secs: u64,
    pub stream_poll_interval_ms: u64,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl HephaestusConfig {
    pub fn from_env() -> Self {
        Self {
            service_account_keys_path: env_or(
                "HEPHAESTUS_SERVICE_ACCOUNT_KEYS_PATH",
                ".hephaestus/service-accounts.json",
            ),
            audit_log_dir: env_or("HEPHAESTUS_AUDIT_LOG_DIR", ".hephaestus/audit"),
            plugin_config_path: env_or(
                "HEPHAESTUS_PLUGIN_CONFIG_PATH",
                ".hephaestus/plugins.toml",
            ),
            marketplace_registry: env_or(
                "HEPHAESTUS_MARKETPLACE_REGISTRY",
                ".hephaestus/marketplace",
            ),
            rest_bind: env_or("HEPHAESTUS_REST_BIND", "0.0.0.0:8080")
                .parse()
                .expect("HEPHAESTUS_REST_BIND must be a valid socket address"),
            grpc_bind: env_or("HEPHAESTUS_GRPC_BIND", "0.0.0.0:50051")
                .parse()
                .expect("HEPHAESTUS_GRPC_BIND must be a valid socket address"),
            telemetry_enabled: env_or("HEPHAESTUS_TELEMETRY_ENABLED", "false")
                .parse()
                .unwrap_or(false),
            prometheus_host: env_or("HEPHAESTUS_PROMETHEUS_HOST", "0.0.0.0"),
            prometheus_port: env_or("HEPHAESTUS_PROMETHEUS_PORT", "9464")
                .parse()
                .unwrap_or(9464),
            task_default_timeout_secs: env_or("HEPHAESTUS_TASK_TIMEOUT_SECS", "300")
                .parse()
                .unwrap_or(300),
            task_max_concurrent: env_or("HEPHAESTUS_TASK_MAX_CONCURRENT", "100")
                .parse()
                .unwrap_or(100),
            task_retention_secs: env_or("HEPHAESTUS_TASK_RETENTION_SECS", "3600")
                .parse()
                .unwrap_or(3600),
            stream_poll_interval_ms: env_or("HEPHAESTUS_STREAM_POLL_INTERVAL_MS", "1000")
                .parse()
                .unwrap_or(1000),
            log_format: match env_or("HEPHAESTUS_LOG_FORMAT", "json").as_str() {
                "text" => LogFormat::Text,
                _ => LogFormat::Json,
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Run identifier stamped on every log record and audit event for a process lifetime.
pub static RUN_ID: Lazy<uuid::Uuid> = Lazy::new(uuid::Uuid::new_v4);
