use std::sync::Arc;
use std::time::Duration;

use crate::analytics::AnalyticsBuffer;
use crate::audit::AuditSink;
use crate::auth::Keystore;
use crate::config::HephaestusConfig;
use crate::error::HephaestusError;
use crate::plugins::marketplace::TrustPolicy;
use crate::plugins::PluginRegistry;
use crate::task_manager::TaskManager;
use crate::telemetry::MetricsRegistry;

/// Every shared collaborator a handler might need, composed once at
/// startup and injected as axum/tonic state rather than read from globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HephaestusConfig>,
    pub keystore: Arc<Keystore>,
    pub task_manager: Arc<TaskManager>,
    pub plugin_registry: Arc<PluginRegistry>,
    pub analytics: Arc<AnalyticsBuffer>,
    pub audit: Arc<AuditSink>,
    pub metrics: Arc<MetricsRegistry>,
    pub trust_policy: Arc<TrustPolicy>,
}

impl AppState {
    pub fn new(config: HephaestusConfig) -> Result<Self, HephaestusError> {
        let keystore = Keystore::load(&config.service_account_keys_path)?;
        let audit = AuditSink::new(&config.audit_log_dir)?;
        let task_manager = TaskManager::new(
            config.task_max_concurrent,
            Duration::from_secs(config.task_retention_secs),
            Duration::from_secs(config.task_default_timeout_secs),
        );

        Ok(Self {
            keystore: Arc::new(keystore),
            task_manager: Arc::new(task_manager),
            plugin_registry: Arc::new(PluginRegistry::new()),
            analytics: Arc::new(AnalyticsBuffer::default()),
            audit: Arc::new(audit),
            metrics: Arc::new(MetricsRegistry::new()),
            trust_policy: Arc::new(TrustPolicy::default()),
            config: Arc::new(config),
        })
    }
}
