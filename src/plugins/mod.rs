pub mod builtin;
pub mod config;
pub mod marketplace;

use std::sync::Arc;

use dashmap::DashMap;
use semver::Version;
use serde::Serialize;
use serde_json::Value;

use crate::error::HephaestusError;

/// A version requirement on an external tool a plugin invokes (e.g. `ruff>=0.4`).
#[derive(Debug, Clone, Serialize)]
pub struct ToolRequirement {
    pub tool: String,
    pub version_spec: Option<semver::VersionReq>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PluginMetadata {
    pub name: String,
    pub version: Version,
    pub description: String,
    pub author: String,
    pub category: String,
    pub requires: Vec<ToolRequirement>,
    pub order: i32,
}

/// The outcome of running a single plugin's gate.
#[derive(Debug, Clone, Serialize)]
pub struct PluginResult {
    pub success: bool,
    pub message: String,
    pub details: Value,
    pub exit_code: Option<i32>,
}

impl PluginResult {
    pub fn missing_tools(tools: &[&str]) -> Self {
        PluginResult {
            success: false,
            message: format!("required tooling not found on PATH: {}", tools.join(", ")),
            details: serde_json::json!({ "missing": tools }),
            exit_code: None,
        }
    }
}

/// A guard-rails gate. Implementors synthesize and invoke an external
/// command; the engine never loads or executes foreign interpreter code.
pub trait Plugin: Send + Sync {
    fn metadata(&self) -> &PluginMetadata;
    fn validate_config(&self, _config: &Value) -> Result<(), HephaestusError> {
        Ok(())
    }
    fn run(&self, config: &Value) -> PluginResult;
}

/// In-process map of registered plugins, rebuilt on every discovery pass.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: DashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.plugins.clear();
    }

    pub fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), HephaestusError> {
        let name = plugin.metadata().name.clone();
        if self.plugins.contains_key(&name) {
            return Err(HephaestusError::Validation(format!(
                "plugin '{name}' is already registered"
            )));
        }
        self.plugins.insert(name, plugin);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).map(|p| p.clone())
    }

    /// All registered plugins, ordered by `order` then name, matching the
    /// sequence guard-rails executions and streaming progress must report.
    pub fn all_plugins(&self) -> Vec<Arc<dyn Plugin>> {
        let mut plugins: Vec<Arc<dyn Plugin>> =
            self.plugins.iter().map(|entry| entry.value().clone()).collect();
        plugins.sort_by(|a, b| {
            a.metadata()
                .order
                .cmp(&b.metadata().order)
                .then_with(|| a.metadata().name.cmp(&b.metadata().name))
        });
        plugins
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

/// Checks whether an executable is resolvable on the current `PATH`,
/// the Rust equivalent of `shutil.which`.
pub fn is_tool_on_path(program: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| {
        let candidate = dir.join(program);
        candidate.is_file()
    })
}
