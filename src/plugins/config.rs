use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::HephaestusError;

/// A `[builtin]` table entry: either a bare boolean toggle or an object
/// carrying an explicit `enabled` flag plus per-plugin configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BuiltinEntry {
    Toggle(bool),
    Detailed {
        #[serde(default = "default_true")]
        enabled: bool,
        #[serde(default = "default_toml_value")]
        config: toml::Value,
    },
}

fn default_true() -> bool {
    true
}

fn default_toml_value() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl BuiltinEntry {
    pub fn enabled(&self) -> bool {
        match self {
            BuiltinEntry::Toggle(flag) => *flag,
            BuiltinEntry::Detailed { enabled, .. } => *enabled,
        }
    }

    pub fn config(&self) -> Value {
        match self {
            BuiltinEntry::Toggle(_) => Value::Null,
            BuiltinEntry::Detailed { config, .. } => toml_to_json(config),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalEntry {
    pub name: String,
    /// In-process factory key. A filesystem `path` is accepted for
    /// documentation parity with the config format but is not itself
    /// dynamically loaded; the factory key is what the engine resolves.
    pub module: Option<String>,
    pub path: Option<String>,
    #[serde(default = "default_toml_value")]
    pub config: toml::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketplaceEntry {
    pub name: String,
    pub version: String,
    #[serde(default = "default_toml_value")]
    pub config: toml::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginsConfig {
    #[serde(default)]
    pub builtin: HashMap<String, BuiltinEntry>,
    #[serde(default)]
    pub external: Vec<ExternalEntry>,
    #[serde(default)]
    pub marketplace: Vec<MarketplaceEntry>,
}

impl PluginsConfig {
    pub fn load(path: &str) -> Result<Self, HephaestusError> {
        if !std::path::Path::new(path).exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HephaestusError::Internal(format!("failed to read plugin config {path}: {e}"))
        })?;
        toml::from_str(&raw).map_err(|e| {
            HephaestusError::Internal(format!("malformed plugin config {path}: {e}"))
        })
    }

    pub fn builtin_enabled(&self, name: &str) -> bool {
        self.builtin.get(name).map(|e| e.enabled()).unwrap_or(true)
    }
}

fn toml_to_json(value: &toml::Value) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_config_file_yields_default() {
        let config = PluginsConfig::load("/nonexistent/plugins.toml").unwrap();
        assert!(config.builtin.is_empty());
        assert!(config.builtin_enabled("lint-check"));
    }

    #[test]
    fn parses_builtin_toggle_and_marketplace_entries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[builtin]
format-check = false
lint-check = {{ enabled = true, config = {{ args = ["--select", "E"] }} }}

[[marketplace]]
name = "example-plugin"
version = "1.0.0"
"#
        )
        .unwrap();
        let config = PluginsConfig::load(file.path().to_str().unwrap()).unwrap();
        assert!(!config.builtin_enabled("format-check"));
        assert!(config.builtin_enabled("lint-check"));
        assert_eq!(config.marketplace.len(), 1);
        assert_eq!(config.marketplace[0].name, "example-plugin");
    }
}
