use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use once_cell::sync::Lazy;
use semver::{Version, VersionReq};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::HephaestusError;
use crate::telemetry::MetricsRegistry;

use super::{Plugin, PluginMetadata, PluginRegistry, PluginResult, ToolRequirement};

/// The running service's own compatibility version, checked against each
/// manifest's declared `runtime_spec`.
pub static HOST_VERSION: Lazy<Version> = Lazy::new(|| Version::new(1, 0, 0));

#[derive(Debug, Clone, Deserialize)]
pub struct DependencySpec {
    pub kind: String,
    pub name: String,
    pub version_spec: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketplaceManifest {
    pub name: String,
    pub version: Version,
    pub description: Option<String>,
    pub author: Option<String>,
    pub runtime_spec: String,
    pub entrypoint: String,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SignatureBundle {
    digest_algorithm: String,
    digest: String,
    identity: String,
}

/// Governs whether marketplace plugins must carry a valid signature bundle
/// and which issuer identities are accepted.
#[derive(Debug, Clone, Default)]
pub struct TrustPolicy {
    pub require_signature: bool,
    pub default_identities: Vec<String>,
    pub per_plugin_identities: std::collections::HashMap<String, Vec<String>>,
}

impl TrustPolicy {
    fn accepted_identities<'a>(&'a self, plugin: &str) -> &'a [String] {
        self.per_plugin_identities
            .get(plugin)
            .map(|v| v.as_slice())
            .unwrap_or(&self.default_identities)
    }
}

/// A plugin sourced from the marketplace registry, invoked as an external
/// command at its verified entrypoint path.
struct MarketplacePlugin {
    metadata: PluginMetadata,
    entrypoint: PathBuf,
}

impl Plugin for MarketplacePlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn run(&self, config: &Value) -> PluginResult {
        let mut command = Command::new(&self.entrypoint);
        if let Some(workspace) = config.get("workspace").and_then(Value::as_str) {
            command.current_dir(workspace);
        }
        match command.output() {
            Ok(output) => PluginResult {
                success: output.status.success(),
                message: format!("{} completed", self.metadata.name),
                details: serde_json::json!({
                    "stdout": String::from_utf8_lossy(&output.stdout),
                    "stderr": String::from_utf8_lossy(&output.stderr),
                }),
                exit_code: output.status.code(),
            },
            Err(e) => PluginResult {
                success: false,
                message: format!("failed to invoke marketplace plugin: {e}"),
                details: Value::Null,
                exit_code: None,
            },
        }
    }
}

/// Loads, verifies, and registers one marketplace entry.
///
/// `requested_version` is the version pinned in the plugin configuration
/// file; it must equal the manifest's declared version.
pub fn load_and_register(
    registry_root: &str,
    name: &str,
    requested_version: &str,
    trust: &TrustPolicy,
    plugin_registry: &PluginRegistry,
    metrics: &MetricsRegistry,
) -> Result<(), HephaestusError> {
    metrics.increment("marketplace.fetch");
    let root = PathBuf::from(registry_root);
    let manifest_path = root.join(format!("{name}.toml"));
    let manifest = load_manifest(&manifest_path)?;

    if manifest.version.to_string() != requested_version {
        return Err(HephaestusError::Validation(format!(
            "version {requested_version} is not available for plugin '{name}'"
        )));
    }

    let runtime_req = VersionReq::parse(&manifest.runtime_spec).map_err(|e| {
        HephaestusError::Validation(format!("invalid runtime_spec for '{name}': {e}"))
    })?;
    if !runtime_req.matches(&HOST_VERSION) {
        return Err(HephaestusError::Integrity(format!(
            "plugin '{name}' requires runtime {} but host is {}",
            manifest.runtime_spec,
            HOST_VERSION.to_string()
        )));
    }

    let entrypoint = resolve_within_root(&root, &manifest.entrypoint)?;
    if !entrypoint.is_file() {
        return Err(HephaestusError::Integrity(format!(
            "plugin '{name}' entrypoint is not a regular file"
        )));
    }

    verify_signature(&root, name, &manifest, &entrypoint, trust, metrics)?;
    resolve_dependencies(&root, &manifest, plugin_registry)?;
    metrics.increment("marketplace.dependencies_resolved");

    let metadata = PluginMetadata {
        name: manifest.name.clone(),
        version: manifest.version.clone(),
        description: manifest.description.clone().unwrap_or_default(),
        author: manifest.author.clone().unwrap_or_default(),
        category: "marketplace".to_string(),
        requires: manifest
            .dependencies
            .iter()
            .map(|d| ToolRequirement {
                tool: d.name.clone(),
                version_spec: VersionReq::parse(&d.version_spec).ok(),
            })
            .collect(),
        order: 100,
    };
    plugin_registry.register(Arc::new(MarketplacePlugin {
        metadata,
        entrypoint,
    }))?;
    metrics.increment("marketplace.registered");
    Ok(())
}

fn load_manifest(path: &Path) -> Result<MarketplaceManifest, HephaestusError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        HephaestusError::Validation(format!("failed to read manifest {}: {e}", path.display()))
    })?;
    toml::from_str(&raw)
        .map_err(|e| HephaestusError::Validation(format!("malformed manifest {}: {e}", path.display())))
}

/// Resolves `relative` against `root`, rejecting any result that escapes it.
fn resolve_within_root(root: &Path, relative: &str) -> Result<PathBuf, HephaestusError> {
    let candidate = root.join(relative);
    let root_abs = root
        .canonicalize()
        .unwrap_or_else(|_| root.to_path_buf());
    let candidate_abs = candidate
        .parent()
        .and_then(|p| p.canonicalize().ok())
        .map(|p| p.join(candidate.file_name().unwrap_or_default()))
        .unwrap_or_else(|| candidate.clone());
    if !candidate_abs.starts_with(&root_abs) {
        return Err(HephaestusError::Integrity(format!(
            "path '{relative}' resolves outside the marketplace registry root"
        )));
    }
    Ok(candidate)
}

fn verify_signature(
    root: &Path,
    name: &str,
    manifest: &MarketplaceManifest,
    entrypoint: &Path,
    trust: &TrustPolicy,
    metrics: &MetricsRegistry,
) -> Result<(), HephaestusError> {
    if !trust.require_signature {
        return Ok(());
    }
    let signature_rel = manifest.signature.as_ref().ok_or_else(|| {
        HephaestusError::Integrity(format!("plugin '{name}' is missing a required signature"))
    })?;
    let bundle_path = resolve_within_root(root, signature_rel)?;
    let raw = std::fs::read_to_string(&bundle_path).map_err(|e| {
        HephaestusError::Integrity(format!("failed to read signature bundle: {e}"))
    })?;
    let bundle: SignatureBundle = serde_json::from_str(&raw)
        .map_err(|e| HephaestusError::Integrity(format!("malformed signature bundle: {e}")))?;

    if bundle.digest_algorithm != "sha256" {
        return Err(HephaestusError::Integrity(format!(
            "unsupported digest algorithm '{}' for plugin '{name}'",
            bundle.digest_algorithm
        )));
    }

    let artifact_bytes = std::fs::read(entrypoint).map_err(|e| {
        HephaestusError::Integrity(format!("failed to read plugin artifact: {e}"))
    })?;
    let computed = hex::encode(Sha256::digest(&artifact_bytes));
    if !computed.eq_ignore_ascii_case(&bundle.digest) {
        return Err(HephaestusError::Integrity(format!(
            "signature digest mismatch for plugin '{name}'"
        )));
    }

    let accepted = trust.accepted_identities(name);
    if !accepted.iter().any(|id| id == &bundle.identity) {
        return Err(HephaestusError::Integrity(format!(
            "plugin '{name}' signed by untrusted identity '{}'",
            bundle.identity
        )));
    }

    metrics.increment("marketplace.verified");
    Ok(())
}

fn resolve_dependencies(
    root: &Path,
    manifest: &MarketplaceManifest,
    plugin_registry: &PluginRegistry,
) -> Result<(), HephaestusError> {
    let installed = read_installed_packages(root);
    for dep in &manifest.dependencies {
        match dep.kind.as_str() {
            "plugin" => {
                if plugin_registry.get(&dep.name).is_none() {
                    return Err(HephaestusError::Validation(format!(
                        "plugin dependency '{}' is not registered",
                        dep.name
                    )));
                }
            }
            "runtime-package" => {
                let version = installed.get(&dep.name).ok_or_else(|| {
                    HephaestusError::Validation(format!(
                        "runtime package '{}' is not installed",
                        dep.name
                    ))
                })?;
                let req = VersionReq::parse(&dep.version_spec).map_err(|e| {
                    HephaestusError::Validation(format!(
                        "invalid version spec for '{}': {e}",
                        dep.name
                    ))
                })?;
                let installed_version = Version::parse(version).map_err(|e| {
                    HephaestusError::Validation(format!(
                        "malformed installed version for '{}': {e}",
                        dep.name
                    ))
                })?;
                if !req.matches(&installed_version) {
                    return Err(HephaestusError::Validation(format!(
                        "installed '{}' version {version} does not satisfy {}",
                        dep.name, dep.version_spec
                    )));
                }
            }
            other => {
                return Err(HephaestusError::Validation(format!(
                    "unknown dependency kind '{other}'"
                )))
            }
        }
    }
    Ok(())
}

fn read_installed_packages(root: &Path) -> std::collections::HashMap<String, String> {
    let path = root.join("installed-packages.json");
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(path: &Path, contents: &str) {
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn registers_unsigned_plugin_when_signature_not_required() {
        let dir = tempfile::tempdir().unwrap();
        let entry_path = dir.path().join("run.sh");
        write_file(&entry_path, "#!/bin/sh\nexit 0\n");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&entry_path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        write_file(
            &dir.path().join("example-plugin.toml"),
            r#"
name = "example-plugin"
version = "1.0.0"
runtime_spec = "^1.0.0"
entrypoint = "run.sh"
"#,
        );

        let plugin_registry = PluginRegistry::new();
        let metrics = MetricsRegistry::new();
        let trust = TrustPolicy::default();
        load_and_register(
            dir.path().to_str().unwrap(),
            "example-plugin",
            "1.0.0",
            &trust,
            &plugin_registry,
            &metrics,
        )
        .unwrap();
        assert!(plugin_registry.get("example-plugin").is_some());
        assert_eq!(metrics.value("marketplace.registered"), 1);
    }

    #[test]
    fn rejects_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("run.sh"), "#!/bin/sh\nexit 0\n");
        write_file(
            &dir.path().join("example-plugin.toml"),
            r#"
name = "example-plugin"
version = "1.0.0"
runtime_spec = "^1.0.0"
entrypoint = "run.sh"
"#,
        );
        let plugin_registry = PluginRegistry::new();
        let metrics = MetricsRegistry::new();
        let trust = TrustPolicy::default();
        let err = load_and_register(
            dir.path().to_str().unwrap(),
            "example-plugin",
            "9.9.9",
            &trust,
            &plugin_registry,
            &metrics,
        )
        .unwrap_err();
        assert!(err.to_string().contains("9.9.9"));
    }

    #[test]
    fn rejects_entrypoint_escaping_registry_root() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            &dir.path().join("escape-plugin.toml"),
            r#"
name = "escape-plugin"
version = "1.0.0"
runtime_spec = "^1.0.0"
entrypoint = "../../etc/passwd"
"#,
        );
        let plugin_registry = PluginRegistry::new();
        let metrics = MetricsRegistry::new();
        let trust = TrustPolicy::default();
        let err = load_and_register(
            dir.path().to_str().unwrap(),
            "escape-plugin",
            "1.0.0",
            &trust,
            &plugin_registry,
            &metrics,
        )
        .unwrap_err();
        assert!(matches!(err, HephaestusError::Integrity(_)));
    }

    #[test]
    fn signature_digest_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("run.sh"), "#!/bin/sh\nexit 0\n");
        write_file(
            &dir.path().join("run.sh.sigstore"),
            r#"{"digest_algorithm":"sha256","digest":"deadbeef","identity":"builder@example.com"}"#,
        );
        write_file(
            &dir.path().join("example-plugin.toml"),
            r#"
name = "example-plugin"
version = "1.0.0"
runtime_spec = "^1.0.0"
entrypoint = "run.sh"
signature = "run.sh.sigstore"
"#,
        );
        let plugin_registry = PluginRegistry::new();
        let metrics = MetricsRegistry::new();
        let trust = TrustPolicy {
            require_signature: true,
            default_identities: vec!["builder@example.com".to_string()],
            per_plugin_identities: Default::default(),
        };
        let err = load_and_register(
            dir.path().to_str().unwrap(),
            "example-plugin",
            "1.0.0",
            &trust,
            &plugin_registry,
            &metrics,
        )
        .unwrap_err();
        assert!(matches!(err, HephaestusError::Integrity(_)));
    }
}
