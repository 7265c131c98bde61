use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::HephaestusError;
use crate::telemetry::{self, MetricsRegistry};

const DANGEROUS_PATHS: &[&str] = &[
    "/", "/home", "/usr", "/etc", "/var", "/bin", "/sbin", "/lib", "/lib64", "/opt", "/boot",
    "/root", "/sys", "/proc", "/dev",
];

const MACOS_METADATA: &[&str] = &[
    ".DS_Store",
    ".AppleDouble",
    "__MACOSX",
    ".Spotlight-V100",
    ".Trashes",
    ".apdisk",
];

const BUILD_ARTIFACT_NAMES: &[&str] = &[
    "build",
    "dist",
    ".tox",
    ".pytest_cache",
    ".coverage",
    ".mypy_cache",
    ".ruff_cache",
    "htmlcov",
    ".turbo",
    ".parcel-cache",
    ".rollup.cache",
    ".nyc_output",
    ".eslintcache",
    ".trunk",
];

/// Maximum number of preview/removed paths carried in a cleanup response;
/// the full lists can be found in the audit manifest when one is requested.
const PATH_PREVIEW_LIMIT: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupOptions {
    #[serde(alias = "root")]
    pub workspace_root: String,
    #[serde(default = "default_true")]
    pub python_cache: bool,
    #[serde(default = "default_true")]
    pub build_artifacts: bool,
    #[serde(default = "default_true")]
    pub node_modules: bool,
    #[serde(default)]
    pub include_git: bool,
    #[serde(default)]
    pub include_venv: bool,
    #[serde(default)]
    pub deep_clean: bool,
    #[serde(default)]
    pub extra_roots: Vec<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub audit_manifest_path: Option<String>,
    #[serde(default)]
    pub max_depth: Option<usize>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupResult {
    pub search_roots: Vec<String>,
    pub removed_paths: Vec<String>,
    pub preview_paths: Vec<String>,
    pub skipped_roots: Vec<(String, String)>,
    pub errors: Vec<(String, String)>,
    pub manifest_path: Option<String>,
    /// Conservative sum of removed/would-be-removed file sizes; entries
    /// whose metadata can't be read contribute nothing rather than erroring.
    pub byte_estimate: u64,
}

/// Aggregate counts backing a cleanup response's manifest map.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupManifestCounts {
    pub search_roots: usize,
    pub preview: usize,
    pub removed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub audit_manifest_path: Option<String>,
}

/// The response shape returned to callers: aggregate counts and a byte
/// estimate rather than the full per-entry detail, with path lists
/// truncated to the first entries so a large tree doesn't balloon the
/// response.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupSummary {
    pub file_count: usize,
    pub byte_estimate: u64,
    pub manifest: CleanupManifestCounts,
    pub preview_paths: Vec<String>,
    pub removed_paths: Vec<String>,
}

impl CleanupResult {
    pub fn summarize(&self) -> CleanupSummary {
        CleanupSummary {
            file_count: self.preview_paths.len() + self.removed_paths.len(),
            byte_estimate: self.byte_estimate,
            manifest: CleanupManifestCounts {
                search_roots: self.search_roots.len(),
                preview: self.preview_paths.len(),
                removed: self.removed_paths.len(),
                skipped: self.skipped_roots.len(),
                errors: self.errors.len(),
                audit_manifest_path: self.manifest_path.clone(),
            },
            preview_paths: self.preview_paths.iter().take(PATH_PREVIEW_LIMIT).cloned().collect(),
            removed_paths: self.removed_paths.iter().take(PATH_PREVIEW_LIMIT).cloned().collect(),
        }
    }
}

/// Rejects a root that is a well-known system directory or the user's home
/// directory; returns the canonical, dangerous-path-checked form otherwise.
pub fn normalize_root(raw: &str) -> Result<PathBuf, HephaestusError> {
    let path = PathBuf::from(raw);
    let trimmed = path.to_string_lossy().trim_end_matches('/').to_string();
    let trimmed = if trimmed.is_empty() { "/".to_string() } else { trimmed };

    if DANGEROUS_PATHS.iter().any(|p| *p == trimmed) {
        return Err(HephaestusError::Integrity(format!(
            "refusing to clean dangerous path: {trimmed}"
        )));
    }
    if let Some(home) = std::env::var_os("HOME") {
        let home = PathBuf::from(home);
        if path == home {
            return Err(HephaestusError::Integrity(format!(
                "refusing to clean the home directory: {trimmed}"
            )));
        }
    }
    Ok(path)
}

fn removal_category(options: &CleanupOptions, file_name: &str) -> Option<&'static str> {
    if MACOS_METADATA.contains(&file_name)
        || file_name.starts_with("._")
        || (file_name.starts_with("Icon") && file_name.len() <= 6)
    {
        return Some("macos_metadata");
    }
    if options.python_cache || options.deep_clean {
        if file_name == "__pycache__" || file_name.ends_with(".pyc") || file_name.ends_with(".pyo") {
            return Some("python_cache");
        }
    }
    if options.build_artifacts || options.deep_clean {
        if BUILD_ARTIFACT_NAMES.contains(&file_name)
            || file_name.ends_with(".egg-info")
            || file_name.ends_with(".tsbuildinfo")
            || file_name.ends_with(".tmp")
        {
            return Some("build_artifacts");
        }
    }
    if (options.node_modules || options.deep_clean) && file_name == "node_modules" {
        return Some("node_modules");
    }
    None
}

fn is_protected_site_packages(path: &Path) -> bool {
    let mut components = path.components().map(|c| c.as_os_str().to_string_lossy().to_string());
    let mut seen_venv = false;
    let mut seen_site_packages = false;
    while let Some(component) = components.next() {
        if component == ".venv" || component == "venv" {
            seen_venv = true;
        }
        if seen_venv && component == "site-packages" {
            seen_site_packages = true;
        }
    }
    seen_site_packages
}

/// Walks the configured roots, removing (or, in dry-run, previewing)
/// matched entries, subject to the dangerous-path and protected-path
/// invariants described for the cleanup engine.
pub fn run(
    options: &CleanupOptions,
    metrics: &MetricsRegistry,
    telemetry_enabled: bool,
) -> Result<CleanupResult, HephaestusError> {
    let mut result = CleanupResult::default();
    let mut roots = vec![normalize_root(&options.workspace_root)?];
    for extra in &options.extra_roots {
        match normalize_root(extra) {
            Ok(root) => roots.push(root),
            Err(e) => result.skipped_roots.push((extra.clone(), e.to_string())),
        }
    }

    for root in &roots {
        result.search_roots.push(root.display().to_string());
        if !root.exists() {
            continue;
        }

        let mut walker = WalkDir::new(root).min_depth(0);
        if let Some(depth) = options.max_depth {
            walker = walker.max_depth(depth);
        }

        for entry in walker.into_iter().filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            if !options.include_git && name == ".git" {
                return false;
            }
            if is_protected_site_packages(e.path()) && name != "__pycache__" {
                return false;
            }
            true
        }) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    result.errors.push(("<walk>".to_string(), e.to_string()));
                    continue;
                }
            };
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(category) = removal_category(options, &file_name) else {
                continue;
            };
            let path_display = entry.path().display().to_string();
            let entry_size = entry.metadata().map(|m| m.len()).unwrap_or(0);

            if options.dry_run {
                result.preview_paths.push(path_display);
                result.byte_estimate += entry_size;
                continue;
            }

            let removal = if entry.file_type().is_dir() {
                std::fs::remove_dir_all(entry.path())
            } else {
                std::fs::remove_file(entry.path())
            };
            match removal {
                Ok(()) => {
                    result.removed_paths.push(path_display.clone());
                    result.byte_estimate += entry_size;
                    metrics.increment("cleanup.path_removed");
                    let _ = telemetry::emit_event(
                        "cleanup.path_removed",
                        serde_json::json!({ "path": path_display, "category": category }),
                        telemetry_enabled,
                    );
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    let _ = telemetry::emit_event(
                        "cleanup.path_skipped",
                        serde_json::json!({ "path": path_display, "reason": "already removed" }),
                        telemetry_enabled,
                    );
                }
                Err(e) => {
                    let _ = telemetry::emit_event(
                        "cleanup.path_skipped",
                        serde_json::json!({ "path": path_display.clone(), "reason": e.to_string() }),
                        telemetry_enabled,
                    );
                    result.errors.push((path_display, e.to_string()));
                }
            }
        }
    }

    if let Some(manifest_path) = &options.audit_manifest_path {
        let manifest = serde_json::json!({
            "search_roots": result.search_roots,
            "removed_paths": result.removed_paths,
            "preview_paths": result.preview_paths,
            "skipped_roots": result.skipped_roots,
            "errors": result.errors,
            "generated_at": chrono::Utc::now(),
        });
        std::fs::write(manifest_path, serde_json::to_vec_pretty(&manifest).unwrap_or_default())
            .map_err(|e| HephaestusError::Internal(format!("failed to write manifest: {e}")))?;
        result.manifest_path = Some(manifest_path.clone());
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> MetricsRegistry {
        MetricsRegistry::new()
    }

    #[test]
    fn rejects_dangerous_roots() {
        for dangerous in ["/", "/etc", "/usr"] {
            assert!(normalize_root(dangerous).is_err());
        }
    }

    #[test]
    fn dry_run_previews_without_removing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("__pycache__")).unwrap();
        let options = CleanupOptions {
            workspace_root: dir.path().to_string_lossy().to_string(),
            python_cache: true,
            build_artifacts: true,
            node_modules: true,
            include_git: false,
            include_venv: false,
            deep_clean: false,
            extra_roots: vec![],
            dry_run: true,
            audit_manifest_path: None,
            max_depth: None,
        };
        let result = run(&options, &metrics(), false).unwrap();
        assert_eq!(result.preview_paths.len(), 1);
        assert!(result.removed_paths.is_empty());
        assert!(dir.path().join("__pycache__").exists());
    }

    #[test]
    fn real_run_removes_matched_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("__pycache__")).unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        let options = CleanupOptions {
            workspace_root: dir.path().to_string_lossy().to_string(),
            python_cache: true,
            build_artifacts: true,
            node_modules: true,
            include_git: false,
            include_venv: false,
            deep_clean: false,
            extra_roots: vec![],
            dry_run: false,
            audit_manifest_path: None,
            max_depth: None,
        };
        let result = run(&options, &metrics(), false).unwrap();
        assert_eq!(result.removed_paths.len(), 2);
        assert!(!dir.path().join("__pycache__").exists());
        assert!(!dir.path().join("node_modules").exists());
    }

    #[test]
    fn site_packages_under_venv_is_protected() {
        let dir = tempfile::tempdir().unwrap();
        let site_packages = dir.path().join(".venv").join("lib").join("site-packages");
        std::fs::create_dir_all(&site_packages).unwrap();
        std::fs::create_dir(site_packages.join("some_pkg")).unwrap();
        let options = CleanupOptions {
            workspace_root: dir.path().to_string_lossy().to_string(),
            python_cache: true,
            build_artifacts: true,
            node_modules: true,
            include_git: false,
            include_venv: false,
            deep_clean: true,
            extra_roots: vec![],
            dry_run: false,
            audit_manifest_path: None,
            max_depth: None,
        };
        let result = run(&options, &metrics(), false).unwrap();
        assert!(result.removed_paths.is_empty());
        assert!(site_packages.join("some_pkg").exists());
    }

    #[test]
    fn writes_audit_manifest_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("manifest.json");
        let options = CleanupOptions {
            workspace_root: dir.path().to_string_lossy().to_string(),
            python_cache: true,
            build_artifacts: true,
            node_modules: true,
            include_git: false,
            include_venv: false,
            deep_clean: false,
            extra_roots: vec![],
            dry_run: true,
            audit_manifest_path: Some(manifest_path.to_string_lossy().to_string()),
            max_depth: None,
        };
        let result = run(&options, &metrics(), false).unwrap();
        assert!(result.manifest_path.is_some());
        assert!(manifest_path.exists());
    }
}
