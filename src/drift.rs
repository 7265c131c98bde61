use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("valid regex"));

#[derive(Debug, Clone, Deserialize)]
pub struct DeclaredTool {
    pub name: String,
    pub expected_version: String,
    pub probe_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProjectManifest {
    pub tools: Vec<DeclaredTool>,
    #[serde(default)]
    pub lock_file: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftRecord {
    pub name: String,
    pub expected: String,
    pub actual: Option<String>,
    pub is_missing: bool,
    pub has_drift: bool,
}

fn major_minor(version: &str) -> Option<(u64, u64)> {
    let captures = VERSION_PATTERN.captures(version)?;
    Some((captures[1].parse().ok()?, captures[2].parse().ok()?))
}

async fn probe_version(tool: &DeclaredTool) -> Option<String> {
    let mut args = tool
        .probe_command
        .clone()
        .unwrap_or_else(|| vec![tool.name.clone(), "--version".to_string()]);
    let program = args.remove(0);
    let mut command = tokio::process::Command::new(program);
    command.args(args);
    let output = tokio::time::timeout(Duration::from_secs(5), command.output())
        .await
        .ok()?
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).to_string();
    let captures = VERSION_PATTERN.captures(&text)?;
    Some(captures[0].to_string())
}

/// Compares each declared tool's expected version to the installed one,
/// matching on major.minor as the spec's drift threshold.
pub async fn check_drift(manifest: &ProjectManifest) -> Vec<DriftRecord> {
    let mut records = Vec::with_capacity(manifest.tools.len());
    for tool in &manifest.tools {
        let actual = probe_version(tool).await;
        let is_missing = actual.is_none();
        let has_drift = match (&actual, major_minor(&tool.expected_version)) {
            (Some(actual_version), Some(expected)) => {
                major_minor(actual_version).map(|a| a != expected).unwrap_or(true)
            }
            _ => is_missing,
        };
        records.push(DriftRecord {
            name: tool.name.clone(),
            expected: tool.expected_version.clone(),
            actual,
            is_missing,
            has_drift,
        });
    }
    records
}

/// Synthesizes install/upgrade commands for tools reporting drift; if the
/// project declares a lock file, recommends syncing through it instead.
pub fn generate_remediation_commands(manifest: &ProjectManifest, records: &[DriftRecord]) -> Vec<String> {
    let mut commands = Vec::new();
    if let Some(lock_file) = &manifest.lock_file {
        if records.iter().any(|r| r.has_drift) {
            commands.push(format!("uv sync --locked  # honoring {lock_file}"));
            return commands;
        }
    }
    for record in records.iter().filter(|r| r.has_drift) {
        if record.is_missing {
            commands.push(format!("pip install '{}=={}'", record.name, record.expected));
        } else {
            commands.push(format!(
                "pip install --upgrade '{}=={}'",
                record.name, record.expected
            ));
        }
    }
    commands
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn major_minor_extracts_leading_components() {
        assert_eq!(major_minor("1.4.2"), Some((1, 4)));
        assert_eq!(major_minor("ruff 0.4.10"), Some((0, 4)));
        assert_eq!(major_minor("no version here"), None);
    }

    #[tokio::test]
    async fn missing_tool_is_reported_as_drift() {
        let manifest = ProjectManifest {
            tools: vec![DeclaredTool {
                name: "definitely-not-a-real-tool-xyz".to_string(),
                expected_version: "1.0.0".to_string(),
                probe_command: None,
            }],
            lock_file: None,
        };
        let records = check_drift(&manifest).await;
        assert_eq!(records.len(), 1);
        assert!(records[0].is_missing);
        assert!(records[0].has_drift);
    }

    #[test]
    fn remediation_prefers_lock_file_sync() {
        let manifest = ProjectManifest {
            tools: vec![],
            lock_file: Some("uv.lock".to_string()),
        };
        let records = vec![DriftRecord {
            name: "ruff".to_string(),
            expected: "0.4.0".to_string(),
            actual: Some("0.3.0".to_string()),
            is_missing: false,
            has_drift: true,
        }];
        let commands = generate_remediation_commands(&manifest, &records);
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains("uv sync"));
    }

    #[test]
    fn remediation_without_lock_file_targets_each_tool() {
        let manifest = ProjectManifest::default();
        let records = vec![
            DriftRecord {
                name: "ruff".to_string(),
                expected: "0.4.0".to_string(),
                actual: None,
                is_missing: true,
                has_drift: true,
            },
            DriftRecord {
                name: "mypy".to_string(),
                expected: "1.9.0".to_string(),
                actual: Some("1.8.0".to_string()),
                is_missing: false,
                has_drift: true,
            },
        ];
        let commands = generate_remediation_commands(&manifest, &records);
        assert_eq!(commands.len(), 2);
        assert!(commands[0].contains("pip install 'ruff"));
        assert!(commands[1].contains("--upgrade"));
    }
}
