use std::process::Command;

use semver::Version;
use serde_json::Value;

use super::{is_tool_on_path, Plugin, PluginMetadata, PluginResult, ToolRequirement};

/// A built-in gate that synthesizes one fixed command line, runs it, and
/// maps its exit status to a pass/fail gate. Every built-in shares this
/// shape; only the program and arguments differ.
pub struct CommandPlugin {
    metadata: PluginMetadata,
    program: &'static str,
    base_args: &'static [&'static str],
}

impl CommandPlugin {
    fn new(
        name: &'static str,
        description: &'static str,
        category: &'static str,
        order: i32,
        program: &'static str,
        base_args: &'static [&'static str],
    ) -> Self {
        Self {
            metadata: PluginMetadata {
                name: name.to_string(),
                version: Version::new(1, 0, 0),
                description: description.to_string(),
                author: "hephaestus".to_string(),
                category: category.to_string(),
                requires: vec![ToolRequirement {
                    tool: program.to_string(),
                    version_spec: None,
                }],
                order,
            },
            program,
            base_args,
        }
    }

    pub fn lint_check() -> Self {
        Self::new(
            "lint-check",
            "Static lint analysis over the workspace.",
            "quality",
            10,
            "ruff",
            &["check", "."],
        )
    }

    pub fn format_check() -> Self {
        Self::new(
            "format-check",
            "Verifies formatting without rewriting files.",
            "quality",
            20,
            "ruff",
            &["format", "--check", "."],
        )
    }

    pub fn typecheck() -> Self {
        Self::new(
            "typecheck",
            "Static type analysis over the workspace.",
            "quality",
            30,
            "mypy",
            &["."],
        )
    }

    pub fn test() -> Self {
        Self::new(
            "test",
            "Runs the project's automated test suite.",
            "quality",
            40,
            "pytest",
            &[],
        )
    }

    pub fn dependency_audit() -> Self {
        Self::new(
            "dependency-audit",
            "Scans declared dependencies for known advisories.",
            "security",
            50,
            "pip-audit",
            &[],
        )
    }
}

impl Plugin for CommandPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn run(&self, config: &Value) -> PluginResult {
        if !is_tool_on_path(self.program) {
            return PluginResult::missing_tools(&[self.program]);
        }

        let mut command = Command::new(self.program);
        command.args(self.base_args);
        if let Some(extra_args) = config.get("args").and_then(Value::as_array) {
            for arg in extra_args {
                if let Some(arg) = arg.as_str() {
                    command.arg(arg);
                }
            }
        }
        if let Some(workspace) = config.get("workspace").and_then(Value::as_str) {
            command.current_dir(workspace);
        }

        match command.output() {
            Ok(output) => {
                let success = output.status.success();
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                PluginResult {
                    success,
                    message: if success {
                        format!("{} passed", self.metadata.name)
                    } else {
                        format!("{} reported failures", self.metadata.name)
                    },
                    details: serde_json::json!({ "stdout": stdout, "stderr": stderr }),
                    exit_code: output.status.code(),
                }
            }
            Err(e) => PluginResult {
                success: false,
                message: format!("failed to invoke '{}': {e}", self.program),
                details: Value::Null,
                exit_code: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tool_reports_missing_metadata() {
        let plugin = CommandPlugin::new(
            "definitely-not-a-real-plugin",
            "",
            "quality",
            0,
            "definitely-not-a-real-binary-xyz",
            &[],
        );
        let result = plugin.run(&Value::Null);
        assert!(!result.success);
        assert_eq!(result.details.get("missing").unwrap()[0], "definitely-not-a-real-binary-xyz");
    }

    #[test]
    fn builtin_constructors_carry_expected_names() {
        assert_eq!(CommandPlugin::lint_check().metadata().name, "lint-check");
        assert_eq!(CommandPlugin::format_check().metadata().name, "format-check");
        assert_eq!(CommandPlugin::typecheck().metadata().name, "typecheck");
        assert_eq!(CommandPlugin::test().metadata().name, "test");
        assert_eq!(
            CommandPlugin::dependency_audit().metadata().name,
            "dependency-audit"
        );
    }
}
