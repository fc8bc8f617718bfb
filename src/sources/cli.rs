//! MCP tool calls through the local CLI.
//!
//! `<command> tool call <tool> --server <server> --input '<json>'` writes the
//! result to a JSON file under `/tmp/manus-mcp/` and prints its path on stdout.
//! The file is removed once read.

use std::path::Path;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::process::Command;

use super::{ConnectorError, McpTransport};

fn result_file_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"/tmp/manus-mcp/mcp_result_[a-f0-9]+\.json").expect("static regex")
    })
}

/// Pull the result file path out of the CLI's stdout.
pub fn find_result_file(stdout: &str) -> Option<&str> {
    result_file_re().find(stdout).map(|m| m.as_str())
}

/// Read and parse a result file, then delete it.
pub async fn take_result_file(path: &Path) -> Result<Value, ConnectorError> {
    let content = tokio::fs::read_to_string(path).await?;
    if let Err(e) = tokio::fs::remove_file(path).await {
        log::warn!("Failed to remove MCP result file {}: {}", path.display(), e);
    }
    Ok(serde_json::from_str(&content)?)
}

pub struct CliTransport {
    command: String,
}

impl CliTransport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl McpTransport for CliTransport {
    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        input: &Value,
    ) -> Result<Value, ConnectorError> {
        let output = Command::new(&self.command)
            .args(["tool", "call", tool, "--server", server, "--input"])
            .arg(input.to_string())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ConnectorError::Spawn(format!("{}: {}", self.command, e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(ConnectorError::CommandFailed {
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }
        if !stderr.trim().is_empty() && !stderr.contains("results was saved") {
            log::warn!("{} {} stderr: {}", server, tool, stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = find_result_file(&stdout)
            .ok_or_else(|| ConnectorError::MissingResultFile(format!("{server}/{tool}")))?;
        take_result_file(Path::new(path)).await
    }
}
