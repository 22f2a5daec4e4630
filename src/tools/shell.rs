use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::error::Result;

use super::{ToolDeclaration, ToolExecutor};

/// Runs a command on the host under `sh -c` and reports stdout, stderr and
/// the exit code. A non-zero exit is data for the model, not an error.
pub struct ShellCommandTool;

#[derive(Debug, Deserialize)]
struct ShellInput {
    command: String,
}

impl ShellCommandTool {
    pub fn declaration() -> ToolDeclaration {
        ToolDeclaration::new(
            "run_shell_command",
            "Executes a shell command on the host and returns its output.",
            json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute"
                    }
                },
                "required": ["command"]
            }),
        )
    }
}

#[async_trait]
impl ToolExecutor for ShellCommandTool {
    async fn execute(&self, arguments: Value) -> Result<Value> {
        let input: ShellInput = serde_json::from_value(arguments)?;

        let output = Command::new("sh")
            .arg("-c")
            .arg(&input.command)
            .output()
            .await?;

        Ok(json!({
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
            "exitCode": output.status.code(),
        }))
    }
}
