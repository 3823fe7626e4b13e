use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::tools::safety::{safe_spawn, truncate_string};
use crate::tools::schemas::{Param, Signature};
use crate::tools::{Tool, ToolArgs, ToolError, Workspace};

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MAX_OUTPUT_CHARS: usize = 200_000;

/// stdout and stderr are merged into `output`, in the order they were written.
#[derive(Debug, Clone, Serialize)]
pub struct BashCommandResult {
    pub command: String,
    pub exit_code: i32,
    pub output: String,
    pub truncated: bool,
}

pub async fn run_bash(workspace: &Workspace, command: &str) -> Result<BashCommandResult, ToolError> {
    let script = format!("exec 2>&1\n{}", command);
    info!(cwd = %workspace.root().display(), "running bash command");
    let out = safe_spawn("bash", &["-c", &script], workspace.root(), DEFAULT_TIMEOUT_SECS).await?;

    let (output, truncated) = truncate_string(&out.stdout, MAX_OUTPUT_CHARS);
    Ok(BashCommandResult {
        command: command.to_string(),
        exit_code: out.code,
        output,
        truncated,
    })
}

const BASH_DOC: &str = r#"A tool that executes a bash command in the workspace directory and returns the output.

    The working directory is the persistent workspace shared by all tools, so files created
    by one command can be used by later ones. Each call starts a fresh shell, so environment
    variables and `cd` do not carry over between calls. Commands are stopped after 60 seconds.

    The output will be provided as a json string, containing:
        - command: The bash command that was run.
        - exit_code: The exit code of the command.
        - output: The standard output and error of the command.
        - truncated: Whether the output was cut short.

    Args:
        command (str): The bash command to execute.
    "#;

pub struct BashTool {
    workspace: Arc<Workspace>,
}

impl BashTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for BashTool {
    fn signature(&self) -> Signature {
        Signature::new("execute_bash_command", BASH_DOC).param(Param::required::<String>("command"))
    }

    fn call(&self, args: ToolArgs) -> BoxFuture<'_, Result<Value, ToolError>> {
        Box::pin(async move {
            let command: String = args.get("command")?;
            let result = run_bash(&self.workspace, &command).await?;
            Ok(serde_json::to_value(result)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_bash_merges_streams_and_reports_exit_code() {
        let temp = TempDir::new().unwrap();
        let workspace = Workspace::open(temp.path()).unwrap();

        let result = run_bash(&workspace, "echo hello; echo oops >&2; exit 2").await.unwrap();

        assert_eq!(result.exit_code, 2);
        assert!(result.output.contains("hello"));
        assert!(result.output.contains("oops"));
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn test_bash_multibyte_output_is_not_truncated() {
        let temp = TempDir::new().unwrap();
        let workspace = Workspace::open(temp.path()).unwrap();

        let result = run_bash(&workspace, "printf '日本語'").await.unwrap();
        assert_eq!(result.output, "日本語");
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn test_bash_runs_in_workspace() {
        let temp = TempDir::new().unwrap();
        let workspace = Workspace::open(temp.path()).unwrap();
        std::fs::write(temp.path().join("marker.txt"), "found").unwrap();

        let result = run_bash(&workspace, "cat marker.txt").await.unwrap();
        assert_eq!(result.output.trim(), "found");
        assert_eq!(result.exit_code, 0);
    }
}
