use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

use crate::tools::bash::run_bash;
use crate::tools::safety::find_interpreter;
use crate::tools::schemas::{Param, Signature};
use crate::tools::{Tool, ToolArgs, ToolError, Workspace};

const INTERPRETERS: &[&str] = &["python3", "python"];

const PYTHON_DOC: &str = r#"Executes `python_code_to_execute` in a python interpreter inside the workspace and returns the stdout and stderr from executing the code as a string.

    The code is first written to `filename_for_given_python_code` in the workspace, then run
    the same way a user would run `python <filename>` in their terminal.

    MAKE SURE TO EXPLICITLY CALL `print(<variable>)` FOR ANY VARIABLE YOU NEED RETURNED IN YOUR RESULT.

    Use this whenever the result of python code is needed, for example when the user provides
    python code they want executed, or when running python would help produce a better answer.

    Args:
        python_code_to_execute (str): Python code to run inside the python interpreter
        filename_for_given_python_code (str): The filename where the given python code is written before execution
    "#;

pub struct PythonTool {
    workspace: Arc<Workspace>,
}

impl PythonTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for PythonTool {
    fn signature(&self) -> Signature {
        Signature::new("execute_python_code_and_write_python_code_to_file", PYTHON_DOC)
            .param(Param::required::<String>("python_code_to_execute"))
            .param(Param::required::<String>("filename_for_given_python_code"))
    }

    fn call(&self, args: ToolArgs) -> BoxFuture<'_, Result<Value, ToolError>> {
        Box::pin(async move {
            let code: String = args.get("python_code_to_execute")?;
            let filename: String = args.get("filename_for_given_python_code")?;

            self.workspace.save(&filename, &code).await?;

            let interpreter = find_interpreter(INTERPRETERS)?;
            let command = format!(
                "{} {}",
                shell_quote(&interpreter.to_string_lossy()),
                shell_quote(&filename)
            );
            let result = run_bash(&self.workspace, &command).await?;
            Ok(serde_json::to_value(result)?)
        })
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
