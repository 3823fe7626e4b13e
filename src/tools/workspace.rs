use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::tools::safety::workspace_file;
use crate::tools::schemas::{Param, Signature};
use crate::tools::{Tool, ToolArgs, ToolError};

/// The directory every tool reads from and writes to.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Opens `root`, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn save(&self, filename: &str, content: &str) -> Result<PathBuf, ToolError> {
        let path = workspace_file(&self.root, filename)?;
        tokio::fs::write(&path, content).await?;
        debug!(path = %path.display(), bytes = content.len(), "saved workspace file");
        Ok(path)
    }
}

const SAVE_DOC: &str = r#"Save arbitrary content to the specified filename in the model's workspace.

    The model's workspace is accessible by all tools and persistent over the lifetime of the conversation.

    This function is often useful for passing arbitrary data to `execute_python_code_and_write_python_code_to_file` or `execute_bash_command`.

    USE THIS FUNCTION TO PASS ACTUAL DATA INSTEAD OF PLACEHOLDERS.

    Args:
        filename (str): The filename to save the content to (a bare name like "data.txt", not a path).
        content (str): The content to save to the file.
    "#;

pub struct SaveFileTool {
    workspace: Arc<Workspace>,
}

impl SaveFileTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for SaveFileTool {
    fn signature(&self) -> Signature {
        Signature::new("save_content_to_persistent_file_in_workspace", SAVE_DOC)
            .param(Param::required::<String>("filename"))
            .param(Param::required::<String>("content"))
    }

    fn call(&self, args: ToolArgs) -> BoxFuture<'_, Result<Value, ToolError>> {
        Box::pin(async move {
            let filename: String = args.get("filename")?;
            let content: String = args.get("content")?;
            self.workspace.save(&filename, &content).await?;
            Ok(json!({ "filename": filename, "bytes": content.len() }))
        })
    }
}
