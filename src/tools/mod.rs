pub mod bash;
pub mod browser;
pub mod dispatcher;
pub mod error;
pub mod python;
pub mod safety;
pub mod schemas;
pub mod search;
pub mod workspace;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;

pub use dispatcher::{RegistryError, ToolRegistry};
pub use error::ToolError;
pub use schemas::{generate_descriptor, DocPolicy, Param, SchemaError, SchemaOptions, Signature, ToolDescriptor};
pub use workspace::Workspace;

use crate::settings::Settings;

/// A function the model can ask us to run.
///
/// `signature` is read once at registration to build the schema and to bind
/// incoming arguments. `call` receives arguments already bound to that
/// signature, with defaults filled in.
pub trait Tool: Send + Sync {
    fn signature(&self) -> Signature;

    fn call(&self, args: ToolArgs) -> BoxFuture<'_, Result<Value, ToolError>>;
}

/// Named arguments for one tool invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs {
    values: Map<String, Value>,
}

impl ToolArgs {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Extracts an argument as `T`. A value of the wrong shape is reported the
    /// way the tool itself would fail on it.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, ToolError> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| ToolError::missing_argument(name))?;
        serde_json::from_value(value.clone()).map_err(|e| {
            ToolError::new(
                "InvalidArgument",
                format!("argument '{}' has the wrong type: {}", name, e),
            )
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A tool backed by a closure.
pub struct FnTool<F> {
    signature: Signature,
    handler: F,
}

impl<F> std::fmt::Debug for FnTool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.signature.name)
            .finish_non_exhaustive()
    }
}

impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(ToolArgs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    fn signature(&self) -> Signature {
        self.signature.clone()
    }

    fn call(&self, args: ToolArgs) -> BoxFuture<'_, Result<Value, ToolError>> {
        Box::pin((self.handler)(args))
    }
}

/// Wraps an async closure as a shareable [`Tool`].
pub fn tool_fn<F, Fut>(signature: Signature, handler: F) -> Arc<dyn Tool>
where
    F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    Arc::new(FnTool { signature, handler })
}

/// The tools exposed to the model by the chat front-end.
pub fn default_tools(workspace: Arc<Workspace>, settings: &Settings) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(bash::BashTool::new(workspace.clone())),
        Arc::new(python::PythonTool::new(workspace.clone())),
        Arc::new(search::GoogleSearchTool::new(settings.serp_api_key.clone())),
        Arc::new(browser::OpenUrlTool::new(settings.llm.timeout_secs)),
        Arc::new(workspace::SaveFileTool::new(workspace)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_args_typed_access() {
        let mut map = Map::new();
        map.insert("bar".into(), json!(23));
        map.insert("buzz".into(), json!("dog"));
        let args = ToolArgs::new(map);

        assert_eq!(args.get::<i64>("bar").unwrap(), 23);
        assert_eq!(args.get::<String>("buzz").unwrap(), "dog");

        let err = args.get::<bool>("bar").unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");

        let err = args.get::<i64>("missing").unwrap_err();
        assert_eq!(err.kind(), "MissingArgument");
    }
}
