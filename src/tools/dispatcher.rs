use futures::FutureExt;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::{ErrorPayload, ToolCallOutcome, ToolCallRequest};
use crate::tools::schemas::{generate_descriptor, SchemaError, SchemaOptions, Signature, ToolDescriptor};
use crate::tools::{Tool, ToolArgs, ToolError};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("duplicate tool name: {0}")]
    DuplicateToolName(String),
}

#[derive(Clone)]
struct RegisteredTool {
    signature: Signature,
    tool: Arc<dyn Tool>,
}

/// The fixed set of tools offered to the model, in registration order.
///
/// Schemas are generated once here. After construction the registry is
/// read-only and can be shared freely.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    descriptors: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Result<Self, RegistryError> {
        Self::with_options(tools, SchemaOptions::default())
    }

    pub fn with_options(
        tools: Vec<Arc<dyn Tool>>,
        options: SchemaOptions,
    ) -> Result<Self, RegistryError> {
        let mut registered = Vec::with_capacity(tools.len());
        let mut descriptors = Vec::with_capacity(tools.len());
        let mut index = HashMap::new();

        for tool in tools {
            let signature = tool.signature();
            let descriptor = generate_descriptor(&signature, &options)?;
            if index.contains_key(&descriptor.name) {
                return Err(RegistryError::DuplicateToolName(descriptor.name));
            }
            index.insert(descriptor.name.clone(), registered.len());
            descriptors.push(descriptor);
            registered.push(RegisteredTool { signature, tool });
        }

        Ok(Self {
            tools: registered,
            descriptors,
            index,
        })
    }

    pub fn schemas(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    /// Schemas in the shape the `tools` request field expects.
    pub fn tool_params(&self) -> Vec<Value> {
        self.descriptors.iter().map(ToolDescriptor::to_tool_param).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Runs one tool call and packages the result for the model.
    ///
    /// Never fails: unknown tools, bad arguments, tool errors and panics all
    /// come back as an outcome with `is_error` set and a JSON payload of
    /// `{type, message, traceback}`.
    pub async fn resolve(&self, request: &ToolCallRequest) -> ToolCallOutcome {
        match self.dispatch(request).await {
            Ok(value) => {
                let content = stringify(&value);
                debug!(tool = %request.name, id = %request.id, bytes = content.len(), "tool call succeeded");
                ToolCallOutcome {
                    tool_call_id: request.id.clone(),
                    content,
                    is_error: false,
                }
            }
            Err(err) => {
                warn!(tool = %request.name, id = %request.id, kind = err.kind(), "tool call failed: {}", err);
                ToolCallOutcome {
                    tool_call_id: request.id.clone(),
                    content: error_content(&request.name, &err),
                    is_error: true,
                }
            }
        }
    }

    async fn dispatch(&self, request: &ToolCallRequest) -> Result<Value, ToolError> {
        let entry = self
            .index
            .get(&request.name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| {
                ToolError::new(
                    "UnknownTool",
                    format!("{} not found in {:?}", request.name, self.names()),
                )
            })?;

        let args = bind_arguments(&entry.signature, &request.arguments)?;

        let call = std::panic::catch_unwind(AssertUnwindSafe(|| entry.tool.call(args)))
            .map_err(|panic| panic_error(panic.as_ref()))?;

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(panic_error(panic.as_ref())),
        }
    }
}

/// Binds model-supplied arguments to a signature the way keyword arguments
/// bind to parameters: unknown names are rejected, missing required ones are
/// an error, and missing optional ones take their default.
pub fn bind_arguments(signature: &Signature, arguments: &Value) -> Result<ToolArgs, ToolError> {
    let mut values = match arguments {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(ToolError::new(
                "InvalidArgument",
                format!("arguments for `{}` must be a JSON object, got {}", signature.name, other),
            ))
        }
    };

    if let Some(unexpected) = values.keys().find(|k| signature.get(k).is_none()) {
        return Err(ToolError::new(
            "UnexpectedArgument",
            format!("`{}` got an unexpected argument '{}'", signature.name, unexpected),
        ));
    }

    for param in &signature.params {
        if values.contains_key(&param.name) {
            continue;
        }
        match &param.default {
            Some(default) => {
                values.insert(param.name.clone(), default.clone());
            }
            None => return Err(ToolError::missing_argument(&param.name)),
        }
    }

    Ok(ToolArgs::new(values))
}

/// String form of a tool's return value: strings verbatim, everything else
/// as JSON text.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn error_content(tool: &str, err: &ToolError) -> String {
    let payload = ErrorPayload {
        kind: err.kind().to_string(),
        message: err.message().to_string(),
        traceback: format!(
            "tool `{}` raised {}: {}\n{}",
            tool,
            err.kind(),
            err.message(),
            err.trace()
        ),
    };
    serde_json::to_string(&payload).unwrap_or_else(|_| err.message().to_string())
}

fn panic_error(panic: &(dyn Any + Send)) -> ToolError {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool panicked".to_string()
    };
    ToolError::new("Panic", message)
}
