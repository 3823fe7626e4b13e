use std::backtrace::Backtrace;
use std::error::Error as StdError;

use crate::tools::safety::SafetyError;

/// An error raised while a tool runs.
///
/// `kind` names the failure class the model sees as `type` in the error
/// payload; `message` is the human-readable text. The trace is captured when
/// the error is built so the payload can show where it came from.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    kind: String,
    message: String,
    trace: String,
}

impl ToolError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: Backtrace::force_capture().to_string(),
        }
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new("ValueError", message)
    }

    pub fn missing_argument(name: &str) -> Self {
        Self::new("MissingArgument", format!("missing required argument: '{}'", name))
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new("Timeout", message)
    }

    /// Wraps any error, recording its `source()` chain in the trace.
    pub fn from_error(kind: impl Into<String>, err: &(dyn StdError + 'static)) -> Self {
        let mut error = Self::new(kind, err.to_string());
        let mut chain = String::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push_str(&format!("Caused by: {}\n", cause));
            source = cause.source();
        }
        if !chain.is_empty() {
            error.trace = format!("{}{}", chain, error.trace);
        }
        error
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn trace(&self) -> &str {
        &self.trace
    }
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        ToolError::from_error("IoError", &e)
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        ToolError::from_error("JsonError", &e)
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        ToolError::from_error("HttpError", &e)
    }
}

impl From<SafetyError> for ToolError {
    fn from(e: SafetyError) -> Self {
        match e {
            SafetyError::TimedOut(_) => ToolError::timeout(e.to_string()),
            other => ToolError::from_error("SafetyError", &other),
        }
    }
}
