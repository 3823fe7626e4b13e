use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ContentBlock, Message, Role};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Which hosted API the conversation talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Anthropic,
    OpenAi,
}

impl Provider {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Some(Provider::Anthropic),
            "openai" => Some(Provider::OpenAi),
            _ => None,
        }
    }

    pub fn api_key_env(&self) -> &'static str {
        match self {
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub extra_headers: Value,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 120,
            extra_headers: serde_json::json!({ "anthropic-beta": "prompt-caching-2024-07-31" }),
        }
    }
}

/// Body of a `POST /v1/messages` call.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRequest<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<&'a str>,
    pub messages: &'a [Message],
    #[serde(skip_serializing_if = "<[Value]>::is_empty")]
    pub tools: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicResponse {
    pub id: String,
    pub model: String,
    pub role: Role,
    pub content: Vec<Value>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

impl TryFrom<AnthropicResponse> for ModelResponse {
    type Error = LlmError;

    fn try_from(raw: AnthropicResponse) -> Result<Self, Self::Error> {
        Ok(ModelResponse {
            role: raw.role,
            content: parse_content_blocks(raw.content)?,
            stop_reason: raw.stop_reason,
            usage: raw.usage,
        })
    }
}

/// Parses response blocks, rejecting any type the model is not expected to
/// produce.
pub fn parse_content_blocks(raw: Vec<Value>) -> Result<Vec<ContentBlock>, LlmError> {
    raw.into_iter()
        .map(|block| {
            let kind = block
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("<missing>")
                .to_string();
            match kind.as_str() {
                "text" | "tool_use" => serde_json::from_value(block)
                    .map_err(|e| LlmError::InvalidResponse(format!("bad {} block: {}", kind, e))),
                _ => Err(LlmError::UnexpectedContentType(kind)),
            }
        })
        .collect()
}

/// The hosted model, as seen by the conversation loop.
pub trait ModelClient: Send + Sync {
    fn create_message<'a>(
        &'a self,
        request: &'a MessageRequest<'a>,
    ) -> BoxFuture<'a, Result<ModelResponse, LlmError>>;
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Missing API key. Set ANTHROPIC_API_KEY (or OPENAI_API_KEY for the openai provider).")]
    MissingApiKey,
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    #[error("Unexpected content block type: {0}")]
    UnexpectedContentType(String),
    #[error("Timeout")]
    Timeout,
    #[error("Rate limited")]
    RateLimited,
}
