use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::llm::client::{insert_extra_headers, post_with_retry};
use crate::llm::types::*;
use crate::models::{ContentBlock, Message, MessageContent, Role};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Reasoning tokens count against `max_completion_tokens`, so o1 requests get
/// at least this much.
pub const MIN_COMPLETION_TOKENS: u32 = 16000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: String) -> Self {
        Self { role: role.to_string(), content: Some(content), tool_calls: None, tool_call_id: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    pub arguments: String,
}

/// Body of a `POST /v1/chat/completions` call.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// The o1 family takes `max_completion_tokens`, ignores temperature, and has
/// no system role or tool support.
pub fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("o1")
}

impl<'a> ChatRequest<'a> {
    pub fn from_request(request: &MessageRequest<'a>) -> Self {
        let reasoning = is_reasoning_model(request.model);
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system {
            messages.push(ChatMessage::text(if reasoning { "user" } else { "system" }, system.to_string()));
        }
        for message in request.messages {
            push_chat_messages(&mut messages, message);
        }

        if reasoning {
            if !request.tools.is_empty() {
                debug!(model = request.model, "tools are not sent to reasoning models");
            }
            ChatRequest {
                model: request.model,
                messages,
                tools: vec![],
                temperature: None,
                max_tokens: None,
                max_completion_tokens: Some(request.max_tokens.max(MIN_COMPLETION_TOKENS)),
            }
        } else {
            ChatRequest {
                model: request.model,
                messages,
                tools: request.tools.iter().map(function_tool).collect(),
                temperature: request.temperature,
                max_tokens: Some(request.max_tokens),
                max_completion_tokens: None,
            }
        }
    }
}

// {name, description, input_schema} -> {type: function, function: {name, description, parameters}}
fn function_tool(tool: &Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool["name"],
            "description": tool["description"],
            "parameters": tool["input_schema"],
        }
    })
}

fn push_chat_messages(out: &mut Vec<ChatMessage>, message: &Message) {
    let blocks = match &message.content {
        MessageContent::Text(text) => {
            out.push(ChatMessage::text(message.role.as_str(), text.clone()));
            return;
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    let mut text = Vec::new();
    let mut calls = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text: t, .. } => text.push(t.as_str()),
            ContentBlock::ToolUse { id, name, input } => calls.push(ToolCall {
                id: id.clone(),
                call_type: "function".to_string(),
                function: ToolFunction { name: name.clone(), arguments: input.to_string() },
            }),
            // Tool messages must directly follow the assistant message that asked for them.
            ContentBlock::ToolResult { tool_use_id, content, .. } => out.push(ChatMessage {
                role: "tool".to_string(),
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: Some(tool_use_id.clone()),
            }),
        }
    }

    let content = (!text.is_empty()).then(|| text.join("\n"));
    match message.role {
        Role::Assistant if !calls.is_empty() || content.is_some() => out.push(ChatMessage {
            role: "assistant".to_string(),
            content,
            tool_calls: (!calls.is_empty()).then_some(calls),
            tool_call_id: None,
        }),
        Role::User => {
            if let Some(content) = content {
                out.push(ChatMessage::text("user", content));
            }
        }
        _ => {}
    }
}

impl TryFrom<ChatResponse> for ModelResponse {
    type Error = LlmError;

    fn try_from(raw: ChatResponse) -> Result<Self, Self::Error> {
        let choice = raw
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".into()))?;

        let mut content = Vec::new();
        if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
            content.push(ContentBlock::text(text));
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            let input = if call.function.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&call.function.arguments).map_err(|e| {
                    LlmError::InvalidResponse(format!("bad arguments for {}: {}", call.function.name, e))
                })?
            };
            content.push(ContentBlock::ToolUse { id: call.id, name: call.function.name, input });
        }

        let usage = raw.usage.unwrap_or_default();
        Ok(ModelResponse {
            role: Role::Assistant,
            content,
            stop_reason: choice.finish_reason,
            usage: Usage { input_tokens: usage.prompt_tokens, output_tokens: usage.completion_tokens },
        })
    }
}

pub struct OpenAiClient {
    http: Client,
    config: LlmConfig,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;

        Ok(Self { http, config, api_key })
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| LlmError::InvalidHeader(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        insert_extra_headers(&mut headers, &self.config.extra_headers)?;
        Ok(headers)
    }

    pub async fn chat_completions(&self, request: &MessageRequest<'_>) -> Result<ModelResponse, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let url = format!("{}/v1/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = ChatRequest::from_request(request);
        let result: ChatResponse = post_with_retry(&self.http, &url, self.headers()?, &body).await?;
        debug!(id = %result.id, model = %result.model, "chat completion returned");

        ModelResponse::try_from(result)
    }
}

impl ModelClient for OpenAiClient {
    fn create_message<'a>(
        &'a self,
        request: &'a MessageRequest<'a>,
    ) -> BoxFuture<'a, Result<ModelResponse, LlmError>> {
        Box::pin(self.chat_completions(request))
    }
}
