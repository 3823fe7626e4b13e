use serde::Serialize;
use tracing::{debug, info, warn};

use crate::llm::{LlmError, MessageRequest, ModelClient, ModelResponse, Usage};
use crate::models::*;
use crate::tools::ToolRegistry;

pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20240620";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Per-turn request parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub system_prompt: Option<String>,
    /// Upper bound on model calls within one turn.
    pub max_iterations: usize,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            system_prompt: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TurnState {
    AwaitingModel,
    HasToolCalls(Vec<ToolCallRequest>),
    Done,
    MaxIterationsReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Done,
    MaxIterationsReached,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnReport {
    pub status: TurnStatus,
    pub model_calls: usize,
    pub tool_calls: usize,
    pub usage: Usage,
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("model call failed: {0}")]
    Llm(LlmError),
    #[error("model returned an unexpected content block type: {0}")]
    UnexpectedContentType(String),
}

impl From<LlmError> for TurnError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::UnexpectedContentType(kind) => TurnError::UnexpectedContentType(kind),
            other => TurnError::Llm(other),
        }
    }
}

/// Drives one user turn to completion.
///
/// The caller has already appended the user's message. Each model response is
/// appended as an assistant message; if it asks for tools, every outcome goes
/// back in a single user message of `tool_result` blocks and the model is
/// called again. Stops when a response carries no tool calls, or when
/// `max_iterations` model calls have been made.
///
/// On error the conversation keeps every message appended before the failure.
pub async fn run_turn(
    model: &dyn ModelClient,
    registry: &ToolRegistry,
    conversation: &mut Conversation,
    config: &TurnConfig,
) -> Result<TurnReport, TurnError> {
    let tools = registry.tool_params();
    let mut model_calls = 0;
    let mut tool_calls = 0;
    let mut usage = Usage::default();
    let mut state = TurnState::AwaitingModel;

    loop {
        state = match state {
            TurnState::AwaitingModel => {
                if model_calls >= config.max_iterations {
                    TurnState::MaxIterationsReached
                } else {
                    let response = {
                        let request = MessageRequest {
                            model: &config.model,
                            max_tokens: config.max_tokens,
                            system: config.system_prompt.as_deref(),
                            messages: &conversation.messages,
                            tools: &tools,
                            temperature: config.temperature,
                        };
                        model.create_message(&request).await?
                    };
                    model_calls += 1;
                    usage += response.usage;
                    info!(
                        conversation = %conversation.id,
                        call = model_calls,
                        stop_reason = ?response.stop_reason,
                        input_tokens = response.usage.input_tokens,
                        output_tokens = response.usage.output_tokens,
                        "model responded"
                    );

                    validate_response(&response)?;
                    let message = Message::blocks(Role::Assistant, response.content);
                    let requests = message.tool_calls();
                    conversation.messages.push(message);

                    if requests.is_empty() {
                        TurnState::Done
                    } else {
                        TurnState::HasToolCalls(requests)
                    }
                }
            }
            TurnState::HasToolCalls(requests) => {
                let mut results = Vec::with_capacity(requests.len());
                for request in &requests {
                    debug!(tool = %request.name, id = %request.id, "resolving tool call");
                    results.push(ContentBlock::from(registry.resolve(request).await));
                }
                tool_calls += requests.len();
                conversation.messages.push(Message::blocks(Role::User, results));
                TurnState::AwaitingModel
            }
            TurnState::Done => {
                info!(conversation = %conversation.id, model_calls, tool_calls, "turn complete");
                return Ok(TurnReport {
                    status: TurnStatus::Done,
                    model_calls,
                    tool_calls,
                    usage,
                });
            }
            TurnState::MaxIterationsReached => {
                warn!(
                    conversation = %conversation.id,
                    max_iterations = config.max_iterations,
                    tool_calls,
                    "turn stopped at the model call limit"
                );
                return Ok(TurnReport {
                    status: TurnStatus::MaxIterationsReached,
                    model_calls,
                    tool_calls,
                    usage,
                });
            }
        };
    }
}

// The model may only produce text and tool_use blocks.
fn validate_response(response: &ModelResponse) -> Result<(), TurnError> {
    for block in &response.content {
        match block {
            ContentBlock::Text { .. } | ContentBlock::ToolUse { .. } => {}
            other => return Err(TurnError::UnexpectedContentType(other.type_name().to_string())),
        }
    }
    Ok(())
}
