pub mod client;
pub mod openai;
pub mod types;

pub use client::AnthropicClient;
pub use openai::OpenAiClient;
pub use types::{LlmConfig, LlmError, MessageRequest, ModelClient, ModelResponse, Provider, Usage};
