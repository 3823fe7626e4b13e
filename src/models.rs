use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub type ID = String;
pub type ConversationId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  User,
  Assistant,
}

impl Role {
  pub fn as_str(&self) -> &'static str {
    match self {
      Role::User => "user",
      Role::Assistant => "assistant",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheControl {
  #[serde(rename = "type")]
  pub kind: String,
}

impl CacheControl {
  pub fn ephemeral() -> Self {
    Self { kind: "ephemeral".into() }
  }
}

/// One block of message content, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
  Text {
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
  },
  ToolUse {
    id: String,
    name: String,
    input: Value,
  },
  ToolResult {
    tool_use_id: String,
    content: String,
    #[serde(default)]
    is_error: bool,
  },
}

impl ContentBlock {
  pub fn text(text: impl Into<String>) -> Self {
    ContentBlock::Text { text: text.into(), cache_control: None }
  }

  pub fn type_name(&self) -> &'static str {
    match self {
      ContentBlock::Text { .. } => "text",
      ContentBlock::ToolUse { .. } => "tool_use",
      ContentBlock::ToolResult { .. } => "tool_result",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
  Text(String),
  Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
  pub role: Role,
  pub content: MessageContent,
}

impl Message {
  pub fn user_text(text: impl Into<String>) -> Self {
    Self { role: Role::User, content: MessageContent::Text(text.into()) }
  }

  pub fn blocks(role: Role, blocks: Vec<ContentBlock>) -> Self {
    Self { role, content: MessageContent::Blocks(blocks) }
  }

  /// Tool-use requests carried by this message, in order.
  pub fn tool_calls(&self) -> Vec<ToolCallRequest> {
    match &self.content {
      MessageContent::Text(_) => vec![],
      MessageContent::Blocks(blocks) => blocks.iter().filter_map(ToolCallRequest::from_block).collect(),
    }
  }
}

/// A model-issued request to run one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
  pub id: String,
  pub name: String,
  pub arguments: Value,
}

impl ToolCallRequest {
  pub fn from_block(block: &ContentBlock) -> Option<Self> {
    match block {
      ContentBlock::ToolUse { id, name, input } => Some(Self {
        id: id.clone(),
        name: name.clone(),
        arguments: input.clone(),
      }),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallOutcome {
  pub tool_call_id: String,
  pub content: String,
  pub is_error: bool,
}

impl From<ToolCallOutcome> for ContentBlock {
  fn from(outcome: ToolCallOutcome) -> Self {
    ContentBlock::ToolResult {
      tool_use_id: outcome.tool_call_id,
      content: outcome.content,
      is_error: outcome.is_error,
    }
  }
}

/// The structured payload carried by a failed outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
  #[serde(rename = "type")]
  pub kind: String,
  pub message: String,
  pub traceback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
  pub id: ConversationId,
  pub messages: Vec<Message>,
}

impl Conversation {
  pub fn new(id: ConversationId) -> Self {
    Self { id, messages: vec![] }
  }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConversationSummary {
  pub id: ConversationId,
  pub created_at: String,
  pub message_count: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SettingsKV {
  pub key: String,
  pub value: String,
  pub updated_at: String,
}

pub fn new_id() -> ID {
  Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn content_blocks_use_type_tags() {
    let block = ContentBlock::ToolUse { id: "t1".into(), name: "foo".into(), input: json!({"bar": 1}) };
    let value = serde_json::to_value(&block).unwrap();
    assert_eq!(value, json!({"type": "tool_use", "id": "t1", "name": "foo", "input": {"bar": 1}}));

    let text = serde_json::to_value(ContentBlock::text("hi")).unwrap();
    assert_eq!(text, json!({"type": "text", "text": "hi"}));
  }

  #[test]
  fn message_content_accepts_plain_text_or_blocks() {
    let plain: Message = serde_json::from_value(json!({"role": "user", "content": "hello"})).unwrap();
    assert_eq!(plain, Message::user_text("hello"));

    let blocks: Message = serde_json::from_value(json!({
      "role": "user",
      "content": [{"type": "tool_result", "tool_use_id": "t1", "content": "5", "is_error": false}]
    })).unwrap();
    assert!(matches!(blocks.content, MessageContent::Blocks(ref b) if b.len() == 1));
  }

  #[test]
  fn tool_calls_are_extracted_in_order() {
    let msg = Message::blocks(Role::Assistant, vec![
      ContentBlock::text("thinking"),
      ContentBlock::ToolUse { id: "a".into(), name: "one".into(), input: json!({}) },
      ContentBlock::ToolUse { id: "b".into(), name: "two".into(), input: json!({}) },
    ]);
    let ids: Vec<_> = msg.tool_calls().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["a", "b"]);
  }
}
