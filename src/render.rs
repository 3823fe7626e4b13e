use serde_json::Value;

use crate::models::*;

const PREVIEW_CHARS: usize = 100;

/// Renders one stored message for the terminal.
pub fn render_message(message: &Message) -> String {
  let header = match message.role {
    Role::User => "you",
    Role::Assistant => "assistant",
  };
  let body = match &message.content {
    MessageContent::Text(text) => text.clone(),
    MessageContent::Blocks(blocks) => blocks.iter().map(render_block).collect::<Vec<_>>().join("\n"),
  };
  format!("[{}]\n{}", header, body)
}

pub fn render_block(block: &ContentBlock) -> String {
  match block {
    ContentBlock::Text { text, .. } => text.clone(),
    ContentBlock::ToolUse { id, name, input } => {
      let call = serde_json::json!({ "id": id, "name": name, "input": input });
      format!("> tool use\n{}", pretty(&call))
    }
    ContentBlock::ToolResult { tool_use_id, content, is_error: true } => {
      let detail = serde_json::from_str::<ErrorPayload>(content)
        .map(|p| p.traceback)
        .unwrap_or_else(|_| content.clone());
      format!("> tool error ({})\n{}", tool_use_id, detail)
    }
    ContentBlock::ToolResult { tool_use_id, content, is_error: false } => {
      let detail = match serde_json::from_str::<Value>(content) {
        Ok(value) => pretty(&value),
        Err(_) => preview(content),
      };
      format!("> tool result ({})\n{}", tool_use_id, detail)
    }
  }
}

fn pretty(value: &Value) -> String {
  serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn preview(content: &str) -> String {
  let mut out: String = content.chars().take(PREVIEW_CHARS).collect();
  if content.chars().count() > PREVIEW_CHARS {
    out.push_str("...");
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn tool_errors_show_traceback() {
    let payload = ErrorPayload {
      kind: "ValueError".into(),
      message: "Value must be even".into(),
      traceback: "tool `divide` raised ValueError: Value must be even".into(),
    };
    let block = ContentBlock::ToolResult {
      tool_use_id: "t1".into(),
      content: serde_json::to_string(&payload).unwrap(),
      is_error: true,
    };
    let out = render_block(&block);
    assert!(out.contains("tool `divide` raised ValueError"));
    assert!(!out.contains("\"type\""));
  }

  #[test]
  fn tool_results_are_pretty_or_previewed() {
    let json_result = ContentBlock::ToolResult {
      tool_use_id: "t1".into(),
      content: r#"{"exit_code":0}"#.into(),
      is_error: false,
    };
    assert!(render_block(&json_result).contains("\"exit_code\": 0"));

    let long = "x".repeat(500);
    let text_result = ContentBlock::ToolResult { tool_use_id: "t2".into(), content: long, is_error: false };
    let out = render_block(&text_result);
    assert!(out.ends_with(&format!("{}...", "x".repeat(100))));
  }

  #[test]
  fn messages_get_a_role_header() {
    let msg = Message::blocks(Role::Assistant, vec![
      ContentBlock::text("checking"),
      ContentBlock::ToolUse { id: "t1".into(), name: "echo".into(), input: json!({"text": "hi"}) },
    ]);
    let out = render_message(&msg);
    assert!(out.starts_with("[assistant]\nchecking\n> tool use"));
    assert!(out.contains("\"name\": \"echo\""));
  }
}
