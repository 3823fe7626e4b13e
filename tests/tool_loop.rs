use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use localchat_lib::commands::App;
use localchat_lib::conversation::ConversationStore;
use localchat_lib::llm::{LlmError, MessageRequest, ModelClient, ModelResponse, Usage};
use localchat_lib::models::*;
use localchat_lib::tools::{tool_fn, Param, Signature, ToolError, ToolRegistry, Workspace};
use localchat_lib::workflows::{run_turn, TurnConfig, TurnStatus};

/// Answers from a fixed script and keeps the tool schemas it was sent.
struct Script {
    replies: Mutex<VecDeque<Vec<ContentBlock>>>,
    tools_seen: Mutex<Vec<Vec<Value>>>,
}

impl Script {
    fn new(replies: Vec<Vec<ContentBlock>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            tools_seen: Mutex::new(vec![]),
        })
    }
}

impl ModelClient for Script {
    fn create_message<'a>(
        &'a self,
        request: &'a MessageRequest<'a>,
    ) -> BoxFuture<'a, Result<ModelResponse, LlmError>> {
        self.tools_seen.lock().unwrap().push(request.tools.to_vec());
        let next = self.replies.lock().unwrap().pop_front();
        Box::pin(async move {
            let content = next.ok_or_else(|| LlmError::InvalidResponse("no more replies".into()))?;
            Ok(ModelResponse {
                role: Role::Assistant,
                content,
                stop_reason: None,
                usage: Usage::default(),
            })
        })
    }
}

fn foo(name: &'static str, tag: &'static str, default: &'static str) -> Arc<dyn localchat_lib::tools::Tool> {
    tool_fn(
        Signature::new(
            name,
            "If the user provides a `bar` value, call this function with it and give them back the result.

            Args:
                bar (int): User provided value.
                buzz (str): Another value.
            ",
        )
        .param(Param::required::<i64>("bar"))
        .param(Param::optional::<String>("buzz", default)),
        move |args| async move {
            Ok(json!(format!("{}-{}-{}", tag, args.get::<i64>("bar")?, args.get::<String>("buzz")?)))
        },
    )
}

fn divide() -> Arc<dyn localchat_lib::tools::Tool> {
    tool_fn(
        Signature::new(
            "divide_by_two_but_throw_exception_if_input_is_odd",
            "Divide the input value by two, but throw an exception if the input value is odd.

            Args:
                value (int): The value to divide by two.
            ",
        )
        .param(Param::required::<i64>("value")),
        |args| async move {
            let value: i64 = args.get("value")?;
            if value % 2 != 0 {
                return Err(ToolError::value_error("Value must be even"));
            }
            Ok(json!(value / 2))
        },
    )
}

fn result_blocks(message: &Message) -> Vec<(String, String, bool)> {
    match &message.content {
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult { tool_use_id, content, is_error } => {
                    Some((tool_use_id.clone(), content.clone(), *is_error))
                }
                _ => None,
            })
            .collect(),
        MessageContent::Text(_) => vec![],
    }
}

#[tokio::test]
async fn full_round_trip_through_registry_and_loop() {
    let registry = ToolRegistry::new(vec![foo("foo_1", "foo1", "cat"), foo("foo_2", "foo2", "dog"), divide()]).unwrap();
    let model = Script::new(vec![
        vec![
            ContentBlock::ToolUse { id: "a".into(), name: "foo_2".into(), input: json!({"bar": 23}) },
            ContentBlock::ToolUse {
                id: "b".into(),
                name: "divide_by_two_but_throw_exception_if_input_is_odd".into(),
                input: json!({"value": 11}),
            },
            ContentBlock::ToolUse { id: "c".into(), name: "nope".into(), input: json!({}) },
        ],
        vec![ContentBlock::text("done")],
    ]);

    let mut conversation = Conversation::new("it".into());
    conversation.messages.push(Message::user_text("go"));
    let report = run_turn(model.as_ref(), &registry, &mut conversation, &TurnConfig::default())
        .await
        .unwrap();

    assert_eq!(report.status, TurnStatus::Done);
    assert_eq!(report.tool_calls, 3);

    let results = result_blocks(&conversation.messages[2]);
    assert_eq!(results[0], ("a".to_string(), "foo2-23-dog".to_string(), false));

    let (id, content, is_error) = &results[1];
    assert_eq!(id, "b");
    assert!(is_error);
    let payload: ErrorPayload = serde_json::from_str(content).unwrap();
    assert_eq!(payload.kind, "ValueError");
    assert_eq!(payload.message, "Value must be even");
    assert!(!payload.traceback.is_empty());

    assert!(results[2].2);
    assert!(results[2].1.contains("nope"));

    // Every request carried the same schemas, in registration order.
    let seen = model.tools_seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    let names: Vec<_> = seen[0].iter().map(|t| t["name"].as_str().unwrap().to_string()).collect();
    assert_eq!(names, vec!["foo_1", "foo_2", "divide_by_two_but_throw_exception_if_input_is_odd"]);
    assert_eq!(seen[0][0]["input_schema"]["required"], json!(["bar"]));
    assert_eq!(seen[0], seen[1]);
}

#[tokio::test]
async fn app_persists_turns_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("chat.sqlite");
    let workspace = Arc::new(Workspace::open(dir.path().join("ws")).unwrap());

    let model = Script::new(vec![
        vec![ContentBlock::ToolUse {
            id: "t1".into(),
            name: "divide_by_two_but_throw_exception_if_input_is_odd".into(),
            input: json!({"value": 10}),
        }],
        vec![ContentBlock::text("It is 5.")],
    ]);
    let store = ConversationStore::new(rusqlite::Connection::open(&db_path).unwrap()).unwrap();
    let app = App::from_parts(store, workspace.clone(), ToolRegistry::new(vec![divide()]).unwrap(), model).unwrap();

    let id = app.new_conversation().unwrap();
    let sent = app.send_message(&id, "halve 10").await.unwrap();
    assert_eq!(sent.report.model_calls, 2);
    drop(app);

    let store = ConversationStore::new(rusqlite::Connection::open(&db_path).unwrap()).unwrap();
    let reopened = App::from_parts(store, workspace, ToolRegistry::new(vec![divide()]).unwrap(), Script::new(vec![])).unwrap();
    let messages = reopened.get_messages(&id).unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(result_blocks(&messages[2]), vec![("t1".to_string(), "5".to_string(), false)]);
    assert_eq!(reopened.list_conversations().unwrap()[0].message_count, 4);
}
