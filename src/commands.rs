use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::conversation::{ConversationStore, StoreError};
use crate::db::{self, DbError};
use crate::llm::{AnthropicClient, LlmError, ModelClient, OpenAiClient, Provider};
use crate::models::*;
use crate::settings::{self, Settings, SettingsError};
use crate::tools::{default_tools, RegistryError, SchemaOptions, ToolRegistry, Workspace};
use crate::workflows::{run_turn, TurnError, TurnReport};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct CommandError {
  pub code: String,
  pub message: String,
}

impl CommandError {
  fn new(code: &str, message: impl ToString) -> Self {
    CommandError { code: code.into(), message: message.to_string() }
  }
}

impl From<StoreError> for CommandError {
  fn from(e: StoreError) -> Self {
    match e {
      StoreError::NotFound(_) => CommandError::new("NOT_FOUND", e),
      _ => CommandError::new("DB_ERROR", e),
    }
  }
}

impl From<DbError> for CommandError {
  fn from(e: DbError) -> Self {
    CommandError::new("DB_ERROR", e)
  }
}

impl From<SettingsError> for CommandError {
  fn from(e: SettingsError) -> Self {
    CommandError::new("SETTINGS_ERROR", e)
  }
}

impl From<RegistryError> for CommandError {
  fn from(e: RegistryError) -> Self {
    CommandError::new("TOOL_REGISTRY_ERROR", e)
  }
}

impl From<LlmError> for CommandError {
  fn from(e: LlmError) -> Self {
    CommandError::new("LLM_ERROR", e)
  }
}

impl From<TurnError> for CommandError {
  fn from(e: TurnError) -> Self {
    match e {
      TurnError::Llm(LlmError::MissingApiKey) => CommandError::new("NO_API_KEY", e),
      TurnError::Llm(_) => CommandError::new("LLM_ERROR", e),
      TurnError::UnexpectedContentType(_) => CommandError::new("UNEXPECTED_CONTENT", e),
    }
  }
}

impl From<std::io::Error> for CommandError {
  fn from(e: std::io::Error) -> Self {
    CommandError::new("IO_ERROR", e)
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct SendResult {
  pub report: TurnReport,
  /// Messages appended by this call, starting with the user's.
  pub new_messages: Vec<Message>,
}

/// Application state behind the front-end: storage, effective settings, the
/// tool registry and the model client.
pub struct App {
  store: ConversationStore,
  workspace: Arc<Workspace>,
  settings: Settings,
  registry: ToolRegistry,
  model: Arc<dyn ModelClient>,
  // Whether tools and client are rebuilt from settings on every change.
  owns_clients: bool,
}

impl App {
  /// Opens (or creates) the data directory and builds everything from stored
  /// settings.
  pub fn open(data_dir: &Path) -> Result<Self, CommandError> {
    let paths = db::paths(data_dir)?;
    let store = ConversationStore::new(db::connect(data_dir)?)?;
    let workspace = Arc::new(Workspace::open(paths.workspace_dir)?);
    let settings = settings::build_settings(&settings::get_all_settings(&store.conn())?);
    let registry = build_registry(&workspace, &settings)?;
    let model = build_model(&settings)?;

    info!(db = %paths.db_path.display(), tools = registry.len(), "app ready");
    Ok(App { store, workspace, settings, registry, model, owns_clients: true })
  }

  /// Assembles an app around an existing registry and model client. Setting
  /// changes are persisted and reflected in turn parameters only.
  pub fn from_parts(
    store: ConversationStore,
    workspace: Arc<Workspace>,
    registry: ToolRegistry,
    model: Arc<dyn ModelClient>,
  ) -> Result<Self, CommandError> {
    let settings = settings::build_settings(&settings::get_all_settings(&store.conn())?);
    Ok(App { store, workspace, settings, registry, model, owns_clients: false })
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  pub fn registry(&self) -> &ToolRegistry {
    &self.registry
  }

  pub fn workspace(&self) -> &Workspace {
    &self.workspace
  }

  pub fn new_conversation(&self) -> Result<ConversationId, CommandError> {
    Ok(self.store.create_conversation()?.id)
  }

  pub fn list_conversations(&self) -> Result<Vec<ConversationSummary>, CommandError> {
    Ok(self.store.list_conversations()?)
  }

  /// The most recently created conversation, if any.
  pub fn latest_conversation(&self) -> Result<Option<ConversationId>, CommandError> {
    Ok(self.store.list_conversation_ids()?.into_iter().next())
  }

  pub fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>, CommandError> {
    Ok(self.store.load(conversation_id)?.messages)
  }

  pub fn delete_conversation(&self, conversation_id: &str) -> Result<(), CommandError> {
    Ok(self.store.delete(conversation_id)?)
  }

  /// Adds the user's message and runs one turn. Whatever the turn appended is
  /// saved even when it fails part way.
  pub async fn send_message(&self, conversation_id: &str, text: &str) -> Result<SendResult, CommandError> {
    let mut conversation = self.store.load(conversation_id)?;
    let first_new = conversation.messages.len();

    clear_cache_breakpoints(&mut conversation.messages);
    conversation.messages.push(Message::blocks(
      Role::User,
      vec![ContentBlock::Text { text: text.to_string(), cache_control: Some(CacheControl::ephemeral()) }],
    ));

    let result = run_turn(self.model.as_ref(), &self.registry, &mut conversation, &self.settings.turn).await;
    self.store.save(&conversation)?;

    let report = result?;
    Ok(SendResult { report, new_messages: conversation.messages.split_off(first_new) })
  }

  pub fn get_settings(&self) -> Result<Vec<SettingsKV>, CommandError> {
    Ok(settings::list_settings(&self.store.conn())?)
  }

  pub fn set_setting(&mut self, key: &str, value: &str) -> Result<(), CommandError> {
    let settings = {
      let conn = self.store.conn();
      settings::set_setting(&conn, key, value)?;
      settings::build_settings(&settings::get_all_settings(&conn)?)
    };

    if self.owns_clients {
      self.registry = build_registry(&self.workspace, &settings)?;
      self.model = build_model(&settings)?;
    }
    self.settings = settings;
    info!(key, "setting updated");
    Ok(())
  }
}

fn build_registry(workspace: &Arc<Workspace>, settings: &Settings) -> Result<ToolRegistry, RegistryError> {
  ToolRegistry::with_options(
    default_tools(workspace.clone(), settings),
    SchemaOptions { doc_policy: settings.doc_policy },
  )
}

// A missing key is reported by the client on first use, not at startup.
fn build_model(settings: &Settings) -> Result<Arc<dyn ModelClient>, LlmError> {
  let api_key = settings.provider_api_key().unwrap_or_default().to_string();
  info!(provider = ?settings.provider, model = %settings.turn.model, "building model client");
  let client: Arc<dyn ModelClient> = match settings.provider {
    Provider::Anthropic => Arc::new(AnthropicClient::new(settings.llm.clone(), api_key)?),
    Provider::OpenAi => Arc::new(OpenAiClient::new(settings.llm.clone(), api_key)?),
  };
  Ok(client)
}

/// The API accepts a handful of cache breakpoints per request, so only the
/// newest user message keeps one.
fn clear_cache_breakpoints(messages: &mut [Message]) {
  for message in messages.iter_mut().filter(|m| m.role == Role::User) {
    if let MessageContent::Blocks(blocks) = &mut message.content {
      for block in blocks.iter_mut() {
        if let ContentBlock::Text { cache_control, .. } = block {
          *cache_control = None;
        }
      }
    }
  }
}
