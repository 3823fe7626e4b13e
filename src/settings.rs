use rusqlite::Connection;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::db::now_iso;
use crate::llm::openai::{DEFAULT_OPENAI_MODEL, OPENAI_BASE_URL};
use crate::llm::{LlmConfig, Provider};
use crate::models::SettingsKV;
use crate::tools::DocPolicy;
use crate::workflows::TurnConfig;

pub const MAX_ITERATIONS_CAP: usize = 20;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI assistant working with a developer. You have a persistent \
workspace directory where you may create, modify or delete files freely, and tools to run bash commands, \
run Python code, search the web and read web pages. Prefer running code over guessing at its output. \
When you write code, keep it commented and typed, and when iterating only repeat the parts that changed. \
If you see a more promising approach than the one being pursued, mention it briefly at the end.";

/// Keys accepted by `set_setting`.
pub const KNOWN_KEYS: &[&str] = &[
  "provider",
  "model",
  "max_tokens",
  "max_iterations",
  "system_prompt",
  "base_url",
  "temperature",
  "timeout_secs",
  "extra_headers_json",
  "doc_policy",
  "api_key",
  "openai_api_key",
  "serp_api_key",
];

#[derive(Debug, Error)]
pub enum SettingsError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("unknown setting '{0}'")]
  UnknownKey(String),
  #[error("invalid value for '{key}': {reason}")]
  InvalidValue { key: String, reason: String },
}

/// Effective configuration: stored settings over environment over defaults.
#[derive(Debug, Clone)]
pub struct Settings {
  pub provider: Provider,
  pub llm: LlmConfig,
  pub turn: TurnConfig,
  pub doc_policy: DocPolicy,
  pub api_key: Option<String>,
  pub openai_api_key: Option<String>,
  pub serp_api_key: Option<String>,
}

impl Settings {
  /// The key for the selected provider.
  pub fn provider_api_key(&self) -> Option<&str> {
    match self.provider {
      Provider::Anthropic => self.api_key.as_deref(),
      Provider::OpenAi => self.openai_api_key.as_deref(),
    }
  }
}

pub fn list_settings(conn: &Connection) -> Result<Vec<SettingsKV>, SettingsError> {
  let mut stmt = conn.prepare("SELECT key, value, updated_at FROM settings ORDER BY key")?;
  let rows = stmt.query_map([], |r| {
    Ok(SettingsKV {
      key: r.get(0)?,
      value: r.get(1)?,
      updated_at: r.get(2)?,
    })
  })?;

  let mut out = vec![];
  for row in rows {
    out.push(row?);
  }
  Ok(out)
}

pub fn get_all_settings(conn: &Connection) -> Result<HashMap<String, String>, SettingsError> {
  Ok(list_settings(conn)?.into_iter().map(|kv| (kv.key, kv.value)).collect())
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<(), SettingsError> {
  validate(key, value)?;
  conn.execute(
    "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
     ON CONFLICT(key) DO UPDATE SET value=excluded.value, updated_at=excluded.updated_at",
    (key, value, now_iso()),
  )?;
  Ok(())
}

fn validate(key: &str, value: &str) -> Result<(), SettingsError> {
  let invalid = |reason: String| SettingsError::InvalidValue { key: key.to_string(), reason };
  match key {
    "max_tokens" => value.parse::<u32>().map(drop).map_err(|e| invalid(e.to_string())),
    "max_iterations" | "timeout_secs" => value.parse::<u64>().map(drop).map_err(|e| invalid(e.to_string())),
    "temperature" => value.parse::<f64>().map(drop).map_err(|e| invalid(e.to_string())),
    "provider" => Provider::from_str(value)
      .map(drop)
      .ok_or_else(|| invalid("expected 'anthropic' or 'openai'".into())),
    "doc_policy" => DocPolicy::from_str(value)
      .map(drop)
      .ok_or_else(|| invalid("expected 'permissive' or 'strict'".into())),
    "extra_headers_json" => match serde_json::from_str::<Value>(value) {
      Ok(Value::Object(_)) => Ok(()),
      Ok(_) => Err(invalid("expected a JSON object".into())),
      Err(e) => Err(invalid(e.to_string())),
    },
    k if KNOWN_KEYS.contains(&k) => Ok(()),
    _ => Err(SettingsError::UnknownKey(key.to_string())),
  }
}

pub fn build_settings(stored: &HashMap<String, String>) -> Settings {
  build_settings_with_env(stored, |name| std::env::var(name).ok())
}

/// Same as [`build_settings`] with an explicit environment lookup.
pub fn build_settings_with_env(stored: &HashMap<String, String>, env: impl Fn(&str) -> Option<String>) -> Settings {
  let get = |key: &str| stored.get(key).map(|s| s.trim()).filter(|s| !s.is_empty());
  let provider = get("provider").and_then(Provider::from_str).unwrap_or_default();
  let mut defaults = LlmConfig::default();
  let mut turn_defaults = TurnConfig::default();
  if provider == Provider::OpenAi {
    defaults.base_url = OPENAI_BASE_URL.to_string();
    defaults.extra_headers = Value::Object(Default::default());
    turn_defaults.model = DEFAULT_OPENAI_MODEL.to_string();
  }

  let llm = LlmConfig {
    base_url: get("base_url").map(str::to_string).unwrap_or(defaults.base_url),
    timeout_secs: get("timeout_secs").and_then(|s| s.parse().ok()).unwrap_or(defaults.timeout_secs),
    extra_headers: get("extra_headers_json")
      .and_then(|s| serde_json::from_str(s).ok())
      .unwrap_or(defaults.extra_headers),
  };

  let turn = TurnConfig {
    model: get("model").map(str::to_string).unwrap_or(turn_defaults.model),
    max_tokens: get("max_tokens").and_then(|s| s.parse().ok()).unwrap_or(turn_defaults.max_tokens),
    temperature: get("temperature").and_then(|s| s.parse().ok()),
    system_prompt: Some(get("system_prompt").unwrap_or(DEFAULT_SYSTEM_PROMPT).to_string()),
    max_iterations: get("max_iterations")
      .and_then(|s| s.parse::<usize>().ok())
      .unwrap_or(turn_defaults.max_iterations)
      .clamp(1, MAX_ITERATIONS_CAP),
  };

  let key = |stored_key: &str, env_name: &str| {
    get(stored_key).map(str::to_string).or_else(|| env(env_name).filter(|k| !k.is_empty()))
  };

  Settings {
    provider,
    llm,
    turn,
    doc_policy: get("doc_policy").and_then(DocPolicy::from_str).unwrap_or_default(),
    api_key: key("api_key", Provider::Anthropic.api_key_env()),
    openai_api_key: key("openai_api_key", Provider::OpenAi.api_key_env()),
    serp_api_key: key("serp_api_key", "SERP_API_KEY"),
  }
}
