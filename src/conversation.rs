use rusqlite::{Connection, OptionalExtension};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracing::debug;
use uuid::Uuid;

use crate::db::{self, now_iso, DbError};
use crate::models::*;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("conversation not found: {0}")]
  NotFound(ConversationId),
  #[error(transparent)]
  Db(#[from] DbError),
}

/// Builds an id like `2024-06-20_03:15_PM__1a2b3c4d`: the start time in UTC
/// followed by eight random hex characters.
pub fn new_conversation_id() -> ConversationId {
  conversation_id_at(OffsetDateTime::now_utc())
}

fn conversation_id_at(at: OffsetDateTime) -> ConversationId {
  let stamp = at
    .to_offset(UtcOffset::UTC)
    .format(format_description!("[year]-[month]-[day]_[hour repr:12]:[minute]_[period]"))
    .unwrap_or_else(|_| "1970-01-01_12:00_AM".to_string());
  let suffix = Uuid::new_v4().simple().to_string();
  format!("{}__{}", stamp, &suffix[..8])
}

/// Conversations persisted in SQLite. Messages are append-only: `save` writes
/// only the messages past what is already stored.
pub struct ConversationStore {
  conn: Mutex<Connection>,
}

impl ConversationStore {
  pub fn new(conn: Connection) -> Result<Self, StoreError> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    db::init_db(&conn)?;
    Ok(Self { conn: Mutex::new(conn) })
  }

  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::new(Connection::open_in_memory()?)
  }

  pub fn conn(&self) -> MutexGuard<'_, Connection> {
    self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn create_conversation(&self) -> Result<Conversation, StoreError> {
    let id = new_conversation_id();
    let ts = now_iso();
    self.conn().execute(
      "INSERT INTO conversations (id, created_at, updated_at) VALUES (?1, ?2, ?3)",
      (&id, &ts, &ts),
    )?;
    debug!(conversation = %id, "created conversation");
    Ok(Conversation::new(id))
  }

  /// Ids, newest first.
  pub fn list_conversation_ids(&self) -> Result<Vec<ConversationId>, StoreError> {
    Ok(self.list_conversations()?.into_iter().map(|c| c.id).collect())
  }

  pub fn list_conversations(&self) -> Result<Vec<ConversationSummary>, StoreError> {
    let conn = self.conn();
    let mut stmt = conn.prepare(
      "SELECT c.id, c.created_at, (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id)
       FROM conversations c ORDER BY c.created_at DESC, c.rowid DESC",
    )?;
    let rows = stmt.query_map([], |r| {
      Ok(ConversationSummary {
        id: r.get(0)?,
        created_at: r.get(1)?,
        message_count: r.get(2)?,
      })
    })?;

    let mut out = vec![];
    for row in rows {
      out.push(row?);
    }
    Ok(out)
  }

  pub fn load(&self, id: &str) -> Result<Conversation, StoreError> {
    let conn = self.conn();
    let exists: Option<String> = conn
      .query_row("SELECT id FROM conversations WHERE id = ?1", [id], |r| r.get(0))
      .optional()?;
    if exists.is_none() {
      return Err(StoreError::NotFound(id.to_string()));
    }

    let mut stmt = conn.prepare("SELECT content_json FROM messages WHERE conversation_id = ?1 ORDER BY seq")?;
    let rows = stmt.query_map([id], |r| r.get::<_, String>(0))?;

    let mut messages = vec![];
    for row in rows {
      messages.push(serde_json::from_str::<Message>(&row?)?);
    }
    Ok(Conversation { id: id.to_string(), messages })
  }

  /// Appends every message of `conversation` not yet stored.
  pub fn save(&self, conversation: &Conversation) -> Result<usize, StoreError> {
    let mut conn = self.conn();
    let tx = conn.transaction()?;

    let stored: Option<i64> = tx
      .query_row(
        "SELECT (SELECT COUNT(*) FROM messages WHERE conversation_id = ?1) FROM conversations WHERE id = ?1",
        [&conversation.id],
        |r| r.get(0),
      )
      .optional()?;
    let stored = match stored {
      Some(n) => n as usize,
      None => return Err(StoreError::NotFound(conversation.id.clone())),
    };

    let ts = now_iso();
    let mut appended = 0;
    for (seq, message) in conversation.messages.iter().enumerate().skip(stored) {
      tx.execute(
        "INSERT INTO messages (id, conversation_id, seq, role, content_json, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        (new_id(), &conversation.id, seq as i64, message.role.as_str(), serde_json::to_string(message)?, &ts),
      )?;
      appended += 1;
    }
    if appended > 0 {
      tx.execute("UPDATE conversations SET updated_at = ?1 WHERE id = ?2", (&ts, &conversation.id))?;
    }
    tx.commit()?;

    debug!(conversation = %conversation.id, appended, "saved conversation");
    Ok(appended)
  }

  pub fn delete(&self, id: &str) -> Result<(), StoreError> {
    let conn = self.conn();
    conn.execute("DELETE FROM messages WHERE conversation_id = ?1", [id])?;
    let n = conn.execute("DELETE FROM conversations WHERE id = ?1", [id])?;
    if n == 0 {
      return Err(StoreError::NotFound(id.to_string()));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use regex::Regex;
  use serde_json::json;

  #[test]
  fn conversation_ids_have_timestamp_and_suffix() {
    let id = new_conversation_id();
    let re = Regex::new(r"^\d{4}-\d{2}-\d{2}_\d{2}:\d{2}_(AM|PM)__[0-9a-f]{8}$").unwrap();
    assert!(re.is_match(&id), "bad id {}", id);
    assert_ne!(new_conversation_id(), id);
  }

  #[test]
  fn conversation_id_stamps_are_utc() {
    let id = conversation_id_at(time::macros::datetime!(2024-06-20 15:15 -7));
    assert!(id.starts_with("2024-06-20_10:15_PM__"), "bad id {}", id);

    let id = conversation_id_at(time::macros::datetime!(2024-06-20 23:30 -7));
    assert!(id.starts_with("2024-06-21_06:30_AM__"), "bad id {}", id);
  }

  #[test]
  fn save_appends_only_new_messages() {
    let store = ConversationStore::open_in_memory().unwrap();
    let mut conv = store.create_conversation().unwrap();

    conv.messages.push(Message::user_text("hi"));
    assert_eq!(store.save(&conv).unwrap(), 1);
    assert_eq!(store.save(&conv).unwrap(), 0);

    conv.messages.push(Message::blocks(Role::Assistant, vec![
      ContentBlock::text("calling"),
      ContentBlock::ToolUse { id: "t1".into(), name: "foo".into(), input: json!({"bar": 1}) },
    ]));
    conv.messages.push(Message::blocks(Role::User, vec![ContentBlock::ToolResult {
      tool_use_id: "t1".into(),
      content: "2".into(),
      is_error: false,
    }]));
    assert_eq!(store.save(&conv).unwrap(), 2);

    let loaded = store.load(&conv.id).unwrap();
    assert_eq!(loaded, conv);
  }

  #[test]
  fn list_is_newest_first() {
    let store = ConversationStore::open_in_memory().unwrap();
    let a = store.create_conversation().unwrap();
    let b = store.create_conversation().unwrap();

    let ids = store.list_conversation_ids().unwrap();
    assert_eq!(ids, vec![b.id, a.id]);
  }

  #[test]
  fn missing_conversations_are_not_found() {
    let store = ConversationStore::open_in_memory().unwrap();
    assert!(matches!(store.load("nope"), Err(StoreError::NotFound(_))));
    assert!(matches!(store.delete("nope"), Err(StoreError::NotFound(_))));
    assert!(matches!(store.save(&Conversation::new("nope".into())), Err(StoreError::NotFound(_))));
  }

  #[test]
  fn delete_removes_messages() {
    let store = ConversationStore::open_in_memory().unwrap();
    let mut conv = store.create_conversation().unwrap();
    conv.messages.push(Message::user_text("bye"));
    store.save(&conv).unwrap();

    store.delete(&conv.id).unwrap();
    assert!(store.list_conversation_ids().unwrap().is_empty());
    let left: i64 = store.conn().query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0)).unwrap();
    assert_eq!(left, 0);
  }
}
