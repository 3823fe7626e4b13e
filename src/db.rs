use rusqlite::Connection;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

pub struct DbPaths {
  pub db_path: PathBuf,
  pub workspace_dir: PathBuf,
}

/// Lays out the data directory, creating it if needed.
pub fn paths(data_dir: &Path) -> Result<DbPaths, DbError> {
  std::fs::create_dir_all(data_dir)?;
  let db_path = data_dir.join("localchat.sqlite");

  // Files written by tools land here, next to the database.
  let workspace_dir = data_dir.join("workspace");
  std::fs::create_dir_all(&workspace_dir)?;

  Ok(DbPaths { db_path, workspace_dir })
}

pub fn connect(data_dir: &Path) -> Result<Connection, DbError> {
  let p = paths(data_dir)?;
  let conn = Connection::open(p.db_path)?;
  conn.execute_batch("PRAGMA foreign_keys = ON;")?;
  Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<(), DbError> {
  // Apply migrations in order. Each uses IF NOT EXISTS for idempotency.
  let init_sql = include_str!("../migrations/001_init.sql");
  conn.execute_batch(init_sql)?;
  let settings_sql = include_str!("../migrations/002_settings.sql");
  conn.execute_batch(settings_sql)?;
  Ok(())
}

pub fn now_iso() -> String {
  // RFC3339 without nanos; good enough for sorting/display.
  let t = time::OffsetDateTime::now_utc().replace_nanosecond(0).unwrap_or_else(|_| time::OffsetDateTime::now_utc());
  t.format(&time::format_description::well_known::Rfc3339).unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
