use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, warn};
use tracing_subscriber::prelude::*;

use localchat_lib::commands::{App, CommandError};
use localchat_lib::models::ConversationId;
use localchat_lib::render::render_message;
use localchat_lib::workflows::TurnStatus;

const HELP: &str = "commands:
  /new                 start a new conversation
  /list                list conversations, newest first
  /switch <id>         continue an existing conversation
  /history             show the current conversation
  /delete <id>         delete a conversation
  /settings            show stored settings
  /set <key> <value>   change a setting
  /quit                exit
anything else is sent to the model";

#[derive(Debug, PartialEq)]
enum Input<'a> {
  New,
  List,
  Switch(&'a str),
  History,
  Delete(&'a str),
  Settings,
  Set(&'a str, &'a str),
  Help,
  Quit,
  Message(&'a str),
  Invalid(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
  let line = line.trim();
  let Some(rest) = line.strip_prefix('/') else {
    return Input::Message(line);
  };
  let (cmd, arg) = match rest.split_once(char::is_whitespace) {
    Some((cmd, arg)) => (cmd, arg.trim()),
    None => (rest, ""),
  };
  match (cmd, arg) {
    ("new", _) => Input::New,
    ("list", _) => Input::List,
    ("history", _) => Input::History,
    ("settings", _) => Input::Settings,
    ("help", _) => Input::Help,
    ("quit" | "exit", _) => Input::Quit,
    ("switch", id) if !id.is_empty() => Input::Switch(id),
    ("delete", id) if !id.is_empty() => Input::Delete(id),
    ("set", kv) => match kv.split_once(char::is_whitespace) {
      Some((key, value)) => Input::Set(key, value.trim()),
      None => Input::Invalid("usage: /set <key> <value>"),
    },
    _ => Input::Invalid("unknown command, try /help"),
  }
}

fn data_dir() -> PathBuf {
  std::env::var_os("LOCALCHAT_DATA_DIR")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from(".localchat"))
}

async fn handle(app: &mut App, current: &mut Option<ConversationId>, input: Input<'_>) -> Result<bool, CommandError> {
  match input {
    Input::New => {
      let id = app.new_conversation()?;
      println!("started {}", id);
      *current = Some(id);
    }
    Input::List => {
      for c in app.list_conversations()? {
        let marker = if current.as_deref() == Some(c.id.as_str()) { "*" } else { " " };
        println!("{} {}  ({} messages)", marker, c.id, c.message_count);
      }
    }
    Input::Switch(id) => {
      let messages = app.get_messages(id)?;
      println!("switched to {} ({} messages)", id, messages.len());
      *current = Some(id.to_string());
    }
    Input::History => match current {
      Some(id) => {
        for message in app.get_messages(id)? {
          println!("{}\n", render_message(&message));
        }
      }
      None => println!("no conversation selected, use /new"),
    },
    Input::Delete(id) => {
      app.delete_conversation(id)?;
      if current.as_deref() == Some(id) {
        *current = None;
      }
      println!("deleted {}", id);
    }
    Input::Settings => {
      for kv in app.get_settings()? {
        let value = if kv.key.ends_with("api_key") { "********" } else { kv.value.as_str() };
        println!("{} = {}", kv.key, value);
      }
    }
    Input::Set(key, value) => {
      app.set_setting(key, value)?;
      println!("{} updated", key);
    }
    Input::Help => println!("{}", HELP),
    Input::Quit => return Ok(false),
    Input::Invalid(reason) => println!("{}", reason),
    Input::Message("") => {}
    Input::Message(text) => {
      let id = match current.clone() {
        Some(id) => id,
        None => {
          let id = app.new_conversation()?;
          println!("started {}", id);
          *current = Some(id.clone());
          id
        }
      };
      let result = app.send_message(&id, text).await?;
      // The user's own message is already on screen.
      for message in result.new_messages.iter().skip(1) {
        println!("{}\n", render_message(message));
      }
      if result.report.status == TurnStatus::MaxIterationsReached {
        println!("(stopped after {} model calls; send another message to continue)", result.report.model_calls);
      }
    }
  }
  Ok(true)
}

#[tokio::main]
async fn main() {
  dotenvy::dotenv().ok();

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
    .init();

  let mut app = match App::open(&data_dir()) {
    Ok(app) => app,
    Err(e) => {
      error!("failed to start: {}", e);
      std::process::exit(1);
    }
  };

  let mut current: Option<ConversationId> = match app.latest_conversation() {
    Ok(id) => id,
    Err(e) => {
      warn!("could not look up the latest conversation: {}", e);
      None
    }
  };
  println!("localchat; /help for commands");
  if let Some(id) = &current {
    println!("continuing {}", id);
  }

  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  let mut stdout = tokio::io::stdout();
  loop {
    let _ = stdout.write_all(b"> ").await;
    let _ = stdout.flush().await;

    let line = match lines.next_line().await {
      Ok(Some(line)) => line,
      Ok(None) => break,
      Err(e) => {
        error!("failed to read input: {}", e);
        break;
      }
    };

    match handle(&mut app, &mut current, parse_input(&line)).await {
      Ok(true) => {}
      Ok(false) => break,
      Err(e) => eprintln!("error: {}", e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_slash_commands() {
    assert_eq!(parse_input("/new"), Input::New);
    assert_eq!(parse_input("  /switch 2024-06-20_03:15_PM__1a2b3c4d "), Input::Switch("2024-06-20_03:15_PM__1a2b3c4d"));
    assert_eq!(parse_input("/set model claude-3-haiku-20240307"), Input::Set("model", "claude-3-haiku-20240307"));
    assert_eq!(parse_input("/set system_prompt Be brief.  Very brief."), Input::Set("system_prompt", "Be brief.  Very brief."));
    assert!(matches!(parse_input("/set model"), Input::Invalid(_)));
    assert!(matches!(parse_input("/switch"), Input::Invalid(_)));
    assert!(matches!(parse_input("/frobnicate"), Input::Invalid(_)));
  }

  #[test]
  fn plain_text_is_a_message() {
    assert_eq!(parse_input("what is 2 + 2?"), Input::Message("what is 2 + 2?"));
    assert_eq!(parse_input("   "), Input::Message(""));
  }
}
