use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

#[derive(Debug, thiserror::Error)]
pub enum SafetyError {
    #[error("`filename` argument must be a filename, not a path (ex: \"file.txt\"), got {0:?}")]
    NotAFilename(String),
    #[error("Command failed: {0}")]
    CommandFailed(String),
    #[error("Command timed out after {0} seconds")]
    TimedOut(u64),
    #[error("No interpreter found on PATH (tried {0})")]
    InterpreterNotFound(String),
}

/// Resolve `filename` inside `root`, accepting only a bare file name.
pub fn workspace_file(root: &Path, filename: &str) -> Result<PathBuf, SafetyError> {
    let path = Path::new(filename);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name == path.as_os_str() => Ok(root.join(name)),
        _ => Err(SafetyError::NotAFilename(filename.to_string())),
    }
}

/// Truncate to at most `max_chars` characters, reporting whether anything was cut.
pub fn truncate_string(s: &str, max_chars: usize) -> (String, bool) {
    match s.char_indices().nth(max_chars) {
        Some((cut, _)) => (s[..cut].to_string(), true),
        None => (s.to_string(), false),
    }
}

/// Output of a finished process.
#[derive(Debug, Clone)]
pub struct SpawnOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

/// Safe command spawn with timeout
pub async fn safe_spawn(
    cmd: &str,
    args: &[&str],
    cwd: &Path,
    timeout_secs: u64,
) -> Result<SpawnOutput, SafetyError> {
    let output = timeout(
        Duration::from_secs(timeout_secs),
        Command::new(cmd)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| SafetyError::TimedOut(timeout_secs))?
    .map_err(|e| SafetyError::CommandFailed(e.to_string()))?;

    Ok(SpawnOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        code: output.status.code().unwrap_or(-1),
    })
}

/// First of `candidates` found on `PATH`.
pub fn find_interpreter(candidates: &[&str]) -> Result<PathBuf, SafetyError> {
    candidates
        .iter()
        .find_map(|c| which::which(c).ok())
        .ok_or_else(|| SafetyError::InterpreterNotFound(candidates.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_truncate_string() {
        let (result, truncated) = truncate_string("hello", 10);
        assert_eq!(result, "hello");
        assert!(!truncated);

        let (result, truncated) = truncate_string("hello world", 5);
        assert_eq!(result, "hello");
        assert!(truncated);
    }

    #[test]
    fn test_truncate_string_counts_characters() {
        // 10 characters, 30 bytes
        let text = "日本語日本語日本語日";
        let (result, truncated) = truncate_string(text, 20);
        assert_eq!(result, text);
        assert!(!truncated);

        let (result, truncated) = truncate_string(text, 10);
        assert_eq!(result, text);
        assert!(!truncated);

        let (result, truncated) = truncate_string(text, 3);
        assert_eq!(result, "日本語");
        assert!(truncated);
    }

    #[test]
    fn test_workspace_file_accepts_bare_names() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        let result = workspace_file(root, "test.txt").unwrap();
        assert_eq!(result, root.join("test.txt"));
    }

    #[test]
    fn test_workspace_file_rejects_paths() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        for bad in ["../escape.txt", "nested/file.txt", "/etc/passwd", "./file.txt", "..", ""] {
            assert!(workspace_file(root, bad).is_err(), "{bad} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_safe_spawn_captures_output() {
        let temp = TempDir::new().unwrap();
        let out = safe_spawn("sh", &["-c", "echo out; echo err >&2; exit 3"], temp.path(), 10)
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert_eq!(out.code, 3);
    }

    #[tokio::test]
    async fn test_safe_spawn_times_out() {
        let temp = TempDir::new().unwrap();
        let err = safe_spawn("sh", &["-c", "sleep 5"], temp.path(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SafetyError::TimedOut(1)));
    }
}
