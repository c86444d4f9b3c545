use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const COMMAND_LOG_FILE: &str = "commands.log";

pub fn init_logging(default_directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .try_init()
        .is_ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandLevel {
    Info,
    Error,
}

impl CommandLevel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Error => "error",
        }
    }
}

#[derive(Debug)]
pub struct CommandLog {
    path: PathBuf,
    guard: Mutex<()>,
}

impl CommandLog {
    pub fn new(logs_dir: &Path) -> Self {
        Self {
            path: logs_dir.join(COMMAND_LOG_FILE),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, level: CommandLevel, command: &str, message: &str) {
        match level {
            CommandLevel::Info => tracing::info!(command, "{message}"),
            CommandLevel::Error => tracing::error!(command, "{message}"),
        }

        let Ok(_guard) = self.guard.lock() else {
            return;
        };
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level.as_str(),
            "command": command,
            "message": message,
        });
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(file, "{payload}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_log_appends_json_lines() {
        let dir = tempfile::tempdir().expect("temp dir");
        let log = CommandLog::new(dir.path());

        log.append(CommandLevel::Info, "create_todo", "created todo-1");
        log.append(CommandLevel::Error, "migrate_local_todos", "remote unavailable");

        let raw = std::fs::read_to_string(log.path()).expect("read log");
        let lines = raw
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).expect("json line"))
            .collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["command"], "create_todo");
        assert_eq!(lines[1]["level"], "error");
    }

    #[test]
    fn init_logging_is_safe_to_call_twice() {
        init_logging("focusdo=debug");
        assert!(!init_logging("focusdo=debug"));
    }
}
