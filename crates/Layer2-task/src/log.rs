//! Per-task application log
//!
//! Append-only `logs/<id>.app.log` with one `[timestamp] [LEVEL] message`
//! line per event. Independent of the captured stdout/stderr of the process
//! and of `tracing` output.

use crate::task::TaskId;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use sysrow_foundation::{DataLayout, Error, Result};

/// Log level for application log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writes and reads `<id>.app.log` files
#[derive(Debug)]
pub struct TaskLogger {
    layout: DataLayout,
    write_lock: Mutex<()>,
}

impl TaskLogger {
    pub fn new(layout: DataLayout) -> Self {
        Self {
            layout,
            write_lock: Mutex::new(()),
        }
    }

    pub fn info(&self, task_id: &TaskId, message: impl AsRef<str>) -> Result<()> {
        self.log(task_id, LogLevel::Info, message.as_ref())
    }

    pub fn error(&self, task_id: &TaskId, message: impl AsRef<str>) -> Result<()> {
        self.log(task_id, LogLevel::Error, message.as_ref())
    }

    pub fn debug(&self, task_id: &TaskId, message: impl AsRef<str>) -> Result<()> {
        self.log(task_id, LogLevel::Debug, message.as_ref())
    }

    /// Append one line, creating the log directory and file on first use
    pub fn log(&self, task_id: &TaskId, level: LogLevel, message: &str) -> Result<()> {
        let dir = self.layout.logs_dir();
        let path = self.layout.app_log(&task_id.to_string());
        let line = format!(
            "[{}] [{}] {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            level,
            message
        );

        let _guard = self.write_lock.lock();
        fs::create_dir_all(&dir).map_err(|e| Error::from_path("create directory", &dir, e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::from_path("open", &path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| Error::from_path("append", &path, e))
    }

    /// Full log content, empty when nothing was logged yet
    pub fn get_logs(&self, task_id: &TaskId) -> Result<String> {
        let path = self.layout.app_log(&task_id.to_string());
        match fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(Error::from_path("read", &path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempdir().unwrap();
        let logger = TaskLogger::new(DataLayout::new(dir.path()));
        assert_eq!(logger.get_logs(&TaskId::new()).unwrap(), "");
    }

    #[test]
    fn test_lines_are_appended() {
        let dir = tempdir().unwrap();
        let logger = TaskLogger::new(DataLayout::new(dir.path().join("fresh")));
        let id = TaskId::new();

        logger.info(&id, "started").unwrap();
        logger.error(&id, "boom").unwrap();
        logger.debug(&id, "details").unwrap();

        let content = logger.get_logs(&id).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] [INFO] started"));
        assert!(lines[1].ends_with("] [ERROR] boom"));
        assert!(lines[2].ends_with("] [DEBUG] details"));

        let stamp = &lines[0][1..lines[0].find(']').unwrap()];
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }
}
