//! Data directory layout
//!
//! ```text
//! <root>/
//! ├── tasks/<id>.json
//! ├── groups/<id>.json
//! └── logs/<id>.stdout.log, <id>.stderr.log, <id>.app.log
//! ```

use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

const TASKS_DIR: &str = "tasks";
const GROUPS_DIR: &str = "groups";
const LOGS_DIR: &str = "logs";

/// Paths under a data root. Passed explicitly to every subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root and its three subdirectories
    pub fn ensure(&self) -> Result<()> {
        for dir in [self.tasks_dir(), self.groups_dir(), self.logs_dir()] {
            fs::create_dir_all(&dir).map_err(|e| Error::from_path("create directory", &dir, e))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join(TASKS_DIR)
    }

    pub fn groups_dir(&self) -> PathBuf {
        self.root.join(GROUPS_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    /// Captured process stdout
    pub fn stdout_log(&self, id: &str) -> PathBuf {
        self.logs_dir().join(format!("{}.stdout.log", id))
    }

    /// Captured process stderr
    pub fn stderr_log(&self, id: &str) -> PathBuf {
        self.logs_dir().join(format!("{}.stderr.log", id))
    }

    /// Internal diagnostic log
    pub fn app_log(&self, id: &str) -> PathBuf {
        self.logs_dir().join(format!("{}.app.log", id))
    }

    /// Every log file that belongs to a task
    pub fn task_logs(&self, id: &str) -> [PathBuf; 3] {
        [self.stdout_log(id), self.stderr_log(id), self.app_log(id)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths() {
        let layout = DataLayout::new("/data");
        assert_eq!(layout.tasks_dir(), PathBuf::from("/data/tasks"));
        assert_eq!(layout.groups_dir(), PathBuf::from("/data/groups"));
        assert_eq!(
            layout.stdout_log("t1"),
            PathBuf::from("/data/logs/t1.stdout.log")
        );
        assert_eq!(
            layout.task_logs("t1")[2],
            PathBuf::from("/data/logs/t1.app.log")
        );
    }

    #[test]
    fn test_ensure_creates_tree() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path().join("sysrow"));
        layout.ensure().unwrap();

        assert!(layout.tasks_dir().is_dir());
        assert!(layout.groups_dir().is_dir());
        assert!(layout.logs_dir().is_dir());

        // idempotent
        layout.ensure().unwrap();
    }
}
