//! Durable task records
//!
//! One `tasks/<id>.json` snapshot per task. Every operation runs under a
//! single in-process mutex. Separate processes sharing a data directory are
//! not coordinated: each write is atomic (temp file + rename) but a
//! read-modify-write can still lose an update made by another process.

use crate::task::{Task, TaskId, TaskPriority};
use chrono::Utc;
use parking_lot::Mutex;
use std::fs;
use std::time::Duration;
use sysrow_foundation::{DataLayout, Error, JsonStore, Listing, Result, SysrowConfig};
use tracing::{debug, info, warn};

/// File-backed task store
#[derive(Debug)]
pub struct TaskStorage {
    layout: DataLayout,
    store: JsonStore,

    /// Keep the persisted priority on load. When false a loaded task
    /// always comes back at Normal priority.
    restore_priority: bool,

    lock: Mutex<()>,
}

impl TaskStorage {
    pub fn new(layout: DataLayout) -> Self {
        Self {
            store: JsonStore::new(layout.tasks_dir()),
            layout,
            restore_priority: false,
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &SysrowConfig) -> Result<Self> {
        Ok(Self::new(config.layout()?).with_restore_priority(config.restore_priority))
    }

    pub fn with_restore_priority(mut self, restore: bool) -> Self {
        self.restore_priority = restore;
        self
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    // ========================================================================
    // CRUD
    // ========================================================================

    /// Upsert a complete snapshot
    pub fn save_task(&self, task: &Task) -> Result<()> {
        let _guard = self.lock.lock();
        self.save_locked(task)
    }

    /// Missing record is `NotFound`, an unparsable one is `Corrupt`
    pub fn load_task(&self, id: &TaskId) -> Result<Task> {
        let _guard = self.lock.lock();
        self.load_locked(id)
    }

    /// Every readable task, oldest first. Unreadable records are skipped.
    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.scan_tasks()?.items)
    }

    /// Like [`list_tasks`](Self::list_tasks) but also reports the skipped records
    pub fn scan_tasks(&self) -> Result<Listing<Task>> {
        let _guard = self.lock.lock();
        self.scan_locked()
    }

    pub fn delete_task(&self, id: &TaskId) -> Result<()> {
        let _guard = self.lock.lock();
        self.store.remove_record(&id.to_string())?;
        debug!(task_id = %id, "deleted task record");
        Ok(())
    }

    /// Load, apply `f`, save. Nothing is written when `f` fails.
    pub fn update_task<F>(&self, id: &TaskId, f: F) -> Result<Task>
    where
        F: FnOnce(&mut Task) -> Result<()>,
    {
        let _guard = self.lock.lock();
        let mut task = self.load_locked(id)?;
        f(&mut task)?;
        self.save_locked(&task)?;
        Ok(task)
    }

    // ========================================================================
    // Retention
    // ========================================================================

    /// Delete tasks that finished more than `age` ago, with their log files.
    /// Running tasks and tasks without `finished_at` are never swept.
    /// Returns the removed ids.
    pub fn cleanup_old_tasks(&self, age: Duration) -> Result<Vec<TaskId>> {
        let _guard = self.lock.lock();
        let age = chrono::Duration::from_std(age)
            .map_err(|_| Error::InvalidInput(format!("retention age too large: {:?}", age)))?;
        let now = Utc::now();

        let mut removed = Vec::new();
        for task in self.scan_locked()?.items {
            if task.status.is_running() {
                continue;
            }
            let Some(finished_at) = task.finished_at else {
                continue;
            };
            if now - finished_at <= age {
                continue;
            }

            let key = task.id.to_string();
            if let Err(e) = self.store.remove_record(&key) {
                warn!(task_id = %task.id, error = %e, "failed to delete task record");
                continue;
            }
            for log_file in self.layout.task_logs(&key) {
                match fs::remove_file(&log_file) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(path = %log_file.display(), error = %e, "failed to delete log file")
                    }
                }
            }
            removed.push(task.id);
        }

        info!(count = removed.len(), "retention sweep finished");
        Ok(removed)
    }

    // ========================================================================
    // Lock-held helpers
    // ========================================================================

    fn save_locked(&self, task: &Task) -> Result<()> {
        self.store.save_record(&task.id.to_string(), task)
    }

    fn load_locked(&self, id: &TaskId) -> Result<Task> {
        let task = self
            .store
            .load_record::<Task>(&id.to_string())
            .map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(format!("task {}", id)),
                other => other,
            })?;
        Ok(self.normalize(task))
    }

    fn scan_locked(&self) -> Result<Listing<Task>> {
        let mut listing = self.store.scan::<Task>()?.map(|task| self.normalize(task));
        listing.items.sort_by_key(|task| task.created_at);
        Ok(listing)
    }

    fn normalize(&self, mut task: Task) -> Task {
        if !self.restore_priority {
            task.priority = TaskPriority::Normal;
        }
        task
    }
}
