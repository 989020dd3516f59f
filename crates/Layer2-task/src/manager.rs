//! Task Manager - one entry point over storage, queue, runner and groups
//!
//! Built from a [`SysrowConfig`]; every subsystem receives the data layout
//! explicitly.

use crate::group::{Group, GroupManager, GroupRun};
use crate::log::TaskLogger;
use crate::queue::TaskQueue;
use crate::runner::{RunHandle, Runner, TaskOutput};
use crate::storage::TaskStorage;
use crate::task::{Task, TaskId, TaskPriority};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use sysrow_foundation::{DataLayout, Error, Listing, Result, SysrowConfig};
use tracing::{debug, info, warn};

/// Everything recorded for a task: captured output plus the app log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskLogs {
    pub stdout: String,
    pub stderr: String,
    pub app: String,
}

/// A started run: the task as of return, plus the supervisor handle for
/// background runs
#[derive(Debug)]
pub struct Started {
    pub task: Task,
    pub handle: Option<RunHandle>,
}

/// Task Manager - handles task lifecycle and execution
#[derive(Debug, Clone)]
pub struct TaskManager {
    config: Arc<SysrowConfig>,
    layout: DataLayout,
    storage: Arc<TaskStorage>,
    logger: Arc<TaskLogger>,
    runner: Runner,
    groups: Arc<GroupManager>,
}

impl TaskManager {
    /// Resolve the data directory, create its tree and wire the subsystems
    pub fn open(config: SysrowConfig) -> Result<Self> {
        let layout = config.layout()?;
        layout.ensure()?;

        let storage = Arc::new(TaskStorage::from_config(&config)?);
        let logger = Arc::new(TaskLogger::new(layout.clone()));
        let runner = Runner::from_config(&config, Arc::clone(&storage), Arc::clone(&logger));
        let groups = Arc::new(GroupManager::new(
            &layout,
            Arc::clone(&storage),
            Arc::clone(&logger),
        ));

        debug!(data_dir = %layout.root().display(), "opened task manager");
        Ok(Self {
            config: Arc::new(config),
            layout,
            storage,
            logger,
            runner,
            groups,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn storage(&self) -> &Arc<TaskStorage> {
        &self.storage
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    pub fn groups(&self) -> &GroupManager {
        &self.groups
    }

    // ========================================================================
    // Creating tasks
    // ========================================================================

    /// Persist a new pending task
    pub fn queue_task(&self, command: &str, priority: TaskPriority) -> Result<Task> {
        self.create(Task::new(command, priority))
    }

    /// Persist a pending task that the queue holds back until `at`
    pub fn delay_task(&self, command: &str, priority: TaskPriority, at: DateTime<Utc>) -> Result<Task> {
        self.create(Task::new(command, priority).with_schedule(at))
    }

    fn create(&self, task: Task) -> Result<Task> {
        if task.command.trim().is_empty() {
            return Err(Error::InvalidInput("command must not be empty".to_string()));
        }
        self.storage.save_task(&task)?;
        let message = match task.scheduled_at {
            Some(at) => format!("Task queued for {}", at.to_rfc3339()),
            None => format!("Task queued with {} priority", task.priority),
        };
        if let Err(e) = self.logger.info(&task.id, message) {
            warn!(task_id = %task.id, error = %e, "failed to write app log");
        }
        info!(task_id = %task.id, priority = %task.priority, "queued task");
        Ok(task)
    }

    /// Snapshot of pending tasks in execution order
    pub fn queue(&self) -> Result<TaskQueue> {
        TaskQueue::load(&self.storage)
    }

    // ========================================================================
    // Running
    // ========================================================================

    /// Create a task for `command` and run it right away
    pub async fn run_command(&self, command: &str, background: bool) -> Result<Started> {
        let task = self.queue_task(command, TaskPriority::Normal)?;
        self.start(task, background).await
    }

    /// Run a stored pending task
    pub async fn run_task(&self, id: &TaskId, background: bool) -> Result<Started> {
        let task = self.storage.load_task(id)?;
        self.start(task, background).await
    }

    /// Run the highest-priority pending task that is due. `None` when
    /// nothing is due.
    pub async fn run_next(&self, background: bool) -> Result<Option<Started>> {
        let queue = self.queue()?;
        match queue.get_next_due(Utc::now()) {
            Some(task) => Ok(Some(self.start(task, background).await?)),
            None => Ok(None),
        }
    }

    pub async fn run_group(&self, name: &str, background: bool) -> Result<GroupRun> {
        self.groups.run_group(name, &self.runner, background).await
    }

    async fn start(&self, mut task: Task, background: bool) -> Result<Started> {
        let handle = self.runner.run_task(&mut task, background).await?;
        Ok(Started { task, handle })
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Mark a pending or running task Cancelled, then stop its process.
    ///
    /// A process supervised by this manager is terminated through the runner.
    /// Otherwise the recorded pid's process group is sent SIGTERM (Unix only;
    /// elsewhere a process owned by another invocation keeps running).
    pub async fn cancel(&self, id: &TaskId) -> Result<Task> {
        let mut pid = None;
        let task = self.storage.update_task(id, |task| {
            pid = task.pid;
            task.mark_cancelled()
        })?;

        if let Err(e) = self.logger.info(id, "Task cancelled") {
            warn!(task_id = %id, error = %e, "failed to write app log");
        }

        if self.runner.terminate(id).await {
            info!(task_id = %id, "terminating owned process");
        } else if let Some(pid) = pid {
            signal_foreign(id, pid);
        }
        Ok(task)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn status(&self, id: &TaskId) -> Result<Task> {
        self.storage.load_task(id)
    }

    /// All tasks, oldest first, plus the records that could not be read
    pub fn list(&self) -> Result<Listing<Task>> {
        self.storage.scan_tasks()
    }

    pub fn list_groups(&self) -> Result<Listing<Group>> {
        self.groups.scan_groups()
    }

    /// Captured output and app log. A task that never ran has empty output.
    pub fn logs(&self, id: &TaskId) -> Result<TaskLogs> {
        let task = self.storage.load_task(id)?;
        let output = match self.runner.get_task_logs(id) {
            Ok(output) => output,
            Err(e) if e.is_not_found() && task.started_at.is_none() => TaskOutput::default(),
            Err(e) => return Err(e),
        };
        Ok(TaskLogs {
            stdout: output.stdout,
            stderr: output.stderr,
            app: self.logger.get_logs(id)?,
        })
    }

    // ========================================================================
    // Retention
    // ========================================================================

    pub fn cleanup(&self, age: Duration) -> Result<Vec<TaskId>> {
        self.storage.cleanup_old_tasks(age)
    }

    /// Sweep with the configured retention age
    pub fn cleanup_expired(&self) -> Result<Vec<TaskId>> {
        self.cleanup(self.config.retention_duration())
    }
}

#[cfg(unix)]
fn signal_foreign(id: &TaskId, pid: u32) {
    match crate::runner::signal::terminate_group(pid) {
        Ok(true) => info!(task_id = %id, pid, "sent SIGTERM to task process group"),
        Ok(false) => debug!(task_id = %id, pid, "task process already gone"),
        Err(e) => warn!(task_id = %id, pid, error = %e, "failed to signal task process"),
    }
}

#[cfg(not(unix))]
fn signal_foreign(id: &TaskId, pid: u32) {
    warn!(task_id = %id, pid, "cannot signal a process owned by another invocation on this platform");
}
