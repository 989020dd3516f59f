//! Runner - executes a task's command as a child shell process
//!
//! Drives the task through Running to a terminal status and persists every
//! transition. Output goes straight to `logs/<id>.stdout.log` and
//! `logs/<id>.stderr.log`; nothing is buffered in memory.
//!
//! - `registry`: live processes owned by this process, for termination
//! - `handle`: [`RunHandle`] returned by background runs
//! - `signal`: process-group signals (Unix)

mod handle;
mod registry;
#[cfg(unix)]
pub mod signal;

pub use handle::RunHandle;
pub use registry::{LiveProcess, ProcessRegistry};

use crate::log::TaskLogger;
use crate::state::TaskStatus;
use crate::storage::TaskStorage;
use crate::task::{Task, TaskId};
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use sysrow_foundation::{DataLayout, Error, Result, SysrowConfig};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shell used to run task commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shell {
    pub program: String,
    pub flag: String,
}

impl Shell {
    pub fn new(program: impl Into<String>, flag: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            flag: flag.into(),
        }
    }

    /// `sh -c` on Unix, `cmd /C` on Windows
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self::new("cmd", "/C")
        } else {
            Self::new("sh", "-c")
        }
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::platform_default()
    }
}

/// Captured process output of a task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Spawns and supervises task processes
#[derive(Debug, Clone)]
pub struct Runner {
    layout: DataLayout,
    storage: Arc<TaskStorage>,
    logger: Arc<TaskLogger>,
    registry: ProcessRegistry,
    shell: Shell,

    /// SIGTERM -> SIGKILL escalation delay
    kill_grace: Duration,
}

impl Runner {
    pub fn new(storage: Arc<TaskStorage>, logger: Arc<TaskLogger>) -> Self {
        Self {
            layout: storage.layout().clone(),
            storage,
            logger,
            registry: ProcessRegistry::new(),
            shell: Shell::default(),
            kill_grace: Duration::from_secs(5),
        }
    }

    pub fn from_config(
        config: &SysrowConfig,
        storage: Arc<TaskStorage>,
        logger: Arc<TaskLogger>,
    ) -> Self {
        Self::new(storage, logger).with_kill_grace(config.kill_grace_duration())
    }

    pub fn with_shell(mut self, shell: Shell) -> Self {
        self.shell = shell;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn storage(&self) -> &Arc<TaskStorage> {
        &self.storage
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Run a pending task.
    ///
    /// Foreground: returns `None` once the final status is persisted, with
    /// `task` updated to it. Background: returns as soon as the process is
    /// started, with `task` in the Running state and a handle to the
    /// supervisor.
    pub async fn run_task(&self, task: &mut Task, background: bool) -> Result<Option<RunHandle>> {
        if background {
            let handle = self.run_background(task).await?;
            Ok(Some(handle))
        } else {
            self.run_foreground(task).await?;
            Ok(None)
        }
    }

    /// Run to completion
    pub async fn run_foreground(&self, task: &mut Task) -> Result<()> {
        let (child, token) = self.launch(task).await?;
        *task = self.clone().supervise(task.id, child, token).await?;
        Ok(())
    }

    /// Start the process and supervise it on a separate tokio task
    pub async fn run_background(&self, task: &mut Task) -> Result<RunHandle> {
        let (child, token) = self.launch(task).await?;
        let task_id = task.id;
        let join = tokio::spawn(self.clone().supervise(task_id, child, token.clone()));
        Ok(RunHandle::new(task_id, join, token))
    }

    /// Spawn the child and persist the Running snapshot.
    ///
    /// The stored record decides whether the task may run: `task` can be a
    /// queue or group snapshot taken before a cancel.
    async fn launch(&self, task: &mut Task) -> Result<(Child, CancellationToken)> {
        let stored = self.storage.load_task(&task.id)?;
        if !stored.status.is_pending() {
            let err = not_pending(&stored);
            *task = stored;
            return Err(err);
        }

        let key = task.id.to_string();
        let logs_dir = self.layout.logs_dir();
        fs::create_dir_all(&logs_dir)
            .map_err(|e| Error::from_path("create directory", &logs_dir, e))?;
        let stdout = open_append(&self.layout.stdout_log(&key))?;
        let stderr = open_append(&self.layout.stderr_log(&key))?;

        self.app_info(&task.id, format!("Starting task: {}", task.command));

        let mut command = Command::new(&self.shell.program);
        command
            .arg(&self.shell.flag)
            .arg(&task.command)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                error!(task_id = %task.id, error = %source, "failed to start process");
                *task = self.storage.update_task(&task.id, |t| t.fail_to_start())?;
                self.app_error(&task.id, format!("Failed to start process: {}", source));
                return Err(Error::ProcessStart {
                    task_id: key,
                    source,
                });
            }
        };

        let pid = child.id().unwrap_or_default();
        match self.storage.update_task(&task.id, |t| {
            if !t.status.is_pending() {
                return Err(not_pending(t));
            }
            t.start(pid)
        }) {
            Ok(running) => *task = running,
            Err(e) => {
                warn!(task_id = %task.id, pid, error = %e, "task cannot enter running, killing process");
                self.app_error(&task.id, format!("Process {} stopped: {}", pid, e));
                discard(&mut child, pid).await;
                if let Ok(stored) = self.storage.load_task(&task.id) {
                    *task = stored;
                }
                return Err(e);
            }
        }

        let token = self.registry.register(task.id, pid).await;
        info!(task_id = %task.id, pid, "task started");
        self.app_info(&task.id, format!("Started process with PID {}", pid));
        Ok((child, token))
    }

    /// Wait for exit (or a termination request) and persist the final status
    async fn supervise(self, task_id: TaskId, mut child: Child, token: CancellationToken) -> Result<Task> {
        let pid = child.id();
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = token.cancelled() => None,
        };
        let (status, cancelled) = match exited {
            Some(status) => (status, false),
            None => (self.shutdown(&mut child, pid).await, true),
        };
        if let Some(process) = self.registry.remove(&task_id).await {
            debug!(task_id = %task_id, pid = process.pid, "released process");
        }

        let exit_code = match &status {
            Ok(status) => exit_code(status),
            Err(e) => {
                error!(task_id = %task_id, error = %e, "failed to wait for process");
                1
            }
        };

        // A concurrent cancel may already have written a terminal status.
        let task = self.storage.update_task(&task_id, |task| {
            if !task.status.is_running() {
                return Ok(());
            }
            if cancelled {
                task.mark_cancelled()
            } else {
                task.finish(exit_code)
            }
        })?;

        match task.status {
            TaskStatus::Completed => {
                info!(task_id = %task_id, "task completed");
                self.app_info(&task_id, "Task completed with exit code 0");
            }
            TaskStatus::Failed => {
                info!(task_id = %task_id, exit_code, "task failed");
                self.app_error(&task_id, format!("Task failed with exit code {}", exit_code));
            }
            TaskStatus::Cancelled => {
                info!(task_id = %task_id, "task cancelled");
                self.app_info(&task_id, "Task cancelled");
            }
            other => debug!(task_id = %task_id, status = %other, "unexpected status after exit"),
        }
        Ok(task)
    }

    /// SIGTERM the process group, escalate to SIGKILL after the grace period
    async fn shutdown(&self, child: &mut Child, pid: Option<u32>) -> std::io::Result<ExitStatus> {
        #[cfg(unix)]
        {
            if let Some(pid) = pid {
                match signal::terminate_group(pid) {
                    Ok(_) => {
                        let wait = tokio::time::timeout(self.kill_grace, child.wait()).await;
                        if let Ok(status) = wait {
                            return status;
                        }
                        warn!(pid, grace = ?self.kill_grace, "grace period expired, killing process group");
                        if let Err(e) = signal::kill_group(pid) {
                            warn!(pid, error = %e, "failed to kill process group");
                        }
                    }
                    Err(e) => warn!(pid, error = %e, "failed to send SIGTERM"),
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = pid;
        }

        if let Err(e) = child.start_kill() {
            debug!(error = %e, "kill after termination request");
        }
        child.wait().await
    }

    /// Request termination of a process owned by this runner.
    /// False when the task has no live process here.
    pub async fn terminate(&self, task_id: &TaskId) -> bool {
        self.registry.terminate(task_id).await
    }

    pub async fn running_tasks(&self) -> Vec<TaskId> {
        self.registry.task_ids().await
    }

    // ========================================================================
    // Logs
    // ========================================================================

    /// Captured stdout and stderr. Either file missing is `NotFound`.
    pub fn get_task_logs(&self, task_id: &TaskId) -> Result<TaskOutput> {
        let key = task_id.to_string();
        Ok(TaskOutput {
            stdout: read_log(&self.layout.stdout_log(&key))?,
            stderr: read_log(&self.layout.stderr_log(&key))?,
        })
    }

    fn app_info(&self, task_id: &TaskId, message: impl AsRef<str>) {
        if let Err(e) = self.logger.info(task_id, message) {
            warn!(task_id = %task_id, error = %e, "failed to write app log");
        }
    }

    fn app_error(&self, task_id: &TaskId, message: impl AsRef<str>) {
        if let Err(e) = self.logger.error(task_id, message) {
            warn!(task_id = %task_id, error = %e, "failed to write app log");
        }
    }
}

fn not_pending(task: &Task) -> Error {
    Error::InvalidState(format!(
        "task {} is {}, only pending tasks can be run",
        task.id, task.status
    ))
}

/// Kill a child that must not run, including anything it already forked
async fn discard(child: &mut Child, pid: u32) {
    #[cfg(unix)]
    {
        if let Err(e) = signal::kill_group(pid) {
            debug!(pid, error = %e, "failed to kill process group");
        }
    }
    if let Err(e) = child.start_kill() {
        debug!(pid, error = %e, "kill of discarded process");
    }
    let _ = child.wait().await;
}

/// Real exit code when there is one, 1 otherwise (e.g. killed by a signal)
fn exit_code(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::from_path("open", path, e))
}

fn read_log(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::from_path("read", path, e))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::task::TaskPriority;
    use std::time::Instant;
    use tempfile::{tempdir, TempDir};

    fn runner() -> (TempDir, Runner) {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure().unwrap();
        let storage = Arc::new(TaskStorage::new(layout.clone()));
        let logger = Arc::new(TaskLogger::new(layout));
        let runner = Runner::new(storage, logger).with_kill_grace(Duration::from_secs(2));
        (dir, runner)
    }

    fn pending(runner: &Runner, command: &str) -> Task {
        let task = Task::new(command, TaskPriority::Normal);
        runner.storage().save_task(&task).unwrap();
        task
    }

    #[tokio::test]
    async fn test_foreground_success() {
        let (_dir, runner) = runner();
        let mut task = pending(&runner, "echo hello; echo oops >&2");

        let handle = runner.run_task(&mut task, false).await.unwrap();
        assert!(handle.is_none());

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.exit_code, Some(0));
        assert!(task.pid.is_none());
        assert!(task.finished_at.unwrap() >= task.started_at.unwrap());
        assert_eq!(runner.storage().load_task(&task.id).unwrap(), task);

        let output = runner.get_task_logs(&task.id).unwrap();
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "oops\n");
        assert!(runner.running_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_foreground_exit_code() {
        let (_dir, runner) = runner();
        let mut task = pending(&runner, "exit 3");

        runner.run_foreground(&mut task).await.unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_start_failure_marks_failed() {
        let (_dir, runner) = runner();
        let runner = runner.with_shell(Shell::new("/nonexistent/shell", "-c"));
        let mut task = pending(&runner, "echo never");

        let err = runner.run_task(&mut task, false).await.unwrap_err();
        assert!(matches!(err, Error::ProcessStart { .. }));

        let stored = runner.storage().load_task(&task.id).unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.exit_code, Some(1));
        assert!(stored.pid.is_none());
        assert!(stored.finished_at.is_some());
        assert_eq!(task, stored);
    }

    #[tokio::test]
    async fn test_rejects_non_pending() {
        let (_dir, runner) = runner();
        let mut task = pending(&runner, "true");
        runner.run_foreground(&mut task).await.unwrap();

        let err = runner.run_foreground(&mut task).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_outdated_pending_copy_does_not_run_cancelled_task() {
        let (dir, runner) = runner();
        let marker = dir.path().join("ran");
        let mut stale = pending(&runner, &format!("touch {}", marker.display()));
        let cancelled = runner
            .storage()
            .update_task(&stale.id, |t| t.mark_cancelled())
            .unwrap();

        for background in [false, true] {
            let mut copy = stale.clone();
            let err = runner.run_task(&mut copy, background).await.unwrap_err();
            assert!(matches!(err, Error::InvalidState(_)));
            assert_eq!(copy, cancelled);
        }

        let err = runner.run_task(&mut stale, false).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert!(!marker.exists());
        assert_eq!(runner.storage().load_task(&stale.id).unwrap(), cancelled);
        assert!(runner.running_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_keeps_cancel_made_meanwhile() {
        let (_dir, runner) = runner();
        let runner = runner.with_shell(Shell::new("/nonexistent/shell", "-c"));
        let mut stale = pending(&runner, "echo never");
        runner
            .storage()
            .update_task(&stale.id, |t| t.mark_cancelled())
            .unwrap();

        assert!(runner.run_task(&mut stale, false).await.is_err());
        let stored = runner.storage().load_task(&stale.id).unwrap();
        assert_eq!(stored.status, TaskStatus::Cancelled);
        assert!(stored.exit_code.is_none());
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_run() {
        let (_dir, runner) = runner();
        let mut task = Task::new("true", TaskPriority::Normal);
        let err = runner.run_task(&mut task, false).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_background_returns_while_running() {
        let (_dir, runner) = runner();
        let mut task = pending(&runner, "sleep 0.3; echo done");

        let handle = runner.run_task(&mut task, true).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.pid.is_some());

        let stored = runner.storage().load_task(&task.id).unwrap();
        assert_eq!(stored.status, TaskStatus::Running);
        assert_eq!(stored.pid, task.pid);

        let finished = handle.wait().await.unwrap();
        assert_eq!(finished.status, TaskStatus::Completed);
        assert_eq!(runner.get_task_logs(&task.id).unwrap().stdout, "done\n");
    }

    #[tokio::test]
    async fn test_background_finalizes_without_handle() {
        let (_dir, runner) = runner();
        let mut task = pending(&runner, "exit 4");

        drop(runner.run_background(&mut task).await.unwrap());

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let stored = runner.storage().load_task(&task.id).unwrap();
            if stored.is_terminal() {
                assert_eq!(stored.status, TaskStatus::Failed);
                assert_eq!(stored.exit_code, Some(4));
                break;
            }
            assert!(Instant::now() < deadline, "task never finished");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_terminate_cancels_running_task() {
        let (_dir, runner) = runner();
        let mut task = pending(&runner, "sleep 30");

        let handle = runner.run_background(&mut task).await.unwrap();
        assert!(runner.terminate(&task.id).await);

        let started = Instant::now();
        let finished = handle.wait().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(finished.status, TaskStatus::Cancelled);
        assert!(finished.pid.is_none());
        assert!(finished.exit_code.is_none());
        assert!(!runner.terminate(&task.id).await);
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        let (_dir, runner) = runner();
        let runner = runner.with_kill_grace(Duration::from_millis(200));
        let mut task = pending(&runner, "trap '' TERM; sleep 30");

        let handle = runner.run_background(&mut task).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();

        let finished = handle.wait().await.unwrap();
        assert_eq!(finished.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_exit_leaves_concurrent_cancel_in_place() {
        let (_dir, runner) = runner();
        let mut task = pending(&runner, "sleep 0.2");

        let handle = runner.run_background(&mut task).await.unwrap();
        runner
            .storage()
            .update_task(&task.id, |t| t.mark_cancelled())
            .unwrap();

        let finished = handle.wait().await.unwrap();
        assert_eq!(finished.status, TaskStatus::Cancelled);
        assert!(finished.exit_code.is_none());
    }

    #[tokio::test]
    async fn test_logs_missing_is_not_found() {
        let (_dir, runner) = runner();
        assert!(runner.get_task_logs(&TaskId::new()).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_app_log_records_lifecycle() {
        let (dir, runner) = runner();
        let mut task = pending(&runner, "true");
        runner.run_foreground(&mut task).await.unwrap();

        let logger = TaskLogger::new(DataLayout::new(dir.path()));
        let log = logger.get_logs(&task.id).unwrap();
        assert!(log.contains("[INFO] Starting task: true"));
        assert!(log.contains("[INFO] Started process with PID"));
        assert!(log.contains("[INFO] Task completed with exit code 0"));
    }
}
