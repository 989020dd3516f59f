//! Task definition and types

use crate::group::GroupId;
use crate::state::TaskStatus;
use crate::storage::TaskStorage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use sysrow_foundation::{Error, Result};
use uuid::Uuid;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters, for display
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| Error::InvalidInput(format!("invalid task id: {}", s)))
    }
}

/// Ordering hint for the in-memory queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "normal" => Ok(TaskPriority::Normal),
            "high" => Ok(TaskPriority::High),
            other => Err(Error::InvalidInput(format!(
                "invalid priority '{}' (expected low, normal or high)",
                other
            ))),
        }
    }
}

/// A shell command and its execution lifecycle
///
/// Fields are only mutated through the transition methods below, which keep
/// these invariants on every snapshot:
/// - `exit_code` is set iff the status is Completed or Failed
/// - `pid` is set iff the status is Running
/// - `finished_at` is set iff the status is terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    /// Shell command line
    pub command: String,

    /// Current status
    pub status: TaskStatus,

    /// Queue priority
    #[serde(default)]
    pub priority: TaskPriority,

    /// When the task was created
    pub created_at: DateTime<Utc>,

    /// Earliest time the task may be picked from the queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,

    /// When the task started executing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// OS process id while running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Owning group, when created through one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
}

impl Task {
    /// Create a new pending task
    pub fn new(command: impl Into<String>, priority: TaskPriority) -> Self {
        Self {
            id: TaskId::new(),
            command: command.into(),
            status: TaskStatus::Pending,
            priority,
            created_at: Utc::now(),
            scheduled_at: None,
            started_at: None,
            finished_at: None,
            exit_code: None,
            pid: None,
            group_id: None,
        }
    }

    /// Delay execution until `at`
    pub fn with_schedule(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Set the owning group
    pub fn with_group(mut self, group_id: GroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn check_transition(&self, next: TaskStatus) -> Result<()> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "task {} cannot go from {} to {}",
                self.id, self.status, next
            )))
        }
    }

    /// Pending -> Running with a live process
    pub fn start(&mut self, pid: u32) -> Result<()> {
        self.check_transition(TaskStatus::Running)?;
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        self.pid = Some(pid);
        Ok(())
    }

    /// Running -> Completed (code 0) or Failed
    pub fn finish(&mut self, exit_code: i32) -> Result<()> {
        let next = if exit_code == 0 {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        self.check_transition(next)?;
        self.status = next;
        self.exit_code = Some(exit_code);
        self.finished_at = Some(Utc::now());
        self.pid = None;
        Ok(())
    }

    /// The process could not be started: Pending -> Failed with exit code 1.
    /// The task is never observably Running.
    pub fn fail_to_start(&mut self) -> Result<()> {
        self.check_transition(TaskStatus::Running)?;
        let now = Utc::now();
        self.status = TaskStatus::Failed;
        self.started_at = Some(now);
        self.finished_at = Some(now);
        self.exit_code = Some(1);
        self.pid = None;
        Ok(())
    }

    /// Pending | Running -> Cancelled
    pub fn mark_cancelled(&mut self) -> Result<()> {
        self.check_transition(TaskStatus::Cancelled)?;
        self.status = TaskStatus::Cancelled;
        self.finished_at = Some(Utc::now());
        self.pid = None;
        Ok(())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write this task's snapshot
    pub fn save(&self, storage: &TaskStorage) -> Result<()> {
        storage.save_task(self)
    }

    /// Cancel the stored record and refresh `self` from it. Only flips the
    /// persisted status; stopping a live process is done by
    /// `Runner::terminate` or `TaskManager::cancel`.
    pub fn cancel(&mut self, storage: &TaskStorage) -> Result<()> {
        *self = storage.update_task(&self.id, |task| task.mark_cancelled())?;
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Check if task is still active (pending or running)
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// No schedule, or the scheduled time has arrived
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.map_or(true, |at| at <= now)
    }

    /// Get execution duration if task has started
    pub fn duration(&self) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        Some((end - start).to_std().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_new_task_is_pending() {
        let task = Task::new("echo hi", TaskPriority::High);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, TaskPriority::High);
        assert!(task.started_at.is_none());
        assert!(task.exit_code.is_none());
        assert!(task.pid.is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let ids: HashSet<TaskId> = (0..10_000)
            .map(|_| Task::new("true", TaskPriority::Normal).id)
            .collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_start_and_finish() {
        let mut task = Task::new("true", TaskPriority::Normal);
        task.start(42).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.pid, Some(42));

        task.finish(0).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.exit_code, Some(0));
        assert!(task.pid.is_none());
        assert!(task.finished_at.unwrap() >= task.started_at.unwrap());
    }

    #[test]
    fn test_nonzero_exit_is_failed() {
        let mut task = Task::new("exit 3", TaskPriority::Normal);
        task.start(1).unwrap();
        task.finish(3).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.exit_code, Some(3));
    }

    #[test]
    fn test_fail_to_start() {
        let mut task = Task::new("nope", TaskPriority::Normal);
        task.fail_to_start().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.exit_code, Some(1));
        assert!(task.pid.is_none());
        assert!(task.finished_at.is_some());
    }

    #[test]
    fn test_illegal_transition_leaves_task_unchanged() {
        let mut task = Task::new("true", TaskPriority::Normal);
        task.start(7).unwrap();
        task.finish(0).unwrap();
        let before = task.clone();

        assert!(matches!(task.mark_cancelled(), Err(Error::InvalidState(_))));
        assert!(matches!(task.start(8), Err(Error::InvalidState(_))));
        assert!(matches!(task.finish(1), Err(Error::InvalidState(_))));
        assert_eq!(task, before);
    }

    #[test]
    fn test_finish_requires_running() {
        let mut task = Task::new("true", TaskPriority::Normal);
        assert!(task.finish(0).is_err());
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_cancel_running_clears_pid() {
        let mut task = Task::new("sleep 10", TaskPriority::Normal);
        task.start(99).unwrap();
        task.mark_cancelled().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.pid.is_none());
        assert!(task.exit_code.is_none());
        assert!(task.finished_at.is_some());
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let task = Task::new("true", TaskPriority::Normal);
        assert!(task.is_due(now));

        let later = task.clone().with_schedule(now + chrono::Duration::minutes(5));
        assert!(!later.is_due(now));
        assert!(later.is_due(now + chrono::Duration::minutes(5)));
    }

    #[test]
    fn test_json_shape() {
        let task = Task::new("echo hi", TaskPriority::Low);
        let value = serde_json::to_value(&task).unwrap();

        assert_eq!(value["id"], task.id.to_string());
        assert_eq!(value["status"], "pending");
        assert_eq!(value["priority"], "low");
        assert!(value.get("created_at").is_some());
        assert!(value.get("pid").is_none());
        assert!(value.get("exit_code").is_none());
    }

    #[test]
    fn test_parse_id_and_priority() {
        let id = TaskId::new();
        assert_eq!(id.to_string().parse::<TaskId>().unwrap(), id);
        assert_eq!(id.short().len(), 8);
        assert!("not-a-uuid".parse::<TaskId>().is_err());

        assert_eq!("HIGH".parse::<TaskPriority>().unwrap(), TaskPriority::High);
        assert!("urgent".parse::<TaskPriority>().is_err());
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
    }
}
