//! Task groups
//!
//! A group is a named, ordered list of task IDs persisted as
//! `groups/<id>.json`. It references its tasks but does not own them:
//! deleting a group leaves every member task in place.

use crate::log::TaskLogger;
use crate::runner::{RunHandle, Runner};
use crate::state::TaskStatus;
use crate::storage::TaskStorage;
use crate::task::{Task, TaskId, TaskPriority};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use sysrow_foundation::{DataLayout, Error, JsonStore, Listing, Result};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Unique identifier for a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub Uuid);

impl GroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GroupId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| Error::InvalidInput(format!("invalid group id: {}", s)))
    }
}

/// Named collection of task IDs, in execution order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub task_ids: Vec<TaskId>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: GroupId::new(),
            name: name.into(),
            task_ids: Vec::new(),
        }
    }
}

// ============================================================================
// Group run results
// ============================================================================

/// What happened to one member during a group run
#[derive(Debug)]
pub enum MemberOutcome {
    /// Ran in the foreground; final task state
    Finished(Task),

    /// Started in the background
    Detached(RunHandle),

    /// The run returned an error (e.g. the process could not be started)
    Failed(String),

    /// Not run: the task could not be loaded or was not pending
    Skipped(String),
}

#[derive(Debug)]
pub struct MemberRun {
    pub task_id: TaskId,
    pub outcome: MemberOutcome,
}

/// Result of [`GroupManager::run_group`]
#[derive(Debug)]
pub struct GroupRun {
    pub group: Group,
    pub members: Vec<MemberRun>,
}

impl GroupRun {
    /// Wait for every detached member. Optional: a background group run has
    /// no completion signal unless the caller asks for one here.
    pub async fn wait_all(self) -> GroupRun {
        let members = self.members.into_iter().map(|member| async move {
            let outcome = match member.outcome {
                MemberOutcome::Detached(handle) => match handle.wait().await {
                    Ok(task) => MemberOutcome::Finished(task),
                    Err(e) => MemberOutcome::Failed(e.to_string()),
                },
                other => other,
            };
            MemberRun {
                task_id: member.task_id,
                outcome,
            }
        });

        GroupRun {
            group: self.group,
            members: join_all(members).await,
        }
    }

    /// Members that ran to a terminal state
    pub fn finished(&self) -> impl Iterator<Item = &Task> {
        self.members.iter().filter_map(|m| match &m.outcome {
            MemberOutcome::Finished(task) => Some(task),
            _ => None,
        })
    }

    /// Every member ran and completed with exit code 0
    pub fn all_succeeded(&self) -> bool {
        self.members.iter().all(|m| {
            matches!(&m.outcome, MemberOutcome::Finished(task) if task.status == TaskStatus::Completed)
        })
    }
}

// ============================================================================
// GroupManager
// ============================================================================

/// Creates, persists and runs groups
#[derive(Debug)]
pub struct GroupManager {
    store: JsonStore,
    storage: Arc<TaskStorage>,
    logger: Arc<TaskLogger>,
    lock: Mutex<()>,
}

impl GroupManager {
    pub fn new(layout: &DataLayout, storage: Arc<TaskStorage>, logger: Arc<TaskLogger>) -> Self {
        Self {
            store: JsonStore::new(layout.groups_dir()),
            storage,
            logger,
            lock: Mutex::new(()),
        }
    }

    /// Create an empty group. Names are unique (case-sensitive).
    pub fn create_group(&self, name: &str) -> Result<Group> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("group name must not be empty".to_string()));
        }

        let _guard = self.lock.lock();
        if self.find_locked(name)?.is_some() {
            return Err(Error::Duplicate(format!("group '{}' already exists", name)));
        }

        let group = Group::new(name);
        self.save_locked(&group)?;
        info!(group = %group.name, id = %group.id, "created group");
        Ok(group)
    }

    /// Create a Normal-priority task in the group.
    ///
    /// The task and the group are written separately. A crash between the two
    /// writes leaves a pending task that no group references.
    pub fn add_task(&self, group_name: &str, command: &str) -> Result<Task> {
        let _guard = self.lock.lock();
        let mut group = self.require_locked(group_name)?;

        let task = Task::new(command, TaskPriority::Normal).with_group(group.id);
        self.storage.save_task(&task)?;

        group.task_ids.push(task.id);
        self.save_locked(&group)?;

        if let Err(e) = self
            .logger
            .info(&task.id, format!("Added to group {}", group.name))
        {
            warn!(task_id = %task.id, error = %e, "failed to write app log");
        }
        debug!(group = %group.name, task_id = %task.id, "added task to group");
        Ok(task)
    }

    pub fn get_group_by_name(&self, name: &str) -> Result<Group> {
        let _guard = self.lock.lock();
        self.require_locked(name)
    }

    /// Every readable group. Unreadable records are skipped.
    pub fn list_groups(&self) -> Result<Vec<Group>> {
        Ok(self.scan_groups()?.items)
    }

    /// Like [`list_groups`](Self::list_groups) but also reports skipped records
    pub fn scan_groups(&self) -> Result<Listing<Group>> {
        let _guard = self.lock.lock();
        self.scan_locked()
    }

    /// Remove the group record only; member tasks are untouched
    pub fn delete_group(&self, name: &str) -> Result<Group> {
        let _guard = self.lock.lock();
        let group = self.require_locked(name)?;
        self.store.remove_record(&group.id.to_string())?;
        info!(group = %group.name, "deleted group");
        Ok(group)
    }

    /// Run every member in stored order.
    ///
    /// Foreground: each member finishes before the next starts. A failed
    /// member does not stop the rest. Background: every member is started
    /// without waiting; see [`GroupRun::wait_all`].
    pub async fn run_group(&self, name: &str, runner: &Runner, background: bool) -> Result<GroupRun> {
        let group = self.get_group_by_name(name)?;
        info!(group = %group.name, members = group.task_ids.len(), background, "running group");

        let mut members = Vec::with_capacity(group.task_ids.len());
        for task_id in &group.task_ids {
            let outcome = self.run_member(task_id, runner, background).await;
            members.push(MemberRun {
                task_id: *task_id,
                outcome,
            });
        }

        Ok(GroupRun { group, members })
    }

    async fn run_member(&self, task_id: &TaskId, runner: &Runner, background: bool) -> MemberOutcome {
        let mut task = match self.storage.load_task(task_id) {
            Ok(task) => task,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "skipping group member");
                return MemberOutcome::Skipped(e.to_string());
            }
        };
        if !task.status.is_pending() {
            return MemberOutcome::Skipped(format!("task is {}", task.status));
        }

        match runner.run_task(&mut task, background).await {
            Ok(Some(handle)) => MemberOutcome::Detached(handle),
            Ok(None) => MemberOutcome::Finished(task),
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "group member failed");
                MemberOutcome::Failed(e.to_string())
            }
        }
    }

    // ========================================================================
    // Lock-held helpers
    // ========================================================================

    fn scan_locked(&self) -> Result<Listing<Group>> {
        let mut listing = self.store.scan::<Group>()?;
        listing.items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }

    fn find_locked(&self, name: &str) -> Result<Option<Group>> {
        Ok(self
            .scan_locked()?
            .items
            .into_iter()
            .find(|group| group.name == name))
    }

    fn require_locked(&self, name: &str) -> Result<Group> {
        self.find_locked(name)?
            .ok_or_else(|| Error::NotFound(format!("group '{}'", name)))
    }

    fn save_locked(&self, group: &Group) -> Result<()> {
        self.store.save_record(&group.id.to_string(), group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn manager() -> (TempDir, Arc<TaskStorage>, GroupManager) {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure().unwrap();
        let storage = Arc::new(TaskStorage::new(layout.clone()));
        let logger = Arc::new(TaskLogger::new(layout.clone()));
        let groups = GroupManager::new(&layout, Arc::clone(&storage), logger);
        (dir, storage, groups)
    }

    #[test]
    fn test_create_rejects_duplicate_names() {
        let (_dir, _storage, groups) = manager();

        let nightly = groups.create_group("nightly").unwrap();
        assert!(nightly.task_ids.is_empty());

        let err = groups.create_group("nightly").unwrap_err();
        assert!(matches!(err, Error::Duplicate(_)));

        // case-sensitive
        groups.create_group("Nightly").unwrap();
        assert_eq!(groups.list_groups().unwrap().len(), 2);
    }

    #[test]
    fn test_create_rejects_empty_name() {
        let (_dir, _storage, groups) = manager();
        assert!(matches!(groups.create_group("  "), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_add_task_appends_in_order() {
        let (_dir, storage, groups) = manager();
        let group = groups.create_group("nightly").unwrap();

        let first = groups.add_task("nightly", "echo one").unwrap();
        let second = groups.add_task("nightly", "echo two").unwrap();

        assert_eq!(first.group_id, Some(group.id));
        assert_eq!(first.priority, TaskPriority::Normal);
        assert_eq!(storage.load_task(&second.id).unwrap().command, "echo two");

        let stored = groups.get_group_by_name("nightly").unwrap();
        assert_eq!(stored.task_ids, vec![first.id, second.id]);
    }

    #[test]
    fn test_add_task_to_missing_group() {
        let (_dir, storage, groups) = manager();
        assert!(groups.add_task("nope", "true").unwrap_err().is_not_found());
        assert!(storage.list_tasks().unwrap().is_empty());
    }

    #[test]
    fn test_delete_keeps_member_tasks() {
        let (_dir, storage, groups) = manager();
        groups.create_group("nightly").unwrap();
        let task = groups.add_task("nightly", "true").unwrap();

        let deleted = groups.delete_group("nightly").unwrap();
        assert_eq!(deleted.task_ids, vec![task.id]);
        assert!(groups.get_group_by_name("nightly").unwrap_err().is_not_found());
        assert!(groups.delete_group("nightly").unwrap_err().is_not_found());
        assert!(storage.load_task(&task.id).is_ok());
    }

    #[test]
    fn test_json_shape() {
        let mut group = Group::new("nightly");
        group.task_ids.push(TaskId::new());
        let value = serde_json::to_value(&group).unwrap();

        assert_eq!(value["name"], "nightly");
        assert_eq!(value["id"], group.id.to_string());
        assert_eq!(value["task_ids"][0], group.task_ids[0].to_string());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_group_continues_after_failure() {
        let (dir, storage, groups) = manager();
        let logger = Arc::new(TaskLogger::new(DataLayout::new(dir.path())));
        let runner = Runner::new(Arc::clone(&storage), logger);

        groups.create_group("mixed").unwrap();
        let failing = groups.add_task("mixed", "exit 2").unwrap();
        let passing = groups.add_task("mixed", "echo ok").unwrap();

        let run = groups.run_group("mixed", &runner, false).await.unwrap();
        let statuses: Vec<_> = run.finished().map(|t| (t.id, t.status)).collect();
        assert_eq!(
            statuses,
            vec![
                (failing.id, TaskStatus::Failed),
                (passing.id, TaskStatus::Completed)
            ]
        );
        assert!(!run.all_succeeded());

        // already terminal members are skipped on a re-run
        let rerun = groups.run_group("mixed", &runner, false).await.unwrap();
        assert!(rerun
            .members
            .iter()
            .all(|m| matches!(m.outcome, MemberOutcome::Skipped(_))));
    }
}
