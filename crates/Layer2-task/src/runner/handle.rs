//! Handle to a background run

use crate::task::{Task, TaskId};
use sysrow_foundation::{Error, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Returned by a background run.
///
/// Awaiting it is optional: dropping the handle leaves the supervisor running
/// and the outcome is then only observable through storage.
pub struct RunHandle {
    task_id: TaskId,
    join: JoinHandle<Result<Task>>,
    token: CancellationToken,
}

impl RunHandle {
    pub(crate) fn new(task_id: TaskId, join: JoinHandle<Result<Task>>, token: CancellationToken) -> Self {
        Self {
            task_id,
            join,
            token,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Supervisor has finalized the task
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Terminate the process. The task finalizes as Cancelled.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the final persisted task
    pub async fn wait(self) -> Result<Task> {
        self.join.await.map_err(|e| {
            Error::Internal(format!("supervisor for task {} failed: {}", self.task_id, e))
        })?
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("task_id", &self.task_id)
            .field("finished", &self.join.is_finished())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
