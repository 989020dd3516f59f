//! Live process registry: task id -> running child owned by this process

use crate::task::TaskId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// A child process supervised by this process
#[derive(Debug, Clone)]
pub struct LiveProcess {
    pub pid: u32,

    /// Cancelled to request termination
    token: CancellationToken,
}

/// Running processes by task ID
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    processes: Arc<RwLock<HashMap<TaskId, LiveProcess>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly spawned child. The returned token fires when
    /// termination is requested.
    pub async fn register(&self, task_id: TaskId, pid: u32) -> CancellationToken {
        let token = CancellationToken::new();
        let process = LiveProcess {
            pid,
            token: token.clone(),
        };
        self.processes.write().await.insert(task_id, process);
        token
    }

    pub async fn remove(&self, task_id: &TaskId) -> Option<LiveProcess> {
        self.processes.write().await.remove(task_id)
    }

    /// Request termination. False when the task is not owned here.
    pub async fn terminate(&self, task_id: &TaskId) -> bool {
        match self.processes.read().await.get(task_id) {
            Some(process) => {
                process.token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn task_ids(&self) -> Vec<TaskId> {
        self.processes.read().await.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_terminate() {
        let registry = ProcessRegistry::new();
        let id = TaskId::new();

        let token = registry.register(id, 1234).await;
        assert_eq!(registry.task_ids().await, vec![id]);
        assert!(!token.is_cancelled());

        assert!(registry.terminate(&id).await);
        assert!(token.is_cancelled());

        let removed = registry.remove(&id).await.unwrap();
        assert_eq!(removed.pid, 1234);
        assert!(!registry.terminate(&id).await);
        assert!(registry.task_ids().await.is_empty());
    }
}
