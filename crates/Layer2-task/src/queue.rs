//! In-memory priority queue of pending tasks
//!
//! Order: priority (High first), then `created_at` (oldest first), then
//! insertion sequence. The queue is a point-in-time snapshot; popping a task
//! never touches its persisted status.

use crate::storage::TaskStorage;
use crate::task::{Task, TaskId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::cmp::Ordering;
use sysrow_foundation::{Error, Result};
use tracing::debug;

#[derive(Debug, Default)]
struct QueueInner {
    entries: Vec<(u64, Task)>,
    next_seq: u64,
}

impl QueueInner {
    fn sort(&mut self) {
        self.entries.sort_by(|(seq_a, a), (seq_b, b)| queue_order(a, *seq_a, b, *seq_b));
    }
}

fn queue_order(a: &Task, seq_a: u64, b: &Task, seq_b: u64) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| seq_a.cmp(&seq_b))
}

/// Pending tasks ordered for execution
#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every pending task in storage
    pub fn load(storage: &TaskStorage) -> Result<Self> {
        let queue = Self::new();
        for task in storage.list_tasks()? {
            if task.status.is_pending() {
                queue.add(task)?;
            }
        }
        debug!(len = queue.len(), "loaded queue");
        Ok(queue)
    }

    /// Insert a pending task
    pub fn add(&self, task: Task) -> Result<()> {
        if !task.status.is_pending() {
            return Err(Error::InvalidState(format!(
                "task {} is {}, only pending tasks can be queued",
                task.id, task.status
            )));
        }

        let mut inner = self.inner.lock();
        if inner.entries.iter().any(|(_, t)| t.id == task.id) {
            return Err(Error::Duplicate(format!("task {} is already queued", task.id)));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.push((seq, task));
        inner.sort();
        Ok(())
    }

    /// Pop the head of the queue
    pub fn get_next(&self) -> Option<Task> {
        let mut inner = self.inner.lock();
        if inner.entries.is_empty() {
            return None;
        }
        Some(inner.entries.remove(0).1)
    }

    /// Pop the first task whose schedule has arrived
    pub fn get_next_due(&self, now: DateTime<Utc>) -> Option<Task> {
        let mut inner = self.inner.lock();
        let index = inner.entries.iter().position(|(_, t)| t.is_due(now))?;
        Some(inner.entries.remove(index).1)
    }

    pub fn remove(&self, id: &TaskId) -> Result<Task> {
        let mut inner = self.inner.lock();
        let index = inner
            .entries
            .iter()
            .position(|(_, t)| &t.id == id)
            .ok_or_else(|| Error::NotFound(format!("task {} is not queued", id)))?;
        Ok(inner.entries.remove(index).1)
    }

    /// Copy of the queue in execution order
    pub fn list(&self) -> Vec<Task> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}
