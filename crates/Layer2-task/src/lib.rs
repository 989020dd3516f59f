//! # sysrow-task
//!
//! Background task management for SysRow.
//! Tasks are shell commands with a persisted lifecycle:
//!
//! - **Task**: id, command, priority and the Pending → Running → terminal state machine
//! - **Storage**: one JSON snapshot per task, retention sweep
//! - **Queue**: in-memory priority order over pending tasks
//! - **Runner**: child processes with output captured to log files,
//!   foreground or background, with termination through a process registry
//! - **Group**: named, ordered task lists run sequentially
//! - **Logger**: per-task application log
//! - **TaskManager**: all of the above behind one facade

pub mod group;
pub mod log;
pub mod manager;
pub mod queue;
pub mod runner;
pub mod state;
pub mod storage;
pub mod task;

// Task system
pub use state::TaskStatus;
pub use task::{Task, TaskId, TaskPriority};

// Persistence and ordering
pub use queue::TaskQueue;
pub use storage::TaskStorage;

// Execution
pub use runner::{LiveProcess, ProcessRegistry, RunHandle, Runner, Shell, TaskOutput};

// Groups
pub use group::{Group, GroupId, GroupManager, GroupRun, MemberOutcome, MemberRun};

// Log system
pub use log::{LogLevel, TaskLogger};

// Facade
pub use manager::{Started, TaskLogs, TaskManager};
