//! # Skein Core
//!
//! Core types shared by the Skein scheduler crates: identifiers, the task
//! lifecycle state machine, error enums and scheduler configuration.
//!
//! A skein is a loosely wound bundle of threads; the scheduler winds units
//! of work onto a fixed bundle of OS threads in the order their declared
//! dependencies allow.

#![deny(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod config;
pub mod error;

pub use config::{Placement, SchedulerConfig};
pub use error::{SchedulerError, SchedulerResult, TaskError, TaskResult};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for tasks within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Create a task ID from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocate the next process-unique task ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// A unique identifier for scheduler instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchedulerId(u64);

impl SchedulerId {
    /// Create a scheduler ID from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocate the next process-unique scheduler ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SchedulerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scheduler({})", self.0)
    }
}

/// Lifecycle of a task.
///
/// Transitions only move forward:
/// `Created -> Blocked|Ready -> Running -> Done`, with `Cancelled` reachable
/// from every admitted state that has not started running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Allocated; dependencies may still be added.
    Created,
    /// Admitted, waiting on at least one dependency.
    Blocked,
    /// Admitted with all dependencies terminal; sitting in a ready queue.
    Ready,
    /// Payload is executing on a worker thread.
    Running,
    /// Payload returned.
    Done,
    /// Cancelled before it started running.
    Cancelled,
}

impl TaskState {
    /// `Done` or `Cancelled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }

    /// Any state past `Created`.
    #[must_use]
    pub const fn is_admitted(self) -> bool {
        !matches!(self, Self::Created)
    }

    /// `Blocked` or `Ready`: admitted but not yet started.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Blocked | Self::Ready)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Blocked => write!(f, "Blocked"),
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::Done => write!(f, "Done"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Which worker group a task should be queued on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GroupHint {
    /// Let the scheduler choose: the submitting worker's own group when
    /// called from a task, otherwise round-robin.
    #[default]
    Any,
    /// A specific group index.
    Index(usize),
}

impl From<usize> for GroupHint {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}
