//! Error types and handling for the Skein scheduler.

use thiserror::Error;

use crate::TaskId;

/// Errors that can occur while constructing a scheduler.
///
/// Construction never leaves a partially started scheduler behind: any
/// worker already spawned is stopped and joined before the error is
/// returned.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Zero worker groups were requested
    #[error("scheduler needs at least one worker group")]
    ZeroGroups,
    /// Zero threads per group were requested
    #[error("scheduler needs at least one thread per group")]
    ZeroThreads,
    /// The CPU filter left nothing to run on
    #[error("no eligible cpus after applying the cpu filter")]
    NoEligibleCpus,
    /// The topology provider failed
    #[error("topology query failed: {0}")]
    Topology(String),
    /// The OS refused to start a worker thread
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(String),
}

/// Errors reported by task graph and lifecycle operations.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task was already admitted; its dependency set is frozen
    #[error("task was already admitted")]
    AlreadyAdmitted,
    /// A dependency has not been admitted yet
    #[error("dependency {0} has not been admitted")]
    DependencyNotAdmitted(TaskId),
    /// A task named itself as a dependency
    #[error("a task cannot depend on itself")]
    SelfDependency,
    /// The task belongs to a different scheduler
    #[error("task belongs to a different scheduler")]
    ForeignTask,
    /// The group index does not exist
    #[error("group {index} out of range ({groups} groups)")]
    InvalidGroup {
        /// Requested group index
        index: usize,
        /// Number of groups in the scheduler
        groups: usize,
    },
    /// The task has never been admitted
    #[error("task has not been admitted")]
    NotAdmitted,
    /// The task is running and cannot be preempted
    #[error("task is running")]
    Running,
    /// The owning scheduler has been torn down
    #[error("scheduler has shut down")]
    SchedulerGone,
}

/// A result type for task operations.
pub type TaskResult<T> = Result<T, TaskError>;

/// A result type for scheduler construction.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl From<std::io::Error> for SchedulerError {
    fn from(err: std::io::Error) -> Self {
        Self::Topology(err.to_string())
    }
}
