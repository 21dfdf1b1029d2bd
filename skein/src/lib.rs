//! # Skein
//!
//! Skein runs units of work on a fixed bundle of OS threads in the order a
//! programmer-declared dependency graph allows.
//!
//! ## Features
//!
//! - **Dependency ordering**: a task starts only after every task it
//!   depends on has finished or been cancelled
//! - **Cycle-free by construction**: a dependency must already be admitted
//!   when it is named
//! - **Topology-aware placement**: worker groups per NUMA node, threads
//!   pinned per node or per CPU
//! - **Re-entrant submission**: tasks may submit more work, including
//!   dependents of themselves, without running it inline
//! - **Cooperative cancellation**: unstarted tasks are dropped, running
//!   tasks can be waited out
//!
//! ```no_run
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use skein::prelude::*;
//!
//! let scheduler = Scheduler::new(2, 2)?;
//! let total = Arc::new(AtomicUsize::new(0));
//!
//! let parts: Vec<Task> = (1..=4)
//!     .map(|n| {
//!         let total = Arc::clone(&total);
//!         scheduler.submit(move |_, _| {
//!             total.fetch_add(n, Ordering::Relaxed);
//!         })
//!     })
//!     .collect::<Result<_, _>>()?;
//!
//! let report = {
//!     let total = Arc::clone(&total);
//!     scheduler.submit_with_deps(GroupHint::Any, &parts, move |_, _| {
//!         println!("sum = {}", total.load(Ordering::Relaxed));
//!     })?
//! };
//! assert!(report.wait());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]

use std::sync::OnceLock;

pub use skein_core::{
    config, error, GroupHint, Placement, SchedulerConfig, SchedulerError, SchedulerId,
    SchedulerResult, TaskError, TaskId, TaskResult, TaskState,
};
pub use skein_scheduler::{
    current_scheduler, current_task, GroupInfo, Scheduler, SchedulerBuilder, Task, TaskFn,
};
pub use skein_utils::{numa, CacheAligned, CpuSet, FixedTopology, NumaNode, SystemTopology, Topology};

pub mod prelude {
    //! Common imports for Skein users.

    pub use crate::{
        current_scheduler, current_task, CpuSet, GroupHint, Placement, Scheduler,
        SchedulerBuilder, SchedulerError, Task, TaskError, TaskState,
    };
}

static GLOBAL_SCHEDULER: OnceLock<Scheduler> = OnceLock::new();

/// Get or start the process-wide scheduler.
///
/// The first successful call builds it from [`SchedulerConfig::from_env`];
/// later calls return the same instance. It is never torn down.
///
/// # Errors
///
/// Whatever building the scheduler reports. A failed attempt is not
/// cached, so a later call tries again.
pub fn global() -> SchedulerResult<&'static Scheduler> {
    if let Some(scheduler) = GLOBAL_SCHEDULER.get() {
        return Ok(scheduler);
    }
    let scheduler = SchedulerBuilder::from_config(SchedulerConfig::from_env()).build()?;
    tracing::debug!(scheduler = %scheduler.id(), "global scheduler started");
    // A racing caller may have won; its instance is kept and ours is dropped.
    Ok(GLOBAL_SCHEDULER.get_or_init(|| scheduler))
}

/// Submit `func` to the [`global`] scheduler.
///
/// # Errors
///
/// [`SubmitError::Scheduler`] if the global scheduler cannot be started.
pub fn submit<F>(func: F) -> Result<Task, SubmitError>
where
    F: FnOnce(&Scheduler, &Task) + Send + 'static,
{
    Ok(global()?.submit(func)?)
}

/// Failure of a convenience call on the global scheduler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The global scheduler could not be started
    #[error("global scheduler: {0}")]
    Scheduler(#[from] SchedulerError),
    /// The task was rejected
    #[error("task: {0}")]
    Task(#[from] TaskError),
}
