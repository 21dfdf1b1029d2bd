//! Dependency-aware task scheduler.
//!
//! A [`Scheduler`] owns a fixed set of worker groups. Each group has its own
//! FIFO ready queue drained by the group's OS threads, which may be pinned
//! to the CPUs of one NUMA node or to one CPU each.
//!
//! Work is described by [`Task`]s. A task is allocated, optionally given
//! dependencies, and then admitted. Dependencies must themselves already be
//! admitted when they are named, which keeps the graph acyclic without any
//! runtime cycle detection. An admitted task becomes ready once every
//! dependency is terminal (done or cancelled) and then runs exactly once on
//! some worker of its group.
//!
//! ```no_run
//! use skein_scheduler::Scheduler;
//!
//! let scheduler = Scheduler::new(1, 4)?;
//! let parent = scheduler.submit(|_, _| println!("first"))?;
//! let child = scheduler.submit_with_deps(
//!     Default::default(),
//!     &[parent],
//!     |_, _| println!("second"),
//! )?;
//! assert!(child.wait());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]

use std::sync::{Mutex, MutexGuard, PoisonError};

mod builder;
mod group;
mod placement;
mod scheduler;
mod task;
mod worker;

pub use builder::SchedulerBuilder;
pub use group::GroupInfo;
pub use scheduler::Scheduler;
pub use task::{Task, TaskFn};
pub use worker::{current_scheduler, current_task};

pub use skein_core::{
    GroupHint, Placement, SchedulerConfig, SchedulerError, SchedulerId, SchedulerResult,
    TaskError, TaskId, TaskResult, TaskState,
};
pub use skein_utils::{CpuSet, FixedTopology, NumaNode, SystemTopology, Topology};

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Task payloads run outside every internal lock and their panics are
/// caught, so a poisoned lock still guards consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
