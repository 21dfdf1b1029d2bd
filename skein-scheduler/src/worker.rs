//! Worker thread loop and the per-thread "current task" record.

use std::cell::RefCell;
use std::sync::Arc;

use skein_core::SchedulerId;
use skein_utils::{numa, CpuSet};
use tracing::{debug, trace, warn};

use crate::scheduler::{Scheduler, Shared};
use crate::task::Task;

/// What the calling worker thread is executing right now.
struct Current {
    shared: Arc<Shared>,
    group: usize,
    task: Task,
}

thread_local! {
    static CURRENT: RefCell<Option<Current>> = const { RefCell::new(None) };
}

/// Publishes a [`Current`] for the duration of one task invocation.
struct CurrentGuard {
    previous: Option<Current>,
}

impl CurrentGuard {
    fn enter(current: Current) -> Self {
        let previous = CURRENT.with(|slot| slot.replace(Some(current)));
        Self { previous }
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        // Dropped after the borrow ends: releasing the scheduler may run
        // arbitrary destructors.
        let _finished = CURRENT.with(|slot| slot.replace(previous));
    }
}

/// The scheduler whose task is executing on this thread.
///
/// `None` on threads that are not inside a task invocation, including
/// worker threads between tasks. The returned handle keeps the scheduler
/// alive like any other clone.
#[must_use]
pub fn current_scheduler() -> Option<Scheduler> {
    CURRENT.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|current| Scheduler::from_shared(Arc::clone(&current.shared)))
    })
}

/// The task executing on this thread, if any.
#[must_use]
pub fn current_task() -> Option<Task> {
    CURRENT.with(|slot| slot.borrow().as_ref().map(|current| current.task.clone()))
}

pub(crate) fn is_current_task(task: &Task) -> bool {
    CURRENT.with(|slot| {
        slot.borrow()
            .as_ref()
            .is_some_and(|current| current.task.ptr_eq(task))
    })
}

/// Group of the calling worker when it belongs to scheduler `id`.
pub(crate) fn current_group(id: SchedulerId) -> Option<usize> {
    CURRENT.with(|slot| {
        slot.borrow()
            .as_ref()
            .filter(|current| current.shared.id() == id)
            .map(|current| current.group)
    })
}

/// Body of every worker thread: pin, then drain the group queue until the
/// scheduler stops.
pub(crate) fn run(shared: Arc<Shared>, group: usize, pin: Option<CpuSet>) {
    if let Some(cpus) = &pin {
        if let Err(err) = numa::pin_current_thread(cpus) {
            warn!(scheduler = %shared.id(), group, cpus = %cpus, error = %err, "failed to pin worker");
        }
    }

    let scheduler = Scheduler::worker_handle(Arc::clone(&shared));
    let worker_group = shared.group(group);
    worker_group.thread_started();
    debug!(scheduler = %shared.id(), group, "worker started");

    while let Some(task) = worker_group.next_task() {
        trace!(task = %task.id(), group, "run");
        let _current = CurrentGuard::enter(Current {
            shared: Arc::clone(&shared),
            group,
            task: task.clone(),
        });
        task.run(&scheduler);
    }

    worker_group.thread_stopped();
    debug!(scheduler = %shared.id(), group, "worker stopped");
}
