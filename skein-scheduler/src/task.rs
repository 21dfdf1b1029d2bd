//! Tasks and their dependency bookkeeping.

use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use skein_core::{GroupHint, SchedulerId, TaskError, TaskId, TaskResult, TaskState};
use tracing::{error, trace, warn};

use crate::lock;
use crate::scheduler::{Scheduler, Shared};
use crate::worker;

/// Work carried by a task.
///
/// The closure's captures are the task's data; dropping them is its
/// destructor. A payload is consumed when the task runs and dropped
/// unrun when the task is cancelled.
pub type TaskFn = Box<dyn FnOnce(&Scheduler, &Task) + Send + 'static>;

struct TaskSlot {
    state: TaskState,
    payload: Option<TaskFn>,
    /// Recorded while `Created`, consumed by admission.
    deps: Vec<Task>,
    /// Unfinished dependencies plus one admission guard.
    pending: usize,
    /// Tasks blocked on this one. Holding them here keeps them alive.
    dependents: Vec<Task>,
    group: Option<usize>,
}

struct TaskInner {
    id: TaskId,
    name: Option<String>,
    scheduler: Weak<Shared>,
    scheduler_id: SchedulerId,
    slot: Mutex<TaskSlot>,
    finished: Condvar,
}

/// Handle to a unit of work.
///
/// Cloning a `Task` adds a reference; the task lives until the last
/// handle is dropped, which may be long after it finished. The scheduler
/// holds its own reference from admission until the task is terminal.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    pub(crate) fn new(shared: &Arc<Shared>, name: Option<String>, payload: TaskFn) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: TaskId::next(),
                name,
                scheduler: Arc::downgrade(shared),
                scheduler_id: shared.id(),
                slot: Mutex::new(TaskSlot {
                    state: TaskState::Created,
                    payload: Some(payload),
                    deps: Vec::new(),
                    pending: 0,
                    dependents: Vec::new(),
                    group: None,
                }),
                finished: Condvar::new(),
            }),
        }
    }

    /// Process-unique identifier.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Debug name given at allocation.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        lock(&self.inner.slot).state
    }

    /// Whether the task is `Done` or `Cancelled`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Worker group the task was queued on; `None` until admitted.
    #[must_use]
    pub fn group(&self) -> Option<usize> {
        lock(&self.inner.slot).group
    }

    /// Scheduler that allocated this task.
    #[must_use]
    pub fn scheduler_id(&self) -> SchedulerId {
        self.inner.scheduler_id
    }

    /// Whether both handles refer to the same task.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Record dependencies for a task that has not been admitted.
    ///
    /// Every dependency must already be admitted, belong to the same
    /// scheduler and differ from `self`. Either all edges are recorded or
    /// none are.
    ///
    /// # Errors
    ///
    /// [`TaskError::AlreadyAdmitted`] if `self` was admitted,
    /// [`TaskError::SelfDependency`], [`TaskError::ForeignTask`] or
    /// [`TaskError::DependencyNotAdmitted`] for a bad dependency.
    pub fn add_dep(&self, deps: &[Task]) -> TaskResult<()> {
        if self.state().is_admitted() {
            return Err(TaskError::AlreadyAdmitted);
        }
        for dep in deps {
            if dep.ptr_eq(self) {
                return Err(TaskError::SelfDependency);
            }
            if dep.inner.scheduler_id != self.inner.scheduler_id {
                return Err(TaskError::ForeignTask);
            }
            // States only move forward, so an admitted dep stays admitted.
            if !dep.state().is_admitted() {
                return Err(TaskError::DependencyNotAdmitted(dep.id()));
            }
        }

        let mut slot = lock(&self.inner.slot);
        if slot.state.is_admitted() {
            return Err(TaskError::AlreadyAdmitted);
        }
        slot.deps.extend(deps.iter().cloned());
        Ok(())
    }

    /// Freeze the dependency set and hand the task to the scheduler.
    pub(crate) fn admit(&self, shared: &Shared, hint: GroupHint) -> TaskResult<()> {
        if self.inner.scheduler_id != shared.id() {
            return Err(TaskError::ForeignTask);
        }
        let group = shared.resolve_group(hint)?;

        let deps = {
            let mut slot = lock(&self.inner.slot);
            if slot.state.is_admitted() {
                return Err(TaskError::AlreadyAdmitted);
            }
            shared.task_admitted()?;
            let deps = mem::take(&mut slot.deps);
            slot.state = TaskState::Blocked;
            slot.group = Some(group);
            slot.pending = deps.len() + 1;
            deps
        };

        let mut satisfied = 1;
        for dep in &deps {
            if !dep.register_dependent(self) {
                satisfied += 1;
            }
        }
        trace!(task = %self.id(), group, deps = deps.len(), "admitted");
        self.release(satisfied);
        Ok(())
    }

    /// Add `dependent` to this task's waiters. Returns `false` if this task
    /// is already terminal, in which case nothing is recorded.
    fn register_dependent(&self, dependent: &Task) -> bool {
        let mut slot = lock(&self.inner.slot);
        if slot.state.is_terminal() {
            return false;
        }
        slot.dependents.push(dependent.clone());
        true
    }

    /// One of this task's dependencies became terminal.
    fn dependency_finished(&self) {
        self.release(1);
    }

    fn release(&self, count: usize) {
        let ready = {
            let mut slot = lock(&self.inner.slot);
            slot.pending = slot.pending.saturating_sub(count);
            if slot.pending == 0 && slot.state == TaskState::Blocked {
                slot.state = TaskState::Ready;
                slot.group
            } else {
                None
            }
        };
        if let Some(group) = ready {
            self.enqueue(group);
        }
    }

    fn enqueue(&self, group: usize) {
        match self.inner.scheduler.upgrade() {
            Some(shared) => shared.push(group, self.clone()),
            None => self.abandon(),
        }
    }

    /// Execute the payload on the calling worker thread. Does nothing
    /// unless the task is `Ready`.
    pub(crate) fn run(&self, scheduler: &Scheduler) {
        let payload = {
            let mut slot = lock(&self.inner.slot);
            if slot.state != TaskState::Ready {
                trace!(task = %self.id(), state = %slot.state, "skip");
                return;
            }
            slot.state = TaskState::Running;
            slot.payload.take()
        };

        if let Some(payload) = payload {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| payload(scheduler, self)));
            if let Err(panic) = outcome {
                error!(
                    task = %self.id(),
                    name = self.name().unwrap_or_default(),
                    message = panic_message(panic.as_ref()),
                    "task panicked"
                );
            }
        }

        self.settle(lock(&self.inner.slot), TaskState::Done);
    }

    /// Move an admitted task to a terminal state, wake waiters and unblock
    /// dependents. Consumes the guard so no lock is held while dependents
    /// are touched.
    fn settle(&self, mut slot: MutexGuard<'_, TaskSlot>, state: TaskState) {
        slot.state = state;
        let payload = slot.payload.take();
        let dependents = mem::take(&mut slot.dependents);
        drop(slot);
        drop(payload);

        self.inner.finished.notify_all();
        for dependent in dependents {
            dependent.dependency_finished();
        }
        if let Some(shared) = self.inner.scheduler.upgrade() {
            shared.task_settled();
        }
    }

    /// Cancel a task whose scheduler has gone away.
    pub(crate) fn abandon(&self) {
        let slot = lock(&self.inner.slot);
        if slot.state.is_pending() {
            trace!(task = %self.id(), "abandoned");
            self.settle(slot, TaskState::Cancelled);
        }
    }

    /// Cancel the task.
    ///
    /// A task that has not started is cancelled and its payload dropped
    /// without running; its dependents are released as if it had finished.
    /// A running task cannot be interrupted: with `block` the call waits for
    /// it to finish, otherwise it fails. Cancelling a terminal task is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotAdmitted`] for a task that was never admitted,
    /// [`TaskError::Running`] for a running task when `block` is false or
    /// when the task is the one executing on this thread.
    pub fn cancel(&self, block: bool) -> TaskResult<()> {
        let is_current = worker::is_current_task(self);
        let slot = lock(&self.inner.slot);
        let state = slot.state;
        match state {
            TaskState::Created => Err(TaskError::NotAdmitted),
            TaskState::Done | TaskState::Cancelled => Ok(()),
            TaskState::Running if !block => Err(TaskError::Running),
            TaskState::Running if is_current => {
                drop(slot);
                warn!(task = %self.id(), "blocking cancel of the running task from inside itself");
                Err(TaskError::Running)
            }
            TaskState::Running => {
                let _slot = self
                    .inner
                    .finished
                    .wait_while(slot, |slot| !slot.state.is_terminal())
                    .unwrap_or_else(PoisonError::into_inner);
                Ok(())
            }
            TaskState::Blocked | TaskState::Ready => {
                let group = slot.group;
                self.settle(slot, TaskState::Cancelled);
                if let (Some(group), Some(shared)) = (group, self.inner.scheduler.upgrade()) {
                    shared.remove(group, self);
                }
                trace!(task = %self.id(), "cancelled");
                Ok(())
            }
        }
    }

    /// Block until the task is terminal. Returns `true` if it ran.
    ///
    /// A task that was never admitted can not finish, so this returns
    /// `false` right away. So does waiting on the task executing on the
    /// calling thread.
    pub fn wait(&self) -> bool {
        if worker::is_current_task(self) {
            warn!(task = %self.id(), "task waited on itself");
            return false;
        }
        let slot = lock(&self.inner.slot);
        if slot.state == TaskState::Created {
            return false;
        }
        let slot = self
            .inner
            .finished
            .wait_while(slot, |slot| !slot.state.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        slot.state == TaskState::Done
    }

    /// Like [`wait`](Self::wait) with a deadline. Returns `None` if the task
    /// is still unfinished after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<bool> {
        if worker::is_current_task(self) {
            warn!(task = %self.id(), "task waited on itself");
            return Some(false);
        }
        let slot = lock(&self.inner.slot);
        if slot.state == TaskState::Created {
            return Some(false);
        }
        let (slot, _) = self
            .inner
            .finished
            .wait_timeout_while(slot, timeout, |slot| !slot.state.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        slot.state
            .is_terminal()
            .then_some(slot.state == TaskState::Done)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Task {}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}
