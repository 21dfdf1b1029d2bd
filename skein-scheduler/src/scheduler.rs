//! The scheduler handle and the state its workers share.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use skein_core::{
    GroupHint, Placement, SchedulerConfig, SchedulerError, SchedulerId, SchedulerResult,
    TaskError, TaskResult,
};
use skein_utils::{CacheAligned, CpuSet, Topology};
use tracing::{debug, warn};

use crate::builder::SchedulerBuilder;
use crate::group::{GroupInfo, WorkerGroup};
use crate::lock;
use crate::placement;
use crate::task::{Task, TaskFn};
use crate::worker;

/// Set in `Shared::live` once the scheduler stopped accepting tasks.
const CLOSED: usize = 1 << (usize::BITS - 1);

/// State shared by every handle and worker of one scheduler.
pub(crate) struct Shared {
    id: SchedulerId,
    groups: Vec<WorkerGroup>,
    /// Live external handles.
    handles: AtomicUsize,
    shutdown: AtomicBool,
    /// Admitted tasks that are not yet terminal, plus the `CLOSED` bit.
    live: CacheAligned<AtomicUsize>,
    next_group: CacheAligned<AtomicUsize>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    pub(crate) fn id(&self) -> SchedulerId {
        self.id
    }

    pub(crate) fn group(&self, index: usize) -> &WorkerGroup {
        &self.groups[index]
    }

    /// Map a hint to a group index.
    ///
    /// `Any` prefers the calling worker's own group and falls back to
    /// round-robin for threads outside this scheduler.
    pub(crate) fn resolve_group(&self, hint: GroupHint) -> TaskResult<usize> {
        let groups = self.groups.len();
        match hint {
            GroupHint::Index(index) if index < groups => Ok(index),
            GroupHint::Index(index) => Err(TaskError::InvalidGroup { index, groups }),
            GroupHint::Any => Ok(worker::current_group(self.id)
                .unwrap_or_else(|| self.next_group.fetch_add(1, Ordering::Relaxed) % groups)),
        }
    }

    pub(crate) fn push(&self, group: usize, task: Task) {
        self.groups[group].push(task);
    }

    pub(crate) fn remove(&self, group: usize, task: &Task) {
        self.groups[group].remove(task);
    }

    /// Count a task entering `Blocked`.
    pub(crate) fn task_admitted(&self) -> TaskResult<()> {
        let mut live = self.live.load(Ordering::SeqCst);
        loop {
            if live & CLOSED != 0 {
                return Err(TaskError::SchedulerGone);
            }
            match self
                .live
                .compare_exchange_weak(live, live + 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return Ok(()),
                Err(current) => live = current,
            }
        }
    }

    /// Count an admitted task becoming terminal.
    pub(crate) fn task_settled(&self) {
        if self.live.fetch_sub(1, Ordering::SeqCst) == 1 && self.shutdown.load(Ordering::SeqCst) {
            self.close();
        }
    }

    /// Refuse further admissions and stop every group, once no admitted
    /// task is left.
    fn close(&self) {
        if self
            .live
            .compare_exchange(0, CLOSED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            debug!(scheduler = %self.id, "closed");
            for group in &self.groups {
                group.stop();
            }
        }
    }

    /// Let the workers run every admitted task to completion, then stop
    /// them and join. Idempotent. Called on a worker of this scheduler it
    /// does not join, since the caller's own task keeps the others alive.
    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(scheduler = %self.id, "shutting down");
        self.close();

        let workers = mem::take(&mut *lock(&self.workers));
        if worker::current_group(self.id).is_some() {
            debug!(scheduler = %self.id, "shut down from a worker; threads detached");
            return;
        }
        for handle in workers {
            if handle.join().is_err() {
                warn!(scheduler = %self.id, "worker thread panicked");
            }
        }
        debug!(scheduler = %self.id, "shut down");
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Left behind only if workers died before closing.
        for group in &self.groups {
            for task in group.drain() {
                task.abandon();
            }
        }
    }
}

/// A dependency-aware pool of worker threads.
///
/// Cloning a `Scheduler` adds a handle. When the last handle is dropped the
/// workers keep running until every admitted task is terminal, including
/// tasks admitted by those tasks, then exit and are joined. After that,
/// admission fails with [`TaskError::SchedulerGone`]. The handle given to a
/// running task does not count; clone it to keep the scheduler alive past
/// the task.
pub struct Scheduler {
    shared: Arc<Shared>,
    owned: bool,
}

impl Scheduler {
    /// `groups` groups of `threads_per_group` unpinned threads.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ZeroGroups`] or [`SchedulerError::ZeroThreads`] for
    /// zero inputs, [`SchedulerError::ThreadSpawn`] if the OS refuses a
    /// thread.
    pub fn new(groups: usize, threads_per_group: usize) -> SchedulerResult<Self> {
        Self::builder()
            .placement(Placement::Explicit {
                groups,
                threads_per_group,
            })
            .build()
    }

    /// One group per NUMA node with allowed CPUs, each running
    /// `threads_per_group` threads pinned to the node.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ZeroThreads`], [`SchedulerError::NoEligibleCpus`]
    /// when the filter leaves no CPU, or a topology or spawn failure.
    pub fn pinned_per_numa_node(cpus: Option<&CpuSet>, threads_per_group: usize) -> SchedulerResult<Self> {
        Self::builder()
            .placement(Placement::PinnedPerNumaNode {
                cpus: cpus.cloned(),
                nodes: None,
                threads_per_group,
            })
            .build()
    }

    /// One group per NUMA node with allowed CPUs and one thread pinned to
    /// each of those CPUs.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::NoEligibleCpus`] when the filter leaves no CPU, or
    /// a topology or spawn failure.
    pub fn pinned_per_cpu_grouped_by_numa_node(cpus: Option<&CpuSet>) -> SchedulerResult<Self> {
        Self::builder()
            .placement(Placement::PinnedPerCpuGroupedByNumaNode {
                cpus: cpus.cloned(),
                nodes: None,
            })
            .build()
    }

    /// One thread pinned to each allowed CPU, clustered into at most
    /// `max_groups` groups.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ZeroGroups`] if `max_groups` is zero,
    /// [`SchedulerError::NoEligibleCpus`] when the filter leaves no CPU, or
    /// a topology or spawn failure.
    pub fn pinned_per_cpu(cpus: Option<&CpuSet>, max_groups: usize) -> SchedulerResult<Self> {
        Self::builder()
            .placement(Placement::PinnedPerCpu {
                cpus: cpus.cloned(),
                max_groups,
            })
            .build()
    }

    /// Start configuring a scheduler.
    #[must_use]
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub(crate) fn spawn(config: &SchedulerConfig, topology: &dyn Topology) -> SchedulerResult<Self> {
        let plans = placement::plan(&config.placement, topology)?;
        let groups = plans
            .iter()
            .enumerate()
            .map(|(index, plan)| WorkerGroup::new(index, plan.numa_node, plan.cpus.clone(), plan.threads.len()))
            .collect();

        // Dropping this handle on an early return stops and joins whatever
        // was already spawned.
        let scheduler = Self {
            shared: Arc::new(Shared {
                id: SchedulerId::next(),
                groups,
                handles: AtomicUsize::new(1),
                shutdown: AtomicBool::new(false),
                live: CacheAligned::new(AtomicUsize::new(0)),
                next_group: CacheAligned::new(AtomicUsize::new(0)),
                workers: Mutex::new(Vec::new()),
            }),
            owned: true,
        };

        for (index, plan) in plans.into_iter().enumerate() {
            for thread_plan in plan.threads {
                let mut builder = thread::Builder::new()
                    .name(format!("{}-{}", config.thread_name_prefix, thread_plan.label));
                if let Some(size) = config.stack_size {
                    builder = builder.stack_size(size);
                }

                let shared = Arc::clone(&scheduler.shared);
                let pin = thread_plan.pin.filter(|_| config.pin_threads);
                let handle = builder
                    .spawn(move || worker::run(shared, index, pin))
                    .map_err(|err| SchedulerError::ThreadSpawn(err.to_string()))?;
                lock(&scheduler.shared.workers).push(handle);
            }
        }

        debug!(
            scheduler = %scheduler.id(),
            groups = scheduler.group_count(),
            threads = scheduler.thread_count(),
            "scheduler started"
        );
        Ok(scheduler)
    }

    /// New external handle to existing state.
    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        shared.handles.fetch_add(1, Ordering::Relaxed);
        Self { shared, owned: true }
    }

    /// Handle lent to payloads; does not keep the scheduler running.
    pub(crate) fn worker_handle(shared: Arc<Shared>) -> Self {
        Self { shared, owned: false }
    }

    /// Process-unique identifier.
    #[must_use]
    pub fn id(&self) -> SchedulerId {
        self.shared.id
    }

    /// Number of worker groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.shared.groups.len()
    }

    /// Number of worker threads over all groups.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.shared.groups.iter().map(WorkerGroup::threads).sum()
    }

    /// Ready tasks waiting in any group's queue.
    #[must_use]
    pub fn queued_tasks(&self) -> usize {
        self.shared.groups.iter().map(WorkerGroup::len).sum()
    }

    /// Per-group snapshot.
    #[must_use]
    pub fn groups(&self) -> Vec<GroupInfo> {
        self.shared.groups.iter().map(WorkerGroup::info).collect()
    }

    /// Worker threads that are currently in their execution loop.
    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.shared.groups.iter().map(WorkerGroup::active_threads).sum()
    }

    /// Create a task that runs `func` once admitted.
    pub fn allocate<F>(&self, func: F) -> Task
    where
        F: FnOnce(&Scheduler, &Task) + Send + 'static,
    {
        Task::new(&self.shared, None, Box::new(func) as TaskFn)
    }

    /// [`allocate`](Self::allocate) with a name that shows up in logs.
    pub fn allocate_named<F>(&self, name: impl Into<String>, func: F) -> Task
    where
        F: FnOnce(&Scheduler, &Task) + Send + 'static,
    {
        Task::new(&self.shared, Some(name.into()), Box::new(func))
    }

    /// Admit an allocated task; it runs once its dependencies are terminal.
    ///
    /// # Errors
    ///
    /// [`TaskError::AlreadyAdmitted`], [`TaskError::ForeignTask`] or
    /// [`TaskError::SchedulerGone`] once the scheduler has shut down.
    pub fn admit(&self, task: &Task) -> TaskResult<()> {
        self.admit_to_group(task, GroupHint::Any)
    }

    /// [`admit`](Self::admit) with a group choice.
    ///
    /// # Errors
    ///
    /// As [`admit`](Self::admit), plus [`TaskError::InvalidGroup`].
    pub fn admit_to_group(&self, task: &Task, group: GroupHint) -> TaskResult<()> {
        task.admit(&self.shared, group)
    }

    /// Allocate and admit a task with no dependencies.
    ///
    /// # Errors
    ///
    /// As [`submit_with_deps`](Self::submit_with_deps).
    pub fn submit<F>(&self, func: F) -> TaskResult<Task>
    where
        F: FnOnce(&Scheduler, &Task) + Send + 'static,
    {
        self.submit_with_deps(GroupHint::Any, &[], func)
    }

    /// Allocate a task, depend it on `deps` and admit it to `group`.
    ///
    /// Nothing is admitted if a dependency is rejected.
    ///
    /// # Errors
    ///
    /// Any error of [`Task::add_dep`] or [`admit_to_group`](Self::admit_to_group).
    pub fn submit_with_deps<F>(&self, group: GroupHint, deps: &[Task], func: F) -> TaskResult<Task>
    where
        F: FnOnce(&Scheduler, &Task) + Send + 'static,
    {
        let task = self.allocate(func);
        task.add_dep(deps)?;
        self.admit_to_group(&task, group)?;
        Ok(task)
    }
}

impl Clone for Scheduler {
    fn clone(&self) -> Self {
        Self::from_shared(Arc::clone(&self.shared))
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.owned && self.shared.handles.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.shutdown();
        }
    }
}

impl PartialEq for Scheduler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Scheduler {}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.shared.id)
            .field("groups", &self.shared.groups)
            .field("queued", &self.queued_tasks())
            .finish()
    }
}
