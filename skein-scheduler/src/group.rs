//! Worker groups and their ready queues.

use std::collections::VecDeque;
use std::hint;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use skein_utils::{CacheAligned, CpuSet};
use tracing::{trace, warn};

use crate::lock;
use crate::task::Task;

/// Attempts to find work without sleeping before a worker blocks.
const SPIN_LIMIT: u32 = 64;

/// Snapshot of one worker group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    /// Position of the group in the scheduler
    pub index: usize,
    /// NUMA node the group is bound to, if any
    pub numa_node: Option<usize>,
    /// CPUs the group's threads are pinned to, if pinned
    pub cpus: Option<CpuSet>,
    /// Threads started for the group
    pub threads: usize,
    /// Ready tasks waiting in the group's queue
    pub queued: usize,
}

struct ReadyQueue {
    tasks: VecDeque<Task>,
    running: bool,
}

/// A set of worker threads sharing one FIFO ready queue.
pub(crate) struct WorkerGroup {
    index: usize,
    numa_node: Option<usize>,
    cpus: Option<CpuSet>,
    threads: usize,
    queue: Mutex<ReadyQueue>,
    available: Condvar,
    active: CacheAligned<AtomicUsize>,
}

impl WorkerGroup {
    pub(crate) fn new(index: usize, numa_node: Option<usize>, cpus: Option<CpuSet>, threads: usize) -> Self {
        Self {
            index,
            numa_node,
            cpus,
            threads,
            queue: Mutex::new(ReadyQueue {
                tasks: VecDeque::new(),
                running: true,
            }),
            available: Condvar::new(),
            active: CacheAligned::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn threads(&self) -> usize {
        self.threads
    }

    pub(crate) fn info(&self) -> GroupInfo {
        GroupInfo {
            index: self.index,
            numa_node: self.numa_node,
            cpus: self.cpus.clone(),
            threads: self.threads,
            queued: self.len(),
        }
    }

    /// Append a ready task and wake one sleeping worker.
    pub(crate) fn push(&self, task: Task) {
        let mut queue = lock(&self.queue);
        if self.active.load(Ordering::Relaxed) == 0 && !queue.running {
            warn!(group = self.index, task = %task.id(), "push to a group with no running threads");
        } else {
            trace!(group = self.index, task = %task.id(), "push task");
        }
        queue.tasks.push_back(task);
        drop(queue);
        self.available.notify_one();
    }

    /// Take a specific task out of the queue. Returns whether it was queued.
    pub(crate) fn remove(&self, task: &Task) -> bool {
        let mut queue = lock(&self.queue);
        match queue.tasks.iter().position(|queued| queued.ptr_eq(task)) {
            Some(pos) => {
                queue.tasks.remove(pos);
                true
            }
            None => false,
        }
    }

    fn try_pop(&self) -> Option<Task> {
        lock(&self.queue).tasks.pop_front()
    }

    /// Next task for a worker of this group. Spins briefly, then sleeps on
    /// the group's condition variable. Returns `None` once the group has
    /// been stopped and its queue is drained.
    pub(crate) fn next_task(&self) -> Option<Task> {
        for _ in 0..SPIN_LIMIT {
            if let Some(task) = self.try_pop() {
                return Some(task);
            }
            hint::spin_loop();
        }

        let mut queue = lock(&self.queue);
        loop {
            if let Some(task) = queue.tasks.pop_front() {
                return Some(task);
            }
            if !queue.running {
                return None;
            }
            trace!(group = self.index, "wait");
            queue = self
                .available
                .wait(queue)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Ask every worker of this group to drain the queue and exit.
    pub(crate) fn stop(&self) {
        lock(&self.queue).running = false;
        self.available.notify_all();
    }

    /// Remove every queued task.
    pub(crate) fn drain(&self) -> Vec<Task> {
        lock(&self.queue).tasks.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.queue).tasks.len()
    }

    pub(crate) fn thread_started(&self) {
        self.active.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn thread_stopped(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }

    /// Worker threads currently inside the execution loop.
    pub(crate) fn active_threads(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for WorkerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerGroup")
            .field("index", &self.index)
            .field("numa_node", &self.numa_node)
            .field("cpus", &self.cpus)
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}
