//! Workload shapes shared by the Skein benchmarks.
//!
//! Each function builds a task graph on an existing scheduler and blocks
//! until it has drained, so a benchmark iteration measures submission,
//! dependency release and execution together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use skein::{GroupHint, Scheduler, Task, TaskResult};

/// `count` independent tasks; returns how many ran.
pub fn fan_out(scheduler: &Scheduler, count: usize) -> TaskResult<usize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let tasks = (0..count)
        .map(|_| {
            let counter = Arc::clone(&counter);
            scheduler.submit(move |_, _| {
                counter.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect::<TaskResult<Vec<Task>>>()?;

    for task in &tasks {
        task.wait();
    }
    Ok(counter.load(Ordering::Relaxed))
}

/// `count` independent tasks followed by one task depending on all of them.
pub fn fan_in(scheduler: &Scheduler, count: usize) -> TaskResult<usize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let parts = (0..count)
        .map(|_| {
            let counter = Arc::clone(&counter);
            scheduler.submit(move |_, _| {
                counter.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect::<TaskResult<Vec<Task>>>()?;

    let join = scheduler.submit_with_deps(GroupHint::Any, &parts, |_, _| {})?;
    join.wait();
    Ok(counter.load(Ordering::Relaxed))
}

/// A linear chain of `depth` tasks, each depending on the previous one.
pub fn chain(scheduler: &Scheduler, depth: usize) -> TaskResult<usize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut previous: Option<Task> = None;

    for _ in 0..depth {
        let counter = Arc::clone(&counter);
        let deps: Vec<Task> = previous.take().into_iter().collect();
        previous = Some(scheduler.submit_with_deps(GroupHint::Any, &deps, move |_, _| {
            counter.fetch_add(1, Ordering::Relaxed);
        })?);
    }

    if let Some(last) = previous {
        last.wait();
    }
    Ok(counter.load(Ordering::Relaxed))
}
