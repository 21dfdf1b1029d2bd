//! Dependency graph behaviour: admission rules, ordering and chains of
//! tasks that resubmit themselves.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use skein::prelude::*;

use crate::test_log;

const TIMEOUT: Duration = Duration::from_secs(30);

fn counting(scheduler: &Scheduler, counter: &Arc<AtomicUsize>) -> Task {
    let counter = Arc::clone(counter);
    scheduler.allocate(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn test_add_dep_admission_order() {
    test_log::init();
    let scheduler = Scheduler::new(1, 2).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    let t0 = counting(&scheduler, &counter);
    let t1 = counting(&scheduler, &counter);
    let t2 = counting(&scheduler, &counter);

    assert!(matches!(
        t2.add_dep(&[t1.clone(), t0.clone()]),
        Err(TaskError::DependencyNotAdmitted(_))
    ));

    scheduler.admit(&t0).unwrap();
    t1.add_dep(&[t0.clone()]).unwrap();
    scheduler.admit(&t1).unwrap();
    t2.add_dep(&[t1.clone(), t0.clone()]).unwrap();
    scheduler.admit(&t2).unwrap();

    assert!(t0.wait());
    assert!(t1.wait());
    assert!(t2.wait());
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[test]
fn test_add_dep_after_admission_fails() {
    test_log::init();
    let scheduler = Scheduler::new(1, 1).unwrap();
    let dep = scheduler.submit(|_, _| {}).unwrap();
    let task = scheduler.allocate(|_, _| {});

    assert_eq!(task.add_dep(&[dep.clone()]), Ok(()));
    scheduler.admit(&task).unwrap();
    assert_eq!(task.add_dep(&[dep.clone()]), Err(TaskError::AlreadyAdmitted));
    // Even an empty set is rejected once frozen.
    assert_eq!(task.add_dep(&[]), Err(TaskError::AlreadyAdmitted));
    assert!(task.wait());
}

#[test]
fn test_failed_add_dep_records_nothing() {
    test_log::init();
    let scheduler = Scheduler::new(1, 2).unwrap();
    let (release, gate_rx) = mpsc::channel::<()>();
    let gate = scheduler
        .submit(move |_, _| {
            let _ = gate_rx.recv();
        })
        .unwrap();
    let unadmitted = scheduler.allocate(|_, _| {});
    let task = scheduler.allocate(|_, _| {});

    // `gate` is fine but `unadmitted` is not, so neither edge is kept.
    assert!(task.add_dep(&[gate.clone(), unadmitted.clone()]).is_err());
    scheduler.admit(&task).unwrap();
    assert!(task.wait());
    assert!(!gate.is_terminal());

    drop(release);
    assert!(gate.wait());
}

#[test]
fn test_submit_with_unadmitted_dep_runs_nothing() {
    test_log::init();
    let scheduler = Scheduler::new(1, 1).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));
    let pending = scheduler.allocate(|_, _| {});

    let counter = Arc::clone(&ran);
    let err = scheduler
        .submit_with_deps(GroupHint::Any, &[pending.clone()], move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap_err();

    assert_eq!(err, TaskError::DependencyNotAdmitted(pending.id()));
    assert_eq!(scheduler.queued_tasks(), 0);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn test_dependent_starts_after_dependency() {
    test_log::init();
    let scheduler = Scheduler::new(2, 2).unwrap();

    for _ in 0..50 {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        let producer = {
            let counter = Arc::clone(&counter);
            scheduler
                .submit(move |_, _| {
                    thread::yield_now();
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
        };
        let consumer = {
            let counter = Arc::clone(&counter);
            scheduler
                .submit_with_deps(GroupHint::Any, &[producer], move |_, _| {
                    tx.send(counter.load(Ordering::SeqCst)).unwrap();
                })
                .unwrap()
        };

        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 1);
        assert!(consumer.wait());
    }
}

#[test]
fn test_fan_in_waits_for_every_dependency() {
    test_log::init();
    let scheduler = Scheduler::new(3, 2).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    let parts: Vec<Task> = (0..12)
        .map(|_| {
            let task = counting(&scheduler, &counter);
            scheduler.admit(&task).unwrap();
            task
        })
        .collect();

    let (tx, rx) = mpsc::channel();
    let seen = Arc::clone(&counter);
    let join = scheduler
        .submit_with_deps(GroupHint::Index(2), &parts, move |_, _| {
            tx.send(seen.load(Ordering::SeqCst)).unwrap();
        })
        .unwrap();

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 12);
    assert!(join.wait());
    assert_eq!(join.group(), Some(2));
}

#[test]
fn test_cancelled_dependency_unblocks_dependent() {
    test_log::init();
    let scheduler = Scheduler::new(1, 1).unwrap();
    let (release, gate_rx) = mpsc::channel::<()>();
    let gate = scheduler
        .submit(move |_, _| {
            let _ = gate_rx.recv();
        })
        .unwrap();
    let doomed = scheduler
        .submit_with_deps(GroupHint::Any, &[gate.clone()], |_, _| {})
        .unwrap();
    let dependent = scheduler
        .submit_with_deps(GroupHint::Any, &[doomed.clone()], |_, _| {})
        .unwrap();

    doomed.cancel(false).unwrap();
    drop(release);

    assert!(dependent.wait());
    assert!(!doomed.wait());
    assert!(gate.wait());
}

#[test]
fn test_dependency_already_done() {
    test_log::init();
    let scheduler = Scheduler::new(1, 1).unwrap();
    let dep = scheduler.submit(|_, _| {}).unwrap();
    assert!(dep.wait());

    let task = scheduler
        .submit_with_deps(GroupHint::Any, &[dep.clone(), dep], |_, _| {})
        .unwrap();
    assert!(task.wait());
}

/// One round of a self-replicating chain: submit a counter bump, then
/// resubmit the chain as a dependent of that bump.
fn chain_round(
    scheduler: &Scheduler,
    counter: Arc<AtomicUsize>,
    remaining: usize,
    done: mpsc::Sender<usize>,
) {
    if remaining == 0 {
        let _ = done.send(counter.load(Ordering::SeqCst));
        return;
    }

    let step = {
        let counter = Arc::clone(&counter);
        scheduler
            .submit(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
    };
    scheduler
        .submit_with_deps(GroupHint::Any, &[step], move |sched, _| {
            chain_round(sched, counter, remaining - 1, done);
        })
        .unwrap();
}

#[test]
fn test_self_replicating_chains() {
    test_log::init();
    let scheduler = Scheduler::new(1, 4).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    for rounds in [4, 10, 6] {
        let counter = Arc::clone(&counter);
        let tx = tx.clone();
        scheduler
            .submit(move |sched, _| chain_round(sched, counter, rounds, tx))
            .unwrap();
    }
    drop(tx);

    for _ in 0..3 {
        rx.recv_timeout(TIMEOUT).unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 20);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_chains_count_every_round(rounds in proptest::collection::vec(0usize..12, 1..5)) {
        let scheduler = Scheduler::new(2, 2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        for &n in &rounds {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            scheduler
                .submit(move |sched, _| chain_round(sched, counter, n, tx))
                .unwrap();
        }
        drop(tx);

        for _ in 0..rounds.len() {
            rx.recv_timeout(TIMEOUT).unwrap();
        }
        prop_assert_eq!(counter.load(Ordering::SeqCst), rounds.iter().sum::<usize>());
    }
}
