//! Integration tests for the Skein scheduler.

#[cfg(test)]
mod dependency_tests;

/// Test logging setup shared by every integration test.
pub mod test_log {
    use std::sync::Once;

    static INIT: Once = Once::new();

    /// Install a `tracing` subscriber that writes through the test harness.
    /// Filtered by `RUST_LOG`; safe to call from every test.
    pub fn init() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }
}

/// Integration tests for the complete Skein system.
#[cfg(test)]
mod integration_tests {
    use crate::test_log;
    use proptest::prelude::*;
    use skein::prelude::*;
    use skein::{FixedTopology, SystemTopology, Topology};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[test]
    fn test_explicit_counts() {
        test_log::init();
        let scheduler = Scheduler::new(2, 3).unwrap();
        assert_eq!(scheduler.group_count(), 2);
        assert_eq!(scheduler.thread_count(), 6);
    }

    #[test]
    fn test_zero_inputs_fail() {
        assert_eq!(Scheduler::new(0, 1).unwrap_err(), SchedulerError::ZeroGroups);
        assert_eq!(Scheduler::new(1, 0).unwrap_err(), SchedulerError::ZeroThreads);
        assert_eq!(
            Scheduler::pinned_per_numa_node(None, 0).unwrap_err(),
            SchedulerError::ZeroThreads
        );
        assert_eq!(Scheduler::pinned_per_cpu(None, 0).unwrap_err(), SchedulerError::ZeroGroups);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_explicit_counts(groups in 1usize..5, threads in 1usize..4) {
            let scheduler = Scheduler::new(groups, threads).unwrap();
            prop_assert_eq!(scheduler.group_count(), groups);
            prop_assert_eq!(scheduler.thread_count(), groups * threads);
        }
    }

    #[test]
    fn test_task_runs_exactly_once() {
        test_log::init();
        let scheduler = Scheduler::new(2, 2).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<Task> = (0..64)
            .map(|_| {
                let runs = Arc::clone(&runs);
                scheduler
                    .submit(move |_, _| {
                        runs.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap()
            })
            .collect();

        for task in &tasks {
            assert!(task.wait());
            assert_eq!(task.state(), TaskState::Done);
            // Waiting again returns immediately.
            assert!(task.wait());
        }
        assert_eq!(runs.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn test_simple_submit() {
        test_log::init();
        let scheduler = Scheduler::new(1, 4).unwrap();
        let (tx, rx) = mpsc::channel();
        let task = scheduler
            .submit(move |_, _| {
                tx.send(7).unwrap();
            })
            .unwrap();

        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 7);
        assert!(task.wait());
    }

    #[test]
    fn test_tasks_submitting_tasks() {
        test_log::init();
        let scheduler = Scheduler::new(1, 4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            scheduler
                .submit(move |sched, _| {
                    for _ in 0..3 {
                        let counter = Arc::clone(&counter);
                        let child = sched
                            .submit(move |_, _| {
                                counter.fetch_add(1, Ordering::SeqCst);
                            })
                            .unwrap();
                        tx.send(child).unwrap();
                    }
                })
                .unwrap();
        }
        drop(tx);

        let children: Vec<Task> = rx.iter().take(9).collect();
        assert_eq!(children.len(), 9);
        assert!(children.iter().all(Task::wait));
        assert_eq!(counter.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn test_current_scheduler() {
        test_log::init();
        assert!(current_scheduler().is_none());
        assert!(current_task().is_none());

        let scheduler = Scheduler::new(2, 2).unwrap();
        let (tx, rx) = mpsc::channel();
        let task = scheduler
            .submit(move |_, task| {
                let current = current_scheduler();
                let running = current_task().is_some_and(|current| current.ptr_eq(task));
                tx.send((current, running)).unwrap();
            })
            .unwrap();

        let (current, running) = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(current.as_ref(), Some(&scheduler));
        assert!(running);
        assert!(task.wait());
        assert!(current_scheduler().is_none());
    }

    #[test]
    fn test_cancel_before_start() {
        test_log::init();
        let scheduler = Scheduler::new(1, 1).unwrap();
        let (release, gate_rx) = mpsc::channel::<()>();
        let gate = scheduler
            .submit(move |_, _| {
                let _ = gate_rx.recv();
            })
            .unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let target = scheduler
            .submit(move |_, _| flag.store(true, Ordering::SeqCst))
            .unwrap();

        assert_eq!(target.cancel(true), Ok(()));
        assert_eq!(target.state(), TaskState::Cancelled);
        assert!(!target.wait());

        drop(release);
        assert!(gate.wait());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_running_blocks() {
        test_log::init();
        let scheduler = Scheduler::new(1, 1).unwrap();
        let running = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = mpsc::channel();

        let flag = Arc::clone(&running);
        let task = scheduler
            .submit(move |_, _| {
                flag.store(true, Ordering::SeqCst);
                started_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(50));
                flag.store(false, Ordering::SeqCst);
            })
            .unwrap();

        started_rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(task.cancel(false), Err(TaskError::Running));
        assert_eq!(task.cancel(true), Ok(()));
        assert!(!running.load(Ordering::SeqCst));
        assert_eq!(task.state(), TaskState::Done);
    }

    #[test]
    fn test_cancel_races_with_start() {
        test_log::init();
        let scheduler = Scheduler::new(1, 2).unwrap();
        for _ in 0..200 {
            let running = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&running);
            let task = scheduler
                .submit(move |_, _| {
                    flag.store(true, Ordering::SeqCst);
                    thread::yield_now();
                    flag.store(false, Ordering::SeqCst);
                })
                .unwrap();

            assert_eq!(task.cancel(true), Ok(()));
            assert!(!running.load(Ordering::SeqCst));
            assert!(task.is_terminal());
        }
    }

    #[test]
    fn test_cancel_unadmitted_task() {
        let scheduler = Scheduler::new(1, 1).unwrap();
        let task = scheduler.allocate(|_, _| {});
        assert_eq!(task.cancel(false), Err(TaskError::NotAdmitted));
        assert_eq!(task.cancel(true), Err(TaskError::NotAdmitted));
    }

    #[test]
    fn test_deadline_then_cancel() {
        test_log::init();
        let scheduler = Scheduler::new(1, 1).unwrap();
        let (release, gate_rx) = mpsc::channel::<()>();
        let _gate = scheduler
            .submit(move |_, _| {
                let _ = gate_rx.recv();
            })
            .unwrap();
        let late = scheduler.submit(|_, _| {}).unwrap();

        assert_eq!(late.wait_timeout(Duration::from_millis(20)), None);
        late.cancel(false).unwrap();
        assert_eq!(late.wait_timeout(Duration::from_millis(20)), Some(false));
        drop(release);
    }

    #[test]
    fn test_panicking_task_keeps_worker() {
        test_log::init();
        let scheduler = Scheduler::new(1, 1).unwrap();
        let boom = scheduler.submit(|_, _| panic!("task failure")).unwrap();
        assert!(boom.wait());

        let after = scheduler.submit(|_, _| {}).unwrap();
        assert!(after.wait());
        assert_eq!(scheduler.active_threads(), 1);
    }

    #[test]
    fn test_system_topology_constructors() {
        test_log::init();
        let topology = SystemTopology::new();
        let allowed = topology.allowed_cpus().unwrap();
        let nodes = topology
            .numa_nodes()
            .unwrap()
            .into_iter()
            .filter(|node| node.cpus.intersects(&allowed))
            .count();

        let per_cpu = Scheduler::pinned_per_cpu_grouped_by_numa_node(None).unwrap();
        assert_eq!(per_cpu.group_count(), nodes);
        assert_eq!(per_cpu.thread_count(), allowed.len());

        let per_node = Scheduler::pinned_per_numa_node(None, 2).unwrap();
        assert_eq!(per_node.group_count(), nodes);
        assert_eq!(per_node.thread_count(), nodes * 2);

        let capped = Scheduler::pinned_per_cpu(None, 1).unwrap();
        assert_eq!(capped.group_count(), 1);
        assert_eq!(capped.thread_count(), allowed.len());

        let first = CpuSet::single(allowed.first().unwrap());
        let single = Scheduler::pinned_per_cpu(Some(&first), 4).unwrap();
        assert_eq!(single.thread_count(), 1);
        assert!(single.submit(|_, _| {}).unwrap().wait());

        let nowhere = CpuSet::single(1 << 20);
        assert_eq!(
            Scheduler::pinned_per_cpu(Some(&nowhere), 4).unwrap_err(),
            SchedulerError::NoEligibleCpus
        );
    }

    #[test]
    fn test_fixed_topology_layouts() {
        test_log::init();
        let topology = FixedTopology::symmetric(2, 3);
        let build = |placement: Placement| {
            Scheduler::builder()
                .topology(topology.clone())
                .pin_threads(false)
                .placement(placement)
                .build()
                .unwrap()
        };

        let per_node = build(Placement::PinnedPerNumaNode {
            cpus: None,
            nodes: None,
            threads_per_group: 2,
        });
        assert_eq!((per_node.group_count(), per_node.thread_count()), (2, 4));

        let per_cpu = build(Placement::PinnedPerCpuGroupedByNumaNode {
            cpus: Some((1..5).collect()),
            nodes: None,
        });
        assert_eq!((per_cpu.group_count(), per_cpu.thread_count()), (2, 4));

        let capped = build(Placement::PinnedPerCpu {
            cpus: None,
            max_groups: 4,
        });
        assert_eq!((capped.group_count(), capped.thread_count()), (4, 6));
        let sizes: Vec<_> = capped.groups().iter().map(|group| group.threads).collect();
        assert_eq!(sizes, vec![2, 2, 1, 1]);
    }

    #[test]
    fn test_teardown_finishes_queued_work() {
        test_log::init();
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<Task> = {
            let scheduler = Scheduler::new(2, 1).unwrap();
            (0..100)
                .map(|_| {
                    let counter = Arc::clone(&counter);
                    scheduler
                        .submit(move |_, _| {
                            counter.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap()
                })
                .collect()
        };

        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert!(tasks.iter().all(|task| task.state() == TaskState::Done));
    }

    #[test]
    fn test_teardown_runs_blocked_dependents() {
        test_log::init();
        for _ in 0..20 {
            let ran = Arc::new(AtomicUsize::new(0));
            let scheduler = Scheduler::new(2, 1).unwrap();
            let dep = scheduler
                .submit_with_deps(GroupHint::Index(0), &[], |_, _| {
                    thread::sleep(Duration::from_millis(5));
                })
                .unwrap();
            let counter = Arc::clone(&ran);
            let dependent = scheduler
                .submit_with_deps(GroupHint::Index(1), &[dep.clone()], move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();

            drop(scheduler);
            assert_eq!(dep.state(), TaskState::Done);
            assert_eq!(dependent.state(), TaskState::Done);
            assert_eq!(ran.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_teardown_runs_cross_group_chain() {
        test_log::init();
        let ran = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(3, 1).unwrap();
        let mut chain: Vec<Task> = Vec::new();
        for i in 0..12 {
            let counter = Arc::clone(&ran);
            let deps: Vec<Task> = chain.last().cloned().into_iter().collect();
            let task = scheduler
                .submit_with_deps(GroupHint::Index(i % 3), &deps, move |_, _| {
                    thread::sleep(Duration::from_millis(1));
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            chain.push(task);
        }

        drop(scheduler);
        assert_eq!(ran.load(Ordering::SeqCst), 12);
        assert!(chain.iter().all(|task| task.state() == TaskState::Done));
    }

    #[test]
    fn test_teardown_runs_work_submitted_while_draining() {
        test_log::init();
        let (tx, rx) = mpsc::channel();
        let scheduler = Scheduler::new(2, 1).unwrap();
        scheduler
            .submit(move |sched, _| {
                thread::sleep(Duration::from_millis(20));
                let child = sched.submit(|_, _| {}).unwrap();
                tx.send(child).unwrap();
            })
            .unwrap();

        drop(scheduler);
        let child = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(child.state(), TaskState::Done);
    }

    #[test]
    fn test_handle_kept_past_teardown_rejects_work() {
        test_log::init();
        let (tx, rx) = mpsc::channel();
        let scheduler = Scheduler::new(1, 1).unwrap();
        let task = scheduler
            .submit(move |sched, _| {
                // Give the owner time to start dropping its handle.
                thread::sleep(Duration::from_millis(100));
                tx.send(sched.clone()).unwrap();
            })
            .unwrap();

        drop(scheduler);
        assert!(task.wait());

        let kept = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(kept.active_threads(), 0);
        assert_eq!(kept.submit(|_, _| {}).unwrap_err(), TaskError::SchedulerGone);

        let late = kept.allocate(|_, _| {});
        assert_eq!(kept.admit(&late), Err(TaskError::SchedulerGone));
        assert_eq!(late.state(), TaskState::Created);
        assert_eq!(late.wait_timeout(Duration::from_millis(1)), Some(false));
    }

    #[test]
    fn test_env_config() {
        let config = skein::SchedulerConfig::from_lookup(|key| match key {
            "SKEIN_GROUPS" => Some("2".into()),
            "SKEIN_THREADS_PER_GROUP" => Some("1".into()),
            "SKEIN_THREAD_PREFIX" => Some("envtest".into()),
            _ => None,
        });
        let scheduler = SchedulerBuilder::from_config(config).build().unwrap();
        assert_eq!(scheduler.group_count(), 2);
        assert_eq!(scheduler.thread_count(), 2);
    }
}
