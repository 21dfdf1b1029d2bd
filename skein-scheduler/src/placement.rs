//! Turning a [`Placement`] and a [`Topology`] into concrete worker groups.

use skein_core::{Placement, SchedulerError, SchedulerResult};
use skein_utils::{numa, CpuSet, NumaNode, Topology};

/// One worker thread to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ThreadPlan {
    /// CPUs the thread is pinned to
    pub(crate) pin: Option<CpuSet>,
    /// Suffix of the thread name
    pub(crate) label: String,
}

/// One worker group to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GroupPlan {
    pub(crate) numa_node: Option<usize>,
    pub(crate) cpus: Option<CpuSet>,
    pub(crate) threads: Vec<ThreadPlan>,
}

/// Lay out groups and threads. The topology is consulted only by the
/// pinned placements.
pub(crate) fn plan(placement: &Placement, topology: &dyn Topology) -> SchedulerResult<Vec<GroupPlan>> {
    match placement {
        Placement::Explicit {
            groups,
            threads_per_group,
        } => explicit(*groups, *threads_per_group),
        Placement::PinnedPerNumaNode {
            cpus,
            nodes,
            threads_per_group,
        } => {
            let threads_per_group = *threads_per_group;
            if threads_per_group == 0 {
                return Err(SchedulerError::ZeroThreads);
            }
            let nodes = eligible_nodes(topology, cpus.as_ref(), nodes.as_ref())?;
            Ok(nodes
                .into_iter()
                .map(|node| GroupPlan {
                    numa_node: Some(node.id),
                    threads: (0..threads_per_group)
                        .map(|n| ThreadPlan {
                            pin: Some(node.cpus.clone()),
                            label: format!("n{}-{n}", node.id),
                        })
                        .collect(),
                    cpus: Some(node.cpus),
                })
                .collect())
        }
        Placement::PinnedPerCpuGroupedByNumaNode { cpus, nodes } => {
            let nodes = eligible_nodes(topology, cpus.as_ref(), nodes.as_ref())?;
            Ok(nodes
                .into_iter()
                .map(|node| GroupPlan {
                    numa_node: Some(node.id),
                    threads: node.cpus.iter().map(per_cpu_thread).collect(),
                    cpus: Some(node.cpus),
                })
                .collect())
        }
        Placement::PinnedPerCpu { cpus, max_groups } => {
            per_cpu_capped(topology, cpus.as_ref(), *max_groups)
        }
    }
}

fn explicit(groups: usize, threads_per_group: usize) -> SchedulerResult<Vec<GroupPlan>> {
    if groups == 0 {
        return Err(SchedulerError::ZeroGroups);
    }
    if threads_per_group == 0 {
        return Err(SchedulerError::ZeroThreads);
    }
    Ok((0..groups)
        .map(|group| GroupPlan {
            numa_node: None,
            cpus: None,
            threads: (0..threads_per_group)
                .map(|n| ThreadPlan {
                    pin: None,
                    label: format!("{group}-{n}"),
                })
                .collect(),
        })
        .collect())
}

fn per_cpu_thread(cpu: usize) -> ThreadPlan {
    ThreadPlan {
        pin: Some(CpuSet::single(cpu)),
        label: format!("cpu{cpu}"),
    }
}

fn effective_cpus(topology: &dyn Topology, filter: Option<&CpuSet>) -> SchedulerResult<CpuSet> {
    let allowed = topology.allowed_cpus()?;
    Ok(match filter {
        Some(filter) => allowed.intersection(filter),
        None => allowed,
    })
}

/// NUMA nodes restricted to the effective CPUs, dropping empty ones.
fn eligible_nodes(
    topology: &dyn Topology,
    cpus: Option<&CpuSet>,
    nodes: Option<&CpuSet>,
) -> SchedulerResult<Vec<NumaNode>> {
    let allowed = effective_cpus(topology, cpus)?;
    let eligible: Vec<NumaNode> = topology
        .numa_nodes()?
        .into_iter()
        .filter(|node| nodes.map_or(true, |nodes| nodes.contains(node.id)))
        .map(|node| NumaNode::new(node.id, node.cpus.intersection(&allowed)))
        .filter(|node| !node.cpus.is_empty())
        .collect();

    if eligible.is_empty() {
        Err(SchedulerError::NoEligibleCpus)
    } else {
        Ok(eligible)
    }
}

/// One thread per CPU in at most `max_groups` groups.
///
/// CPUs are ordered by NUMA node and then by index, and the sequence is cut
/// into contiguous runs whose lengths differ by at most one.
fn per_cpu_capped(
    topology: &dyn Topology,
    cpus: Option<&CpuSet>,
    max_groups: usize,
) -> SchedulerResult<Vec<GroupPlan>> {
    if max_groups == 0 {
        return Err(SchedulerError::ZeroGroups);
    }
    let allowed = effective_cpus(topology, cpus)?;
    if allowed.is_empty() {
        return Err(SchedulerError::NoEligibleCpus);
    }

    let nodes = topology.numa_nodes()?;
    let mut ordered: Vec<(Option<usize>, usize)> =
        allowed.iter().map(|cpu| (numa::node_of(&nodes, cpu), cpu)).collect();
    ordered.sort_by_key(|&(node, cpu)| (node.unwrap_or(usize::MAX), cpu));

    let groups = max_groups.min(ordered.len());
    let base = ordered.len() / groups;
    let extra = ordered.len() % groups;

    let mut rest = ordered.as_slice();
    let mut plans = Vec::with_capacity(groups);
    for group in 0..groups {
        let (run, tail) = rest.split_at(base + usize::from(group < extra));
        rest = tail;

        let first_node = run.first().and_then(|&(node, _)| node);
        let shared_node = run.iter().all(|&(node, _)| node == first_node);
        plans.push(GroupPlan {
            numa_node: if shared_node { first_node } else { None },
            cpus: Some(run.iter().map(|&(_, cpu)| cpu).collect()),
            threads: run.iter().map(|&(_, cpu)| per_cpu_thread(cpu)).collect(),
        });
    }
    Ok(plans)
}
