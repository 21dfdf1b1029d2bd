//! NUMA topology detection and thread pinning.
//!
//! The scheduler only asks three questions of the machine: which CPUs this
//! process may run on, which NUMA nodes exist and which CPUs belong to each.
//! [`SystemTopology`] answers them from sysfs and `sched_getaffinity` on
//! Linux and falls back to a single node everywhere else. [`FixedTopology`]
//! answers them from a description supplied by the caller.

use std::fmt;
use std::io;

use crate::CpuSet;

/// A NUMA node and the CPUs that belong to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumaNode {
    /// Node ID as reported by the OS.
    pub id: usize,
    /// CPUs belonging to this node.
    pub cpus: CpuSet,
}

impl NumaNode {
    /// Create a node description.
    #[must_use]
    pub fn new(id: usize, cpus: CpuSet) -> Self {
        Self { id, cpus }
    }
}

/// Source of CPU and NUMA topology information.
///
/// Only consulted while a scheduler is being constructed.
pub trait Topology: Send + Sync + fmt::Debug {
    /// CPUs the current process is allowed to run on.
    fn allowed_cpus(&self) -> io::Result<CpuSet>;

    /// NUMA nodes, ordered by node ID.
    fn numa_nodes(&self) -> io::Result<Vec<NumaNode>>;

    /// NUMA node that owns `cpu`.
    fn node_of(&self, cpu: usize) -> Option<usize> {
        node_of(&self.numa_nodes().ok()?, cpu)
    }
}

/// ID of the node in `nodes` whose CPU set contains `cpu`.
#[must_use]
pub fn node_of(nodes: &[NumaNode], cpu: usize) -> Option<usize> {
    nodes.iter().find(|node| node.cpus.contains(cpu)).map(|node| node.id)
}

/// Topology of the machine this process runs on.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTopology;

impl SystemTopology {
    /// Create a handle to the system topology.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Topology for SystemTopology {
    fn allowed_cpus(&self) -> io::Result<CpuSet> {
        current_thread_affinity()
    }

    fn numa_nodes(&self) -> io::Result<Vec<NumaNode>> {
        #[cfg(target_os = "linux")]
        {
            let nodes = linux::read_nodes()?;
            if !nodes.is_empty() {
                return Ok(nodes);
            }
        }

        Ok(vec![NumaNode::new(0, self.allowed_cpus()?)])
    }
}

/// A topology described up front by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedTopology {
    nodes: Vec<NumaNode>,
    allowed: CpuSet,
}

impl FixedTopology {
    /// Build a topology from node descriptions. Every CPU of every node is
    /// allowed.
    #[must_use]
    pub fn new(mut nodes: Vec<NumaNode>) -> Self {
        nodes.sort_by_key(|node| node.id);
        let allowed = nodes
            .iter()
            .fold(CpuSet::new(), |acc, node| acc.union(&node.cpus));
        Self { nodes, allowed }
    }

    /// A single node holding CPUs `0..cpus`.
    #[must_use]
    pub fn uniform(cpus: usize) -> Self {
        Self::new(vec![NumaNode::new(0, CpuSet::first_n(cpus))])
    }

    /// `nodes` nodes of `cpus_per_node` consecutive CPUs each.
    #[must_use]
    pub fn symmetric(nodes: usize, cpus_per_node: usize) -> Self {
        Self::new(
            (0..nodes)
                .map(|id| {
                    let first = id * cpus_per_node;
                    NumaNode::new(id, (first..first + cpus_per_node).collect())
                })
                .collect(),
        )
    }

    /// Restrict the allowed CPUs, as an affinity mask would.
    #[must_use]
    pub fn with_allowed(mut self, allowed: CpuSet) -> Self {
        self.allowed = allowed;
        self
    }
}

impl Topology for FixedTopology {
    fn allowed_cpus(&self) -> io::Result<CpuSet> {
        Ok(self.allowed.clone())
    }

    fn numa_nodes(&self) -> io::Result<Vec<NumaNode>> {
        Ok(self.nodes.clone())
    }
}

/// CPUs the calling thread may currently run on.
pub fn current_thread_affinity() -> io::Result<CpuSet> {
    #[cfg(target_os = "linux")]
    {
        linux::get_affinity()
    }

    #[cfg(not(target_os = "linux"))]
    {
        Ok(CpuSet::first_n(num_cpus::get()))
    }
}

/// Restrict the calling thread to `cpus`.
pub fn pin_current_thread(cpus: &CpuSet) -> io::Result<()> {
    if cpus.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty cpu set"));
    }

    #[cfg(target_os = "linux")]
    {
        linux::set_affinity(cpus)
    }

    #[cfg(not(target_os = "linux"))]
    {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "thread pinning is not supported on this platform",
        ))
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::fs;
    use std::io;
    use std::mem;

    use super::NumaNode;
    use crate::CpuSet;

    const NODE_ROOT: &str = "/sys/devices/system/node";

    pub(super) fn read_nodes() -> io::Result<Vec<NumaNode>> {
        let entries = match fs::read_dir(NODE_ROOT) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut nodes = Vec::new();
        for entry in entries.filter_map(Result::ok) {
            let name = entry.file_name();
            let Some(id) = name
                .to_str()
                .and_then(|name| name.strip_prefix("node"))
                .and_then(|id| id.parse::<usize>().ok())
            else {
                continue;
            };

            let cpulist = fs::read_to_string(entry.path().join("cpulist"))?;
            let cpus = CpuSet::parse_list(&cpulist)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            nodes.push(NumaNode::new(id, cpus));
        }

        nodes.sort_by_key(|node| node.id);
        Ok(nodes)
    }

    pub(super) fn get_affinity() -> io::Result<CpuSet> {
        // SAFETY: cpu_set_t is plain data and all-zero is the empty set.
        let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
        // SAFETY: `set` is a valid, writable cpu_set_t of the size we pass.
        let rc = unsafe { libc::sched_getaffinity(0, mem::size_of::<libc::cpu_set_t>(), &mut set) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        let max = usize::try_from(libc::CPU_SETSIZE).unwrap_or(0);
        // SAFETY: every index is below CPU_SETSIZE.
        Ok((0..max).filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, &set) }).collect())
    }

    pub(super) fn set_affinity(cpus: &CpuSet) -> io::Result<()> {
        let max = usize::try_from(libc::CPU_SETSIZE).unwrap_or(0);
        // SAFETY: cpu_set_t is plain data and all-zero is the empty set.
        let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
        for cpu in cpus.iter().take_while(|&cpu| cpu < max) {
            // SAFETY: `cpu` is below CPU_SETSIZE.
            unsafe { libc::CPU_SET(cpu, &mut set) };
        }

        // SAFETY: `set` is a valid cpu_set_t of the size we pass.
        let rc = unsafe { libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
