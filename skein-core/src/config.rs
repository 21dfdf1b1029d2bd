//! Scheduler configuration.
//!
//! [`SchedulerConfig`] carries everything a scheduler needs at construction
//! time. It can be filled in by hand, taken from [`Default`], or read from
//! `SKEIN_*` environment variables with [`SchedulerConfig::from_env`].

use std::env;

use skein_utils::CpuSet;

/// How worker threads are laid out over groups and CPUs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// `groups` groups of `threads_per_group` unpinned threads.
    Explicit {
        /// Number of worker groups
        groups: usize,
        /// Threads started in every group
        threads_per_group: usize,
    },
    /// One group per NUMA node that has at least one allowed CPU, with
    /// `threads_per_group` threads pinned to the node's CPU set.
    PinnedPerNumaNode {
        /// Restrict to these CPUs (intersected with the allowed set)
        cpus: Option<CpuSet>,
        /// Restrict to these NUMA node IDs
        nodes: Option<CpuSet>,
        /// Threads started in every group
        threads_per_group: usize,
    },
    /// One group per NUMA node that has at least one allowed CPU, with one
    /// thread pinned to each allowed CPU of the node.
    PinnedPerCpuGroupedByNumaNode {
        /// Restrict to these CPUs (intersected with the allowed set)
        cpus: Option<CpuSet>,
        /// Restrict to these NUMA node IDs
        nodes: Option<CpuSet>,
    },
    /// One thread pinned to each allowed CPU, clustered into at most
    /// `max_groups` groups.
    PinnedPerCpu {
        /// Restrict to these CPUs (intersected with the allowed set)
        cpus: Option<CpuSet>,
        /// Upper bound on the number of groups
        max_groups: usize,
    },
}

impl Placement {
    /// Whether this placement consults the topology provider.
    #[must_use]
    pub const fn is_topology_aware(&self) -> bool {
        !matches!(self, Self::Explicit { .. })
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self::Explicit {
            groups: 1,
            threads_per_group: num_cpus::get().max(1),
        }
    }
}

/// Configuration for scheduler construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Thread name prefix for worker threads
    pub thread_name_prefix: String,
    /// Stack size for worker threads (bytes); `None` uses the std default
    pub stack_size: Option<usize>,
    /// Whether topology-aware placements actually set thread affinity
    pub pin_threads: bool,
    /// Group and thread layout
    pub placement: Placement,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "skein".into(),
            stack_size: None,
            pin_threads: true,
            placement: Placement::default(),
        }
    }
}

impl SchedulerConfig {
    /// Build a config from `SKEIN_*` environment variables, falling back to
    /// [`Default`] for anything unset or unparsable.
    ///
    /// | variable | field |
    /// |---|---|
    /// | `SKEIN_THREAD_PREFIX` | `thread_name_prefix` |
    /// | `SKEIN_STACK_SIZE` | `stack_size` |
    /// | `SKEIN_PIN_THREADS` | `pin_threads` (`1/0`, `true/false`, `yes/no`) |
    /// | `SKEIN_GROUPS` + `SKEIN_THREADS_PER_GROUP` | `placement` (explicit) |
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(prefix) = get("SKEIN_THREAD_PREFIX") {
            config.thread_name_prefix = prefix;
        }
        if let Some(size) = get("SKEIN_STACK_SIZE").and_then(|v| v.parse().ok()) {
            config.stack_size = Some(size);
        }
        if let Some(pin) = get("SKEIN_PIN_THREADS").and_then(|v| parse_bool(&v)) {
            config.pin_threads = pin;
        }

        let groups = get("SKEIN_GROUPS").and_then(|v| v.parse().ok());
        let threads = get("SKEIN_THREADS_PER_GROUP").and_then(|v| v.parse().ok());
        if let (Some(groups), Some(threads_per_group)) = (groups, threads) {
            config.placement = Placement::Explicit {
                groups,
                threads_per_group,
            };
        }

        config
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
