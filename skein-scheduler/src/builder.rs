//! Fluent construction of a [`Scheduler`].

use std::fmt;
use std::sync::Arc;

use skein_core::{Placement, SchedulerConfig, SchedulerResult};
use skein_utils::{SystemTopology, Topology};

use crate::scheduler::Scheduler;

/// Builder for [`Scheduler`].
///
/// ```no_run
/// use skein_scheduler::{Placement, Scheduler};
///
/// let scheduler = Scheduler::builder()
///     .thread_name_prefix("render")
///     .placement(Placement::PinnedPerCpu { cpus: None, max_groups: 2 })
///     .build()?;
/// # Ok::<(), skein_scheduler::SchedulerError>(())
/// ```
#[derive(Clone)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    topology: Arc<dyn Topology>,
}

impl SchedulerBuilder {
    /// Create a builder with default configuration and the system topology.
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(SchedulerConfig::default())
    }

    /// Start from an existing configuration, e.g. [`SchedulerConfig::from_env`].
    #[must_use]
    pub fn from_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            topology: Arc::new(SystemTopology::new()),
        }
    }

    /// Set the thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Set the worker stack size in bytes.
    #[must_use]
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.config.stack_size = Some(bytes);
        self
    }

    /// Enable or disable thread pinning for topology-aware placements.
    #[must_use]
    pub fn pin_threads(mut self, enabled: bool) -> Self {
        self.config.pin_threads = enabled;
        self
    }

    /// Set the group and thread layout.
    #[must_use]
    pub fn placement(mut self, placement: Placement) -> Self {
        self.config.placement = placement;
        self
    }

    /// Shorthand for [`Placement::Explicit`].
    #[must_use]
    pub fn groups(self, groups: usize, threads_per_group: usize) -> Self {
        self.placement(Placement::Explicit {
            groups,
            threads_per_group,
        })
    }

    /// Replace the topology provider.
    #[must_use]
    pub fn topology(mut self, topology: impl Topology + 'static) -> Self {
        self.topology = Arc::new(topology);
        self
    }

    /// Configuration the builder currently holds.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Plan the layout and start every worker thread.
    ///
    /// # Errors
    ///
    /// Any [`SchedulerError`](skein_core::SchedulerError) from validation,
    /// the topology provider or thread creation. No thread is left running
    /// on failure.
    pub fn build(self) -> SchedulerResult<Scheduler> {
        Scheduler::spawn(&self.config, self.topology.as_ref())
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerBuilder")
            .field("config", &self.config)
            .field("topology", &self.topology)
            .finish()
    }
}
