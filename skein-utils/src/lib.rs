//! Utility types for the Skein scheduler.
//!
//! - [`CacheAligned`] keeps hot per-group state on its own cache line.
//! - [`CpuSet`] is the bitset used for CPU and NUMA node filters.
//! - [`numa`] answers topology questions and pins threads to CPUs.

#![deny(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]

pub mod cpuset;
pub mod numa;

pub use cpuset::{CpuSet, ParseCpuListError};
pub use numa::{FixedTopology, NumaNode, SystemTopology, Topology};

/// A cache-aligned wrapper for data structures.
#[derive(Debug, Default)]
#[repr(align(64))]
pub struct CacheAligned<T>(pub T);

impl<T> CacheAligned<T> {
    /// Create a new cache-aligned value.
    pub const fn new(value: T) -> Self {
        Self(value)
    }

    /// Get a reference to the inner value.
    pub const fn get(&self) -> &T {
        &self.0
    }
}

impl<T> core::ops::Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> core::ops::DerefMut for CacheAligned<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
