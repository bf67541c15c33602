// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! The narrow OS capability seam the decision engine depends on.
//!
//! [`LinuxHost`](crate::linux::LinuxHost) binds it to the real machine and
//! [`SimulatedHost`](crate::sim::SimulatedHost) to an in-memory model.

use crate::error::{AffinityError, EnumerationError, SamplingError};
use crate::types::{AffinityMask, CoreLoadSnapshot, ProcessId, ProcessRecord};

/// Reads per-core utilization.
pub trait LoadSampler: Send + Sync {
    /// Utilization of every logical core over the interval since the
    /// previous call, one value in [0, 100] per core.
    fn sample(&self) -> Result<CoreLoadSnapshot, SamplingError>;

    /// Number of logical cores, used to size fallback snapshots.
    fn core_count(&self) -> usize;
}

/// Result of one process enumeration.
#[derive(Debug, Clone, Default)]
pub struct ProcessListing {
    pub records: Vec<ProcessRecord>,
    /// Processes that existed but could not be read.
    pub skipped: usize,
}

/// Enumerates processes and reads/writes their affinity.
pub trait ProcessTable: Send + Sync {
    /// Every process currently visible, in enumeration order.
    fn list(&self) -> Result<ProcessListing, EnumerationError>;

    /// Fresh record for one process.
    fn process(&self, pid: ProcessId) -> Result<ProcessRecord, AffinityError>;

    /// Current affinity of `pid`.
    fn affinity(&self, pid: ProcessId) -> Result<AffinityMask, AffinityError>;

    /// Replace the affinity of `pid`. Success only means the OS accepted
    /// the call; callers verify by reading it back.
    fn set_affinity(&self, pid: ProcessId, mask: &AffinityMask) -> Result<(), AffinityError>;
}
