// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! In-memory host model.
//!
//! Implements the capability seam without touching the real machine. Used by
//! the test suites and by `corebal run --simulate` to exercise the balancer
//! end to end. Individual processes can be told to ignore, deny or fail
//! affinity writes to reproduce OS misbehaviour.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{AffinityError, EnumerationError, SamplingError};
use crate::platform::{LoadSampler, ProcessListing, ProcessTable};
use crate::types::{
    AffinityMask, CoreId, CoreLoadSnapshot, ProcessId, ProcessRecord, ProcessStatus,
};

/// How the simulated OS reacts to affinity writes for one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteBehavior {
    /// Apply the mask.
    #[default]
    Apply,
    /// Report success but leave the mask unchanged.
    Ignore,
    /// Refuse with a permission error.
    Deny,
    /// Fail with a transient OS error this many times, then apply.
    FailTransient(u32),
    /// The process exits as the write lands.
    VanishOnWrite,
}

#[derive(Debug, Default)]
struct SimState {
    loads: Vec<f64>,
    sampling_fails: bool,
    sample_delay: Duration,
    write_delay: Duration,
    enumeration_fails: bool,
    unreadable: usize,
    /// Insertion order is enumeration order.
    processes: Vec<ProcessRecord>,
    behaviors: HashMap<ProcessId, WriteBehavior>,
    writes: HashMap<ProcessId, u32>,
}

impl SimState {
    fn find(&self, pid: ProcessId) -> Option<&ProcessRecord> {
        self.processes.iter().find(|p| p.pid == pid)
    }

    fn find_mut(&mut self, pid: ProcessId) -> Option<&mut ProcessRecord> {
        self.processes.iter_mut().find(|p| p.pid == pid)
    }
}

/// A fake machine with a fixed number of cores.
#[derive(Debug)]
pub struct SimulatedHost {
    core_count: usize,
    state: Mutex<SimState>,
}

impl SimulatedHost {
    /// Idle machine with `core_count` cores and no processes.
    pub fn new(core_count: usize) -> Self {
        Self {
            core_count,
            state: Mutex::new(SimState {
                loads: vec![0.0; core_count],
                ..SimState::default()
            }),
        }
    }

    /// A skewed four-core machine with a handful of busy processes.
    pub fn demo() -> Self {
        let host = Self::new(4);
        host.set_loads(vec![96.0, 55.0, 48.0, 8.0]);
        host.spawn(1, "systemd", 2.0);
        host.spawn(412, "Xorg", 6.5);
        host.spawn(2210, "cargo", 64.0);
        host.spawn(2251, "rustc", 64.0);
        host.set_nice(ProcessId::new(2251), 5);
        host.spawn(3120, "ffmpeg", 38.0);
        host.spawn(3300, "backup-agent", 0.4);
        host
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set the per-core loads returned by the next samples.
    pub fn set_loads(&self, loads: Vec<f64>) {
        self.lock().loads = loads;
    }

    pub fn set_sampling_fails(&self, fails: bool) {
        self.lock().sampling_fails = fails;
    }

    /// Block every sample for `delay`, to exercise sampling timeouts.
    pub fn set_sample_delay(&self, delay: Duration) {
        self.lock().sample_delay = delay;
    }

    /// Block every affinity write for `delay`.
    pub fn set_write_delay(&self, delay: Duration) {
        self.lock().write_delay = delay;
    }

    pub fn set_enumeration_fails(&self, fails: bool) {
        self.lock().enumeration_fails = fails;
    }

    /// Report this many processes as unreadable in every listing.
    pub fn set_unreadable(&self, count: usize) {
        self.lock().unreadable = count;
    }

    /// Add a running process allowed on every core, niceness 0.
    pub fn spawn(&self, pid: u32, name: &str, cpu_percent: f64) -> ProcessRecord {
        let record = ProcessRecord {
            pid: ProcessId::new(pid),
            name: name.to_string(),
            cpu_percent,
            affinity: AffinityMask::all(self.core_count),
            nice: Some(0),
            status: ProcessStatus::Running,
        };
        self.insert(record.clone());
        record
    }

    /// Add or replace a process record.
    pub fn insert(&self, record: ProcessRecord) {
        let mut state = self.lock();
        match state.find_mut(record.pid) {
            Some(existing) => *existing = record,
            None => state.processes.push(record),
        }
    }

    pub fn remove(&self, pid: ProcessId) {
        self.lock().processes.retain(|p| p.pid != pid);
    }

    pub fn set_nice(&self, pid: ProcessId, nice: i32) {
        if let Some(p) = self.lock().find_mut(pid) {
            p.nice = Some(nice);
        }
    }

    pub fn set_status(&self, pid: ProcessId, status: ProcessStatus) {
        if let Some(p) = self.lock().find_mut(pid) {
            p.status = status;
        }
    }

    pub fn set_cpu_percent(&self, pid: ProcessId, cpu_percent: f64) {
        if let Some(p) = self.lock().find_mut(pid) {
            p.cpu_percent = cpu_percent;
        }
    }

    /// Force a mask without going through the write path.
    pub fn pin(&self, pid: ProcessId, mask: AffinityMask) {
        if let Some(p) = self.lock().find_mut(pid) {
            p.affinity = mask;
        }
    }

    pub fn set_write_behavior(&self, pid: ProcessId, behavior: WriteBehavior) {
        self.lock().behaviors.insert(pid, behavior);
    }

    /// Number of affinity writes attempted for `pid`.
    pub fn write_attempts(&self, pid: ProcessId) -> u32 {
        self.lock().writes.get(&pid).copied().unwrap_or(0)
    }

    /// Current mask of `pid`, if it exists.
    pub fn mask_of(&self, pid: ProcessId) -> Option<AffinityMask> {
        self.lock().find(pid).map(|p| p.affinity.clone())
    }
}

impl LoadSampler for SimulatedHost {
    fn sample(&self) -> Result<CoreLoadSnapshot, SamplingError> {
        let (delay, result) = {
            let state = self.lock();
            let result = if state.sampling_fails {
                Err(SamplingError::Unavailable {
                    reason: "simulated sampling failure".to_string(),
                })
            } else if state.loads.len() != self.core_count {
                Err(SamplingError::CoreCountChanged {
                    expected: self.core_count,
                    actual: state.loads.len(),
                })
            } else {
                Ok(CoreLoadSnapshot::new(state.loads.clone()))
            };
            (state.sample_delay, result)
        };

        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        result
    }

    fn core_count(&self) -> usize {
        self.core_count
    }
}

impl ProcessTable for SimulatedHost {
    fn list(&self) -> Result<ProcessListing, EnumerationError> {
        let state = self.lock();
        if state.enumeration_fails {
            return Err(EnumerationError::Unavailable {
                reason: "simulated process table failure".to_string(),
            });
        }
        Ok(ProcessListing {
            records: state.processes.clone(),
            skipped: state.unreadable,
        })
    }

    fn process(&self, pid: ProcessId) -> Result<ProcessRecord, AffinityError> {
        self.lock()
            .find(pid)
            .cloned()
            .ok_or(AffinityError::ProcessVanished { pid })
    }

    fn affinity(&self, pid: ProcessId) -> Result<AffinityMask, AffinityError> {
        self.lock()
            .find(pid)
            .map(|p| p.affinity.clone())
            .ok_or(AffinityError::ProcessVanished { pid })
    }

    fn set_affinity(&self, pid: ProcessId, mask: &AffinityMask) -> Result<(), AffinityError> {
        let delay = self.lock().write_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.lock();
        *state.writes.entry(pid).or_insert(0) += 1;

        if state.find(pid).is_none() {
            return Err(AffinityError::ProcessVanished { pid });
        }
        if mask.is_empty() {
            return Err(AffinityError::ProtectedMask { pid });
        }
        if mask.iter().any(|c| c.index() >= self.core_count) {
            return Err(AffinityError::Os {
                pid,
                reason: format!("invalid mask {}", mask),
            });
        }

        let behavior = state.behaviors.get(&pid).copied().unwrap_or_default();
        match behavior {
            WriteBehavior::Apply => {}
            WriteBehavior::Ignore => return Ok(()),
            WriteBehavior::Deny => return Err(AffinityError::PermissionDenied { pid }),
            WriteBehavior::FailTransient(0) => {}
            WriteBehavior::FailTransient(n) => {
                state
                    .behaviors
                    .insert(pid, WriteBehavior::FailTransient(n - 1));
                return Err(AffinityError::Os {
                    pid,
                    reason: "Resource temporarily unavailable".to_string(),
                });
            }
            WriteBehavior::VanishOnWrite => {
                state.processes.retain(|p| p.pid != pid);
                return Err(AffinityError::ProcessVanished { pid });
            }
        }

        if let Some(p) = state.find_mut(pid) {
            p.affinity = mask.clone();
        }
        Ok(())
    }
}

/// Convenience for tests and demos: pin target for a core index.
pub fn single(core: usize) -> AffinityMask {
    AffinityMask::single(CoreId::new(core))
}
