// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers and value types shared by every balancer component.
//!
//! Snapshots and records are plain values: they are produced fresh every tick
//! and never mutated after construction.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// OS-assigned process identifier.
///
/// PID 0 is representable because the kernel idle task shows up in some
/// process listings; eligibility rules reject it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(u32);

impl ProcessId {
    pub const fn new(pid: u32) -> Self {
        Self(pid)
    }

    /// Get the inner PID value.
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// PID 0 is the kernel idle task and never a migration target.
    pub const fn is_kernel_idle(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

impl From<ProcessId> for u32 {
    fn from(pid: ProcessId) -> Self {
        pid.0
    }
}

/// Logical CPU index as exposed by the OS scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoreId(usize);

impl CoreId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU {}", self.0)
    }
}

impl From<usize> for CoreId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

/// Set of cores a process may run on.
///
/// An empty mask means the OS reported no usable affinity (kernel threads,
/// unreadable entries). Such masks are never overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AffinityMask(BTreeSet<CoreId>);

impl AffinityMask {
    pub fn empty() -> Self {
        Self(BTreeSet::new())
    }

    /// Mask pinning a process to exactly one core.
    pub fn single(core: CoreId) -> Self {
        let mut cores = BTreeSet::new();
        cores.insert(core);
        Self(cores)
    }

    /// Mask allowing every core in `0..core_count`.
    pub fn all(core_count: usize) -> Self {
        (0..core_count).map(CoreId::new).collect()
    }

    pub fn contains(&self, core: CoreId) -> bool {
        self.0.contains(&core)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the mask is exactly `{core}`.
    pub fn is_only(&self, core: CoreId) -> bool {
        self.0.len() == 1 && self.0.contains(&core)
    }

    pub fn iter(&self) -> impl Iterator<Item = CoreId> + '_ {
        self.0.iter().copied()
    }

    /// Parse a kernel CPU list such as "0-3,8-11".
    ///
    /// Malformed fragments are skipped, matching how sysfs consumers treat
    /// partially written lists.
    pub fn parse_list(s: &str) -> Self {
        let mut cores = BTreeSet::new();
        for part in s.split(',') {
            let part = part.trim();
            if let Some((start, end)) = part.split_once('-') {
                if let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) {
                    cores.extend((start..=end).map(CoreId::new));
                }
            } else if let Ok(cpu) = part.parse::<usize>() {
                cores.insert(CoreId::new(cpu));
            }
        }
        Self(cores)
    }
}

impl FromIterator<CoreId> for AffinityMask {
    fn from_iter<I: IntoIterator<Item = CoreId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Renders the mask back in kernel CPU-list form ("0-3,8").
impl fmt::Display for AffinityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "-");
        }

        let mut ranges: Vec<(usize, usize)> = Vec::new();
        for core in self.0.iter().map(CoreId::index) {
            match ranges.last_mut() {
                Some((_, end)) if *end + 1 == core => *end = core,
                _ => ranges.push((core, core)),
            }
        }

        let parts: Vec<String> = ranges
            .into_iter()
            .map(|(start, end)| {
                if start == end {
                    start.to_string()
                } else {
                    format!("{}-{}", start, end)
                }
            })
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Liveness of a process as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    Running,
    Sleeping,
    Idle,
    Stopped,
    Zombie,
    Dead,
    Unknown,
}

impl ProcessStatus {
    /// Terminated processes can never be migrated.
    pub const fn is_terminated(&self) -> bool {
        matches!(self, Self::Zombie | Self::Dead)
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Sleeping => "sleeping",
            Self::Idle => "idle",
            Self::Stopped => "stopped",
            Self::Zombie => "zombie",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One process as seen during a single enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: ProcessId,
    pub name: String,
    /// Share of one core, so values above 100 are possible for threaded work.
    pub cpu_percent: f64,
    pub affinity: AffinityMask,
    /// Niceness, `None` when the OS refused to report it.
    pub nice: Option<i32>,
    pub status: ProcessStatus,
}

/// Per-core utilization at one instant, index = core id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreLoadSnapshot {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    loads: Vec<f64>,
}

impl CoreLoadSnapshot {
    /// Build a snapshot stamped with the current wall-clock time.
    /// Values are clamped into [0, 100].
    pub fn new(loads: Vec<f64>) -> Self {
        Self::at(now_millis(), loads)
    }

    pub fn at(timestamp_ms: u64, loads: Vec<f64>) -> Self {
        let loads = loads
            .into_iter()
            .map(|l| if l.is_nan() { 0.0 } else { l.clamp(0.0, 100.0) })
            .collect();
        Self {
            timestamp_ms,
            loads,
        }
    }

    /// All-zero snapshot substituted when sampling fails.
    pub fn zeroed(core_count: usize) -> Self {
        Self::new(vec![0.0; core_count])
    }

    pub fn loads(&self) -> &[f64] {
        &self.loads
    }

    pub fn core_count(&self) -> usize {
        self.loads.len()
    }

    pub fn load(&self, core: CoreId) -> Option<f64> {
        self.loads.get(core.index()).copied()
    }

    /// Most loaded core; lowest index wins ties.
    pub fn busiest(&self) -> Option<CoreId> {
        let mut best: Option<(usize, f64)> = None;
        for (i, &load) in self.loads.iter().enumerate() {
            if best.map_or(true, |(_, b)| load > b) {
                best = Some((i, load));
            }
        }
        best.map(|(i, _)| CoreId::new(i))
    }

    /// Least loaded core; lowest index wins ties.
    pub fn idlest(&self) -> Option<CoreId> {
        let mut best: Option<(usize, f64)> = None;
        for (i, &load) in self.loads.iter().enumerate() {
            if best.map_or(true, |(_, b)| load < b) {
                best = Some((i, load));
            }
        }
        best.map(|(i, _)| CoreId::new(i))
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_list_mixed() {
        let mask = AffinityMask::parse_list("0-1,4-5");
        let cores: Vec<usize> = mask.iter().map(|c| c.index()).collect();
        assert_eq!(cores, vec![0, 1, 4, 5]);
    }

    #[test]
    fn test_parse_cpu_list_empty() {
        assert!(AffinityMask::parse_list("").is_empty());
    }

    #[test]
    fn test_mask_display_compresses_ranges() {
        let mask = AffinityMask::parse_list("0,2-4,7,10-12");
        assert_eq!(mask.to_string(), "0,2-4,7,10-12");
        assert_eq!(AffinityMask::empty().to_string(), "-");
    }

    #[test]
    fn test_mask_is_only() {
        let mask = AffinityMask::single(CoreId::new(3));
        assert!(mask.is_only(CoreId::new(3)));
        assert!(!mask.is_only(CoreId::new(2)));
        assert!(!AffinityMask::all(4).is_only(CoreId::new(3)));
    }

    #[test]
    fn test_busiest_and_idlest_prefer_lowest_index() {
        let snap = CoreLoadSnapshot::new(vec![50.0, 90.0, 90.0, 10.0, 10.0]);
        assert_eq!(snap.busiest(), Some(CoreId::new(1)));
        assert_eq!(snap.idlest(), Some(CoreId::new(3)));
    }

    #[test]
    fn test_snapshot_clamps_values() {
        let snap = CoreLoadSnapshot::new(vec![-5.0, 150.0, f64::NAN]);
        assert_eq!(snap.loads(), &[0.0, 100.0, 0.0]);
    }

    #[test]
    fn test_empty_snapshot_has_no_extremes() {
        let snap = CoreLoadSnapshot::new(vec![]);
        assert_eq!(snap.busiest(), None);
        assert_eq!(snap.idlest(), None);
    }

    #[test]
    fn test_terminated_status() {
        assert!(ProcessStatus::Zombie.is_terminated());
        assert!(ProcessStatus::Dead.is_terminated());
        assert!(!ProcessStatus::Sleeping.is_terminated());
    }
}
