// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Candidate selection on the overloaded core.

use std::cmp::Ordering;

use crate::config::BalancerConfig;
use crate::eligibility::EligibilityPolicy;
use crate::error::Ineligibility;
use crate::inventory::cmp_cpu_desc;
use crate::types::{CoreId, ProcessRecord};

/// Outcome of ranking the processes on one core.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Head of the ranking, if anything was eligible.
    pub chosen: Option<ProcessRecord>,
    /// Processes on the source core that were filtered out, and why.
    pub rejected: Vec<Ineligibility>,
    /// Processes whose affinity included the source core.
    pub considered: usize,
}

/// Picks which process to move from `source` to `destination`.
pub struct CandidateSelector<'a> {
    config: &'a BalancerConfig,
    policy: EligibilityPolicy<'a>,
}

impl<'a> CandidateSelector<'a> {
    pub fn new(config: &'a BalancerConfig, policy: EligibilityPolicy<'a>) -> Self {
        Self { config, policy }
    }

    /// Rank the eligible processes allowed on `source` and take the head.
    ///
    /// `source_load` is the instantaneous load of the source core; it decides
    /// whether high-priority processes may be disturbed.
    pub fn select(
        &self,
        records: &[ProcessRecord],
        source: CoreId,
        source_load: f64,
        destination: CoreId,
    ) -> Selection {
        let mut selection = Selection::default();
        let mut eligible: Vec<&ProcessRecord> = Vec::new();

        for record in records.iter().filter(|r| r.affinity.contains(source)) {
            selection.considered += 1;

            if let Err(reason) = self
                .policy
                .check(record, destination)
                .and_then(|()| self.policy.check_backoff(record))
            {
                selection.rejected.push(reason);
                continue;
            }
            if let Err(reason) = self.check_priority(record, source, source_load) {
                selection.rejected.push(reason);
                continue;
            }
            eligible.push(record);
        }

        eligible.sort_by(|a, b| rank(a, b));
        selection.chosen = eligible.first().map(|r| (*r).clone());
        selection
    }

    /// High-priority work is only moved off a core that is clearly saturated.
    fn check_priority(
        &self,
        record: &ProcessRecord,
        source: CoreId,
        source_load: f64,
    ) -> Result<(), Ineligibility> {
        match record.nice {
            Some(nice)
                if nice <= self.config.protect_nice_at_or_below
                    && source_load <= self.config.high_threshold + self.config.protect_margin =>
            {
                Err(Ineligibility::ProtectedPriority {
                    pid: record.pid,
                    nice,
                    core: source,
                })
            }
            _ => Ok(()),
        }
    }
}

/// CPU share descending, then niceness ascending with unknown niceness last.
/// `sort_by` is stable, so full ties keep enumeration order.
pub fn rank(a: &ProcessRecord, b: &ProcessRecord) -> Ordering {
    cmp_cpu_desc(a.cpu_percent, b.cpu_percent).then_with(|| match (a.nice, b.nice) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::cooldown::CooldownLedger;
    use crate::types::{AffinityMask, ProcessId, ProcessStatus};

    fn record(pid: u32, cpu: f64, nice: Option<i32>, affinity: AffinityMask) -> ProcessRecord {
        ProcessRecord {
            pid: ProcessId::new(pid),
            name: format!("proc-{}", pid),
            cpu_percent: cpu,
            affinity,
            nice,
            status: ProcessStatus::Running,
        }
    }

    fn select(config: &BalancerConfig, records: &[ProcessRecord], source_load: f64) -> Selection {
        let ledger = CooldownLedger::new();
        let policy = EligibilityPolicy::new(config, &ledger, Instant::now());
        CandidateSelector::new(config, policy).select(
            records,
            CoreId::new(0),
            source_load,
            CoreId::new(3),
        )
    }

    #[test]
    fn test_highest_cpu_wins() {
        let config = BalancerConfig::default();
        let records = vec![
            record(100, 20.0, Some(0), AffinityMask::all(4)),
            record(101, 60.0, Some(0), AffinityMask::all(4)),
            record(102, 40.0, Some(0), AffinityMask::all(4)),
        ];

        let selection = select(&config, &records, 95.0);
        assert_eq!(selection.chosen.unwrap().pid, ProcessId::new(101));
        assert_eq!(selection.considered, 3);
    }

    #[test]
    fn test_niceness_breaks_cpu_ties() {
        let config = BalancerConfig::default();
        let records = vec![
            record(100, 50.0, None, AffinityMask::all(4)),
            record(101, 50.0, Some(10), AffinityMask::all(4)),
            record(102, 50.0, Some(0), AffinityMask::all(4)),
        ];

        let selection = select(&config, &records, 95.0);
        assert_eq!(selection.chosen.unwrap().pid, ProcessId::new(102));
    }

    #[test]
    fn test_full_ties_keep_enumeration_order() {
        let config = BalancerConfig::default();
        let records = vec![
            record(300, 50.0, Some(0), AffinityMask::all(4)),
            record(200, 50.0, Some(0), AffinityMask::all(4)),
        ];

        let selection = select(&config, &records, 95.0);
        assert_eq!(selection.chosen.unwrap().pid, ProcessId::new(300));
    }

    #[test]
    fn test_only_processes_on_source_core() {
        let config = BalancerConfig::default();
        let elsewhere: AffinityMask = [CoreId::new(1), CoreId::new(2)].into_iter().collect();
        let records = vec![
            record(100, 90.0, Some(0), elsewhere),
            record(101, 30.0, Some(0), AffinityMask::all(4)),
        ];

        let selection = select(&config, &records, 95.0);
        assert_eq!(selection.chosen.unwrap().pid, ProcessId::new(101));
        assert_eq!(selection.considered, 1);
    }

    #[test]
    fn test_empty_ranking_is_no_candidate() {
        let config = BalancerConfig::default();
        let records = vec![record(5, 90.0, Some(0), AffinityMask::all(4))];

        let selection = select(&config, &records, 95.0);
        assert!(selection.chosen.is_none());
        assert_eq!(selection.rejected.len(), 1);
    }

    #[test]
    fn test_failed_head_yields_to_next() {
        let config = BalancerConfig::default();
        let ledger = CooldownLedger::new();
        ledger.record_failure(ProcessId::new(100), Instant::now());
        let records = vec![
            record(100, 80.0, Some(0), AffinityMask::all(4)),
            record(101, 30.0, Some(0), AffinityMask::all(4)),
        ];

        let policy = EligibilityPolicy::new(&config, &ledger, Instant::now());
        let selection = CandidateSelector::new(&config, policy).select(
            &records,
            CoreId::new(0),
            95.0,
            CoreId::new(3),
        );
        assert_eq!(selection.chosen.unwrap().pid, ProcessId::new(101));
        assert!(matches!(
            selection.rejected[0],
            Ineligibility::RecentlyFailed { .. }
        ));
    }

    #[test]
    fn test_high_priority_guard() {
        let config = BalancerConfig::default();
        let records = vec![
            record(100, 80.0, Some(-15), AffinityMask::all(4)),
            record(101, 30.0, Some(0), AffinityMask::all(4)),
        ];

        // 72% is not above 70 + 5, so the nice -15 process stays put.
        let selection = select(&config, &records, 72.0);
        assert_eq!(selection.chosen.unwrap().pid, ProcessId::new(101));
        assert!(matches!(
            selection.rejected[0],
            Ineligibility::ProtectedPriority { nice: -15, .. }
        ));

        // A clearly saturated core lifts the guard.
        let selection = select(&config, &records, 90.0);
        assert_eq!(selection.chosen.unwrap().pid, ProcessId::new(100));
    }
}
