// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Cooldown ledger: process id → time of its last committed migration.
//!
//! Entries are checked lazily. An entry older than the cooldown window is
//! simply ignored; it is never required to be removed for correctness.
//!
//! Migrations that failed in a way that would repeat are tracked in a
//! separate map. They only keep a process out of automatic selection and
//! never count as a migration.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::types::ProcessId;

/// Thread-safe map of recently migrated processes.
///
/// Writers are serialized by the control loop; readers such as status
/// displays may look up entries concurrently.
#[derive(Debug, Default)]
pub struct CooldownLedger {
    entries: DashMap<ProcessId, Instant>,
    failures: DashMap<ProcessId, Instant>,
}

impl CooldownLedger {
    /// Create a new empty ledger.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            failures: DashMap::new(),
        }
    }

    /// Record a committed migration at `at`, replacing any older entry.
    pub fn record(&self, pid: ProcessId, at: Instant) {
        self.entries.insert(pid, at);
        self.failures.remove(&pid);
    }

    /// Record a failed migration that should not be retried right away.
    pub fn record_failure(&self, pid: ProcessId, at: Instant) {
        self.failures.insert(pid, at);
    }

    /// Time since the last recorded failure if it is still inside `window`.
    pub fn failed_within(&self, pid: ProcessId, window: Duration, now: Instant) -> Option<Duration> {
        self.failures
            .get(&pid)
            .map(|at| now.saturating_duration_since(*at))
            .filter(|age| *age < window)
    }

    /// Time since the last migration, if any is on record.
    pub fn age(&self, pid: ProcessId, now: Instant) -> Option<Duration> {
        self.entries
            .get(&pid)
            .map(|at| now.saturating_duration_since(*at))
    }

    /// Remaining cooldown age if `pid` is still inside `window`.
    pub fn cooling_age(&self, pid: ProcessId, window: Duration, now: Instant) -> Option<Duration> {
        self.age(pid, now).filter(|age| *age < window)
    }

    /// True when `pid` was migrated less than `window` ago.
    pub fn is_cooling(&self, pid: ProcessId, window: Duration, now: Instant) -> bool {
        self.cooling_age(pid, window, now).is_some()
    }

    /// Timestamp of the last migration of `pid`.
    pub fn last_migrated(&self, pid: ProcessId) -> Option<Instant> {
        self.entries.get(&pid).map(|at| *at)
    }

    pub fn contains(&self, pid: ProcessId) -> bool {
        self.entries.contains_key(&pid)
    }

    /// Number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Optional housekeeping: drop entries older than `window`.
    ///
    /// Returns how many entries were removed.
    pub fn prune(&self, window: Duration, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, at| now.saturating_duration_since(*at) < window);
        self.failures
            .retain(|_, at| now.saturating_duration_since(*at) < window);
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_secs(15);

    #[test]
    fn test_entry_inside_window_is_cooling() {
        let ledger = CooldownLedger::new();
        let pid = ProcessId::new(4321);
        let t0 = Instant::now();

        ledger.record(pid, t0);

        assert!(ledger.is_cooling(pid, WINDOW, t0 + Duration::from_secs(10)));
        assert!(!ledger.is_cooling(pid, WINDOW, t0 + Duration::from_secs(20)));
        // Expired entries stay physically present.
        assert!(ledger.contains(pid));
    }

    #[test]
    fn test_window_boundary_is_exclusive() {
        let ledger = CooldownLedger::new();
        let pid = ProcessId::new(4321);
        let t0 = Instant::now();

        ledger.record(pid, t0);
        assert!(!ledger.is_cooling(pid, WINDOW, t0 + WINDOW));
    }

    #[test]
    fn test_unknown_pid_is_not_cooling() {
        let ledger = CooldownLedger::new();
        assert!(!ledger.is_cooling(ProcessId::new(1), WINDOW, Instant::now()));
        assert_eq!(ledger.age(ProcessId::new(1), Instant::now()), None);
    }

    #[test]
    fn test_record_replaces_older_entry() {
        let ledger = CooldownLedger::new();
        let pid = ProcessId::new(777);
        let t0 = Instant::now();

        ledger.record(pid, t0);
        ledger.record(pid, t0 + Duration::from_secs(20));

        assert_eq!(ledger.len(), 1);
        assert!(ledger.is_cooling(pid, WINDOW, t0 + Duration::from_secs(25)));
    }

    #[test]
    fn test_prune_removes_only_expired() {
        let ledger = CooldownLedger::new();
        let t0 = Instant::now();

        ledger.record(ProcessId::new(100), t0);
        ledger.record(ProcessId::new(200), t0 + Duration::from_secs(10));

        let removed = ledger.prune(WINDOW, t0 + Duration::from_secs(20));
        assert_eq!(removed, 1);
        assert!(!ledger.contains(ProcessId::new(100)));
        assert!(ledger.contains(ProcessId::new(200)));
    }

    #[test]
    fn test_failures_are_not_migrations() {
        let ledger = CooldownLedger::new();
        let pid = ProcessId::new(900);
        let t0 = Instant::now();

        ledger.record_failure(pid, t0);

        assert!(!ledger.contains(pid));
        assert!(!ledger.is_cooling(pid, WINDOW, t0));
        assert_eq!(
            ledger.failed_within(pid, WINDOW, t0 + Duration::from_secs(5)),
            Some(Duration::from_secs(5))
        );
        assert_eq!(ledger.failed_within(pid, WINDOW, t0 + WINDOW), None);

        // A later commit clears the failure.
        ledger.record(pid, t0 + Duration::from_secs(1));
        assert_eq!(ledger.failed_within(pid, WINDOW, t0 + Duration::from_secs(2)), None);
    }

    #[test]
    fn test_concurrent_readers() {
        use std::thread;

        let ledger = Arc::new(CooldownLedger::new());
        let t0 = Instant::now();
        for pid in 0..10 {
            ledger.record(ProcessId::new(pid), t0);
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    (0..10)
                        .filter(|pid| ledger.is_cooling(ProcessId::new(*pid), WINDOW, t0))
                        .count()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 10);
        }
    }
}
