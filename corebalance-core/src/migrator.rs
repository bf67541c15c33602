// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Affinity migration with typed state transitions.
//!
//! Implements the lifecycle: Proposed → Applying → Verifying → Committed,
//! with Failed reachable from every non-terminal state and Failed → Applying
//! for retries. A migration only counts once the read-back affinity matches,
//! so the cooldown ledger is never written for a change the OS did not apply.

use std::sync::Arc;
use std::time::Instant;

use serde::{Serialize, Serializer};

use crate::config::BalancerConfig;
use crate::cooldown::CooldownLedger;
use crate::eligibility::EligibilityPolicy;
use crate::error::{AffinityError, MigrationError, StateTransitionError};
use crate::events::{BalancerEvent, EventSink, LogKind};
use crate::platform::ProcessTable;
use crate::types::{AffinityMask, CoreId, ProcessId};

/// Migration lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MigrationState {
    /// Candidate and destination chosen, nothing written yet.
    Proposed,

    /// Affinity write issued.
    Applying,

    /// Reading the affinity back.
    Verifying,

    /// The OS confirmed the new affinity.
    Committed,

    /// The last attempt failed; may go back to Applying while retries remain.
    Failed,
}

impl MigrationState {
    /// Get the state name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Proposed => "Proposed",
            Self::Applying => "Applying",
            Self::Verifying => "Verifying",
            Self::Committed => "Committed",
            Self::Failed => "Failed",
        }
    }

    /// Check if transition to the target state is valid.
    pub fn can_transition_to(&self, target: MigrationState) -> bool {
        matches!(
            (self, target),
            // From Proposed
            (Self::Proposed, Self::Applying) |
            (Self::Proposed, Self::Failed) |
            // From Applying
            (Self::Applying, Self::Verifying) |
            (Self::Applying, Self::Failed) |
            // From Verifying
            (Self::Verifying, Self::Committed) |
            (Self::Verifying, Self::Failed) |
            // Retry
            (Self::Failed, Self::Applying)
        )
    }
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A process and the single core it should be pinned to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Proposal {
    pub pid: ProcessId,
    pub name: String,
    /// Core the process is being moved off, if the move came from a trigger.
    pub source: Option<CoreId>,
    pub destination: CoreId,
}

/// State machine for one migration.
#[derive(Debug)]
pub struct Migration {
    proposal: Proposal,
    state: MigrationState,
    attempts: u32,
    started: Instant,
}

impl Migration {
    pub fn new(proposal: Proposal) -> Self {
        Self {
            proposal,
            state: MigrationState::Proposed,
            attempts: 0,
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    pub fn proposal(&self) -> &Proposal {
        &self.proposal
    }

    /// Number of affinity writes started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&mut self, target: MigrationState) -> Result<(), StateTransitionError> {
        if !self.state.can_transition_to(target) {
            return Err(StateTransitionError::InvalidTransition {
                pid: self.proposal.pid,
                from: self.state.name(),
                to: target.name(),
            });
        }

        tracing::debug!(
            pid = %self.proposal.pid,
            from = self.state.name(),
            to = target.name(),
            "Migration transition"
        );

        if target == MigrationState::Applying {
            self.attempts += 1;
        }
        self.state = target;
        Ok(())
    }

    fn into_report(self, error: Option<MigrationError>) -> MigrationReport {
        MigrationReport {
            pid: self.proposal.pid,
            name: self.proposal.name,
            source: self.proposal.source,
            destination: self.proposal.destination,
            state: self.state,
            attempts: self.attempts,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            error,
        }
    }
}

/// Terminal result of a migration, surfaced as an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    pub pid: ProcessId,
    pub name: String,
    pub source: Option<CoreId>,
    pub destination: CoreId,
    pub state: MigrationState,
    pub attempts: u32,
    pub elapsed_ms: u64,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<MigrationError>,
}

impl MigrationReport {
    pub fn is_committed(&self) -> bool {
        self.state == MigrationState::Committed
    }
}

fn serialize_error<S: Serializer>(
    error: &Option<MigrationError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Applies, verifies and retries affinity changes.
///
/// Every call into the process table runs on the blocking pool.
pub struct AffinityMigrator<'a> {
    table: Arc<dyn ProcessTable>,
    ledger: &'a CooldownLedger,
    config: &'a BalancerConfig,
    events: &'a EventSink,
}

impl<'a> AffinityMigrator<'a> {
    pub fn new(
        table: Arc<dyn ProcessTable>,
        ledger: &'a CooldownLedger,
        config: &'a BalancerConfig,
        events: &'a EventSink,
    ) -> Self {
        Self {
            table,
            ledger,
            config,
            events,
        }
    }

    /// Drive `proposal` to Committed or Failed.
    ///
    /// Transient failures are retried up to `max_retries` times with
    /// `retry_backoff` between attempts. The sequence is never cancelled
    /// half-way.
    pub async fn migrate(&self, proposal: Proposal) -> MigrationReport {
        let pid = proposal.pid;
        let target = AffinityMask::single(proposal.destination);
        let max_attempts = self.config.max_retries + 1;

        self.events.info(
            LogKind::Attempt,
            format!(
                "Migrating {} (PID {}) {}to {}",
                proposal.name,
                pid,
                proposal
                    .source
                    .map(|core| format!("from {} ", core))
                    .unwrap_or_default(),
                proposal.destination
            ),
        );

        let mut migration = Migration::new(proposal);

        let outcome = loop {
            let err = match self.attempt(&mut migration, &target).await {
                Ok(()) => break Ok(()),
                Err(e) => e,
            };

            if migration.state() != MigrationState::Failed {
                if let Err(e) = migration.transition_to(MigrationState::Failed) {
                    break Err(e.into());
                }
            }

            if err.is_permanent() {
                break Err(err);
            }
            if migration.attempts() >= max_attempts {
                break Err(MigrationError::RetriesExhausted {
                    pid,
                    attempts: migration.attempts(),
                    last: err.to_string(),
                });
            }

            self.events.warn(
                LogKind::Retry,
                format!(
                    "Attempt {}/{} for PID {} failed: {}; retrying in {}ms",
                    migration.attempts(),
                    max_attempts,
                    pid,
                    err,
                    self.config.retry_backoff.as_millis()
                ),
            );
            tokio::time::sleep(self.config.retry_backoff).await;
        };

        let report = match outcome {
            Ok(()) => {
                self.ledger.record(pid, Instant::now());
                let report = migration.into_report(None);
                self.events.info(
                    LogKind::Success,
                    format!(
                        "Moved {} (PID {}) to {} after {} attempt(s)",
                        report.name, report.pid, report.destination, report.attempts
                    ),
                );
                report
            }
            Err(e) => {
                if e.blocks_reselection() {
                    self.ledger.record_failure(pid, Instant::now());
                }
                let report = migration.into_report(Some(e));
                self.events.error(
                    LogKind::Failure,
                    format!(
                        "Failed to move {} (PID {}) to {}: {}",
                        report.name,
                        report.pid,
                        report.destination,
                        report
                            .error
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_default()
                    ),
                );
                report
            }
        };

        self.events.emit(BalancerEvent::Migration(report.clone()));
        report
    }

    /// One Applying → Verifying → Committed pass.
    async fn attempt(
        &self,
        migration: &mut Migration,
        target: &AffinityMask,
    ) -> Result<(), MigrationError> {
        migration.transition_to(MigrationState::Applying)?;
        let pid = migration.proposal().pid;
        let destination = migration.proposal().destination;

        // Re-check against live state right before the write.
        let record = self.on_table(pid, move |table| table.process(pid)).await?;
        EligibilityPolicy::new(self.config, self.ledger, Instant::now()).check(&record, destination)?;

        let mask = target.clone();
        self.on_table(pid, move |table| table.set_affinity(pid, &mask))
            .await?;

        migration.transition_to(MigrationState::Verifying)?;
        let actual = self.on_table(pid, move |table| table.affinity(pid)).await?;
        if actual != *target {
            return Err(MigrationError::VerificationMismatch {
                pid,
                expected: target.clone(),
                actual,
            });
        }

        migration.transition_to(MigrationState::Committed)?;
        Ok(())
    }

    /// Run one process-table call on the blocking pool. A panicked call is
    /// reported as an OS failure so it is retried like one.
    async fn on_table<T, F>(&self, pid: ProcessId, op: F) -> Result<T, AffinityError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ProcessTable) -> Result<T, AffinityError> + Send + 'static,
    {
        let table = Arc::clone(&self.table);
        tokio::task::spawn_blocking(move || op(table.as_ref()))
            .await
            .unwrap_or_else(|join| {
                Err(AffinityError::Os {
                    pid,
                    reason: join.to_string(),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::events::BalancerEvent;
    use crate::sim::{single, SimulatedHost, WriteBehavior};

    fn host(cores: usize) -> Arc<SimulatedHost> {
        Arc::new(SimulatedHost::new(cores))
    }

    fn migrator<'a>(
        host: &Arc<SimulatedHost>,
        ledger: &'a CooldownLedger,
        config: &'a BalancerConfig,
        events: &'a EventSink,
    ) -> AffinityMigrator<'a> {
        AffinityMigrator::new(Arc::clone(host) as Arc<dyn ProcessTable>, ledger, config, events)
    }

    /// Short backoff so retries finish quickly in real time.
    fn fast_retries() -> BalancerConfig {
        BalancerConfig {
            retry_backoff: Duration::from_millis(5),
            ..BalancerConfig::default()
        }
    }

    fn proposal(pid: u32, destination: usize) -> Proposal {
        Proposal {
            pid: ProcessId::new(pid),
            name: "worker".to_string(),
            source: Some(CoreId::new(0)),
            destination: CoreId::new(destination),
        }
    }

    fn success_events(rx: &mut tokio::sync::broadcast::Receiver<BalancerEvent>) -> usize {
        let mut count = 0;
        while let Ok(event) = rx.try_recv() {
            if let BalancerEvent::Log(log) = event {
                if log.kind == LogKind::Success {
                    count += 1;
                }
            }
        }
        count
    }

    #[test]
    fn test_valid_transitions() {
        let mut m = Migration::new(proposal(500, 1));
        assert_eq!(m.state(), MigrationState::Proposed);

        assert!(m.transition_to(MigrationState::Applying).is_ok());
        assert!(m.transition_to(MigrationState::Failed).is_ok());
        assert!(m.transition_to(MigrationState::Applying).is_ok());
        assert!(m.transition_to(MigrationState::Verifying).is_ok());
        assert!(m.transition_to(MigrationState::Committed).is_ok());
        assert_eq!(m.attempts(), 2);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut m = Migration::new(proposal(500, 1));

        // Cannot verify before applying
        assert!(m.transition_to(MigrationState::Verifying).is_err());
        // Cannot commit without verification
        assert!(m.transition_to(MigrationState::Committed).is_err());

        m.transition_to(MigrationState::Applying).unwrap();
        m.transition_to(MigrationState::Verifying).unwrap();
        m.transition_to(MigrationState::Committed).unwrap();

        // Committed is terminal
        assert!(m.transition_to(MigrationState::Applying).is_err());
        assert!(m.transition_to(MigrationState::Failed).is_err());
    }

    #[tokio::test]
    async fn test_round_trip_commits() {
        let host = host(4);
        host.spawn(500, "worker", 80.0);
        let ledger = CooldownLedger::new();
        let config = BalancerConfig::default();
        let events = EventSink::default();
        let mut rx = events.subscribe();

        let before = Instant::now();
        let report = migrator(&host, &ledger, &config, &events)
            .migrate(proposal(500, 3))
            .await;

        assert!(report.is_committed());
        assert_eq!(report.attempts, 1);
        assert_eq!(host.mask_of(ProcessId::new(500)), Some(single(3)));
        let at = ledger.last_migrated(ProcessId::new(500)).unwrap();
        assert!(at >= before);
        assert_eq!(success_events(&mut rx), 1);
    }

    #[tokio::test]
    async fn test_ignored_write_exhausts_retries() {
        let host = host(4);
        let pid = host.spawn(500, "worker", 80.0).pid;
        host.set_write_behavior(pid, WriteBehavior::Ignore);
        let ledger = CooldownLedger::new();
        let config = fast_retries();
        let events = EventSink::default();
        let mut rx = events.subscribe();

        let report = migrator(&host, &ledger, &config, &events)
            .migrate(proposal(500, 3))
            .await;

        assert_eq!(report.state, MigrationState::Failed);
        assert_eq!(report.attempts, config.max_retries + 1);
        assert_eq!(host.write_attempts(pid), config.max_retries + 1);
        assert!(matches!(
            report.error,
            Some(MigrationError::RetriesExhausted { .. })
        ));
        assert!(!ledger.contains(pid));
        assert!(ledger
            .failed_within(pid, config.cooldown, Instant::now())
            .is_some());
        assert_eq!(success_events(&mut rx), 0);
    }

    #[tokio::test]
    async fn test_permission_denied_is_not_retried() {
        let host = host(4);
        let pid = host.spawn(500, "worker", 80.0).pid;
        host.set_write_behavior(pid, WriteBehavior::Deny);
        let ledger = CooldownLedger::new();
        let config = BalancerConfig::default();
        let events = EventSink::default();

        let report = migrator(&host, &ledger, &config, &events)
            .migrate(proposal(500, 3))
            .await;

        assert_eq!(report.attempts, 1);
        assert!(matches!(
            report.error,
            Some(MigrationError::PermissionDenied { .. })
        ));
        assert!(!ledger.contains(pid));
        assert!(ledger
            .failed_within(pid, config.cooldown, Instant::now())
            .is_some());
    }

    #[tokio::test]
    async fn test_vanished_process_is_not_retried() {
        let host = host(4);
        let pid = host.spawn(500, "worker", 80.0).pid;
        host.set_write_behavior(pid, WriteBehavior::VanishOnWrite);
        let ledger = CooldownLedger::new();
        let config = BalancerConfig::default();
        let events = EventSink::default();

        let report = migrator(&host, &ledger, &config, &events)
            .migrate(proposal(500, 3))
            .await;

        assert_eq!(host.write_attempts(pid), 1);
        assert!(matches!(
            report.error,
            Some(MigrationError::ProcessVanished { .. })
        ));
        assert!(ledger
            .failed_within(pid, config.cooldown, Instant::now())
            .is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let host = host(4);
        let pid = host.spawn(500, "worker", 80.0).pid;
        host.set_write_behavior(pid, WriteBehavior::FailTransient(1));
        let ledger = CooldownLedger::new();
        let config = fast_retries();
        let events = EventSink::default();

        let report = migrator(&host, &ledger, &config, &events)
            .migrate(proposal(500, 2))
            .await;

        assert!(report.is_committed());
        assert_eq!(report.attempts, 2);
        assert!(ledger.contains(pid));
    }

    #[tokio::test]
    async fn test_slow_write_does_not_block_runtime() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let host = host(4);
        host.spawn(500, "worker", 80.0);
        host.set_write_delay(Duration::from_millis(200));
        let ledger = CooldownLedger::new();
        let config = BalancerConfig::default();
        let events = EventSink::default();

        // Single-threaded runtime: this only advances while the write is
        // off the worker thread.
        let beats = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&beats);
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let report = migrator(&host, &ledger, &config, &events)
            .migrate(proposal(500, 3))
            .await;
        ticker.abort();

        assert!(report.is_committed());
        assert!(beats.load(Ordering::SeqCst) >= 5);
    }

    #[tokio::test]
    async fn test_eligibility_rechecked_at_write_time() {
        let host = host(4);
        let pid = host.spawn(500, "worker", 80.0).pid;
        // Became a zombie after it was selected.
        host.set_status(pid, crate::types::ProcessStatus::Zombie);
        let ledger = CooldownLedger::new();
        let config = BalancerConfig::default();
        let events = EventSink::default();

        let report = migrator(&host, &ledger, &config, &events)
            .migrate(proposal(500, 3))
            .await;

        assert!(matches!(report.error, Some(MigrationError::Ineligible(_))));
        assert_eq!(host.write_attempts(pid), 0);
    }

    #[test]
    fn test_report_serializes_error_as_text() {
        let report = Migration::new(proposal(500, 1)).into_report(Some(
            MigrationError::PermissionDenied {
                pid: ProcessId::new(500),
            },
        ));
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("Permission denied"));
    }
}
