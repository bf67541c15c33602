// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! The balancing decision engine.
//!
//! [`Balancer`] owns the configuration, load history and cooldown ledger and
//! runs one tick at a time: sample, track, predict, decide, and if the gate
//! opens, inventory → selection → migration. Every OS failure on the way is
//! turned into a log event; nothing here stops the loop.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::BalancerConfig;
use crate::cooldown::CooldownLedger;
use crate::eligibility::EligibilityPolicy;
use crate::error::{
    AffinityError, BalanceError, BalanceResult, EnumerationError, Ineligibility, MigrationError,
    SamplingError,
};
use crate::events::{BalancerEvent, EventSink, LogKind};
use crate::history::{predict_overload, LoadHistory};
use crate::inventory::{self, Inventory};
use crate::migrator::{AffinityMigrator, MigrationReport, Proposal};
use crate::platform::{LoadSampler, ProcessTable};
use crate::selector::CandidateSelector;
use crate::types::{CoreId, CoreLoadSnapshot, ProcessId, ProcessRecord};

/// Why the trigger gate stayed closed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum HoldReason {
    AutoBalanceDisabled,
    NoCores,
    NotOverloaded { core: CoreId, load: f64 },
    NoIdleCore { core: CoreId, load: f64 },
    GapTooSmall { gap: f64 },
    /// Manual balance with every core equally loaded.
    Balanced,
}

impl fmt::Display for HoldReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoBalanceDisabled => write!(f, "auto-balance is disabled"),
            Self::NoCores => write!(f, "no cores reported"),
            Self::NotOverloaded { core, load } => {
                write!(f, "busiest core {} at {:.1}% is not overloaded", core, load)
            }
            Self::NoIdleCore { core, load } => {
                write!(f, "idlest core {} at {:.1}% is not underloaded", core, load)
            }
            Self::GapTooSmall { gap } => write!(f, "load gap {:.1} is below the minimum", gap),
            Self::Balanced => write!(f, "all cores equally loaded"),
        }
    }
}

/// Result of the trigger gate for one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum TriggerDecision {
    Trigger { source: CoreId, destination: CoreId },
    Hold(HoldReason),
}

/// What one tick or manual command decided.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BalancingDecision {
    /// The gate stayed closed.
    Hold(HoldReason),
    /// The process table could not be read; nothing was attempted.
    InventoryUnavailable,
    /// The gate opened but nothing on the source core was eligible.
    NoCandidate { source: CoreId, destination: CoreId },
    Migrate {
        source: CoreId,
        destination: CoreId,
        pid: ProcessId,
    },
}

impl BalancingDecision {
    /// True for every outcome except an attempted migration.
    pub fn is_no_action(&self) -> bool {
        !matches!(self, Self::Migrate { .. })
    }
}

/// Everything one tick observed and did.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub snapshot: CoreLoadSnapshot,
    pub prediction: Option<CoreId>,
    pub decision: BalancingDecision,
    pub migration: Option<MigrationReport>,
}

/// Decide whether `snapshot` warrants a migration.
///
/// The gate always uses the instantaneous busiest core M and idlest core L.
/// The prediction only chooses the source, and only when the predicted core
/// is itself above the high threshold right now.
pub fn evaluate(
    snapshot: &CoreLoadSnapshot,
    prediction: Option<CoreId>,
    config: &BalancerConfig,
) -> TriggerDecision {
    if !config.auto_balance {
        return TriggerDecision::Hold(HoldReason::AutoBalanceDisabled);
    }

    let (Some(busiest), Some(idlest)) = (snapshot.busiest(), snapshot.idlest()) else {
        return TriggerDecision::Hold(HoldReason::NoCores);
    };
    let max = snapshot.load(busiest).unwrap_or(0.0);
    let min = snapshot.load(idlest).unwrap_or(0.0);

    if max <= config.high_threshold {
        return TriggerDecision::Hold(HoldReason::NotOverloaded {
            core: busiest,
            load: max,
        });
    }
    if min >= config.low_threshold {
        return TriggerDecision::Hold(HoldReason::NoIdleCore {
            core: idlest,
            load: min,
        });
    }
    if max - min <= config.min_gap {
        return TriggerDecision::Hold(HoldReason::GapTooSmall { gap: max - min });
    }

    let source = prediction
        .filter(|core| {
            snapshot
                .load(*core)
                .map_or(false, |load| load > config.high_threshold)
        })
        .unwrap_or(busiest);

    TriggerDecision::Trigger {
        source,
        destination: idlest,
    }
}

/// Control-loop state and the components it drives.
pub struct Balancer {
    config: BalancerConfig,
    history: LoadHistory,
    ledger: Arc<CooldownLedger>,
    sampler: Arc<dyn LoadSampler>,
    table: Arc<dyn ProcessTable>,
    events: EventSink,
}

impl Balancer {
    pub fn new(
        config: BalancerConfig,
        sampler: Arc<dyn LoadSampler>,
        table: Arc<dyn ProcessTable>,
        events: EventSink,
    ) -> Self {
        Self {
            config,
            history: LoadHistory::new(),
            ledger: Arc::new(CooldownLedger::new()),
            sampler,
            table,
            events,
        }
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    pub fn history(&self) -> &LoadHistory {
        &self.history
    }

    pub fn ledger(&self) -> &Arc<CooldownLedger> {
        &self.ledger
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    // =========================================================================
    // Configuration commands
    // =========================================================================

    pub fn set_auto_balance(&mut self, enabled: bool) {
        self.config.auto_balance = enabled;
        self.events.info(
            LogKind::Command,
            format!(
                "Auto-balance {}",
                if enabled { "enabled" } else { "disabled" }
            ),
        );
    }

    /// Replace the high threshold. An invalid value leaves the configuration untouched.
    pub fn set_high_threshold(&mut self, high: f64) -> BalanceResult<()> {
        match self.config.with_high_threshold(high) {
            Ok(config) => {
                self.config = config;
                self.events
                    .info(LogKind::Command, format!("High threshold set to {:.1}%", high));
                Ok(())
            }
            Err(e) => {
                self.events
                    .warn(LogKind::Command, format!("Rejected high threshold: {}", e));
                Err(e.into())
            }
        }
    }

    /// Replace the low threshold. An invalid value leaves the configuration untouched.
    pub fn set_low_threshold(&mut self, low: f64) -> BalanceResult<()> {
        match self.config.with_low_threshold(low) {
            Ok(config) => {
                self.config = config;
                self.events
                    .info(LogKind::Command, format!("Low threshold set to {:.1}%", low));
                Ok(())
            }
            Err(e) => {
                self.events
                    .warn(LogKind::Command, format!("Rejected low threshold: {}", e));
                Err(e.into())
            }
        }
    }

    // =========================================================================
    // Balancing
    // =========================================================================

    /// Run one automatic tick.
    pub async fn tick(&mut self) -> TickReport {
        let config = self.config.clone();

        let snapshot = self.sample(&config).await;
        self.history.push(snapshot.clone());
        let prediction = predict_overload(&self.history, config.high_threshold);

        self.events.emit(BalancerEvent::LoadUpdate {
            snapshot: snapshot.clone(),
            predicted_overload: prediction,
        });

        let (decision, migration) = match evaluate(&snapshot, prediction, &config) {
            TriggerDecision::Hold(reason) => {
                self.events
                    .debug(LogKind::Decision, format!("No trigger: {}", reason));
                (BalancingDecision::Hold(reason), None)
            }
            TriggerDecision::Trigger {
                source,
                destination,
            } => {
                self.events.info(
                    LogKind::Decision,
                    format!(
                        "Imbalance detected: {} at {:.1}%, {} at {:.1}%{}",
                        source,
                        snapshot.load(source).unwrap_or(0.0),
                        destination,
                        snapshot.load(destination).unwrap_or(0.0),
                        if prediction == Some(source) {
                            " (predicted)"
                        } else {
                            ""
                        }
                    ),
                );
                self.rebalance(&config, &snapshot, source, destination).await
            }
        };

        TickReport {
            snapshot,
            prediction,
            decision,
            migration,
        }
    }

    /// Manual trigger: bypasses the threshold gate, keeps eligibility.
    pub async fn force_balance(&mut self) -> TickReport {
        let config = self.config.clone();
        self.events
            .info(LogKind::Command, "Manual balance requested");

        let snapshot = self.sample(&config).await;
        let (decision, migration) = match (snapshot.busiest(), snapshot.idlest()) {
            (Some(source), Some(destination)) if source != destination => {
                self.rebalance(&config, &snapshot, source, destination).await
            }
            (Some(_), Some(_)) => {
                self.events.info(
                    LogKind::Decision,
                    format!("Manual balance: {}", HoldReason::Balanced),
                );
                (BalancingDecision::Hold(HoldReason::Balanced), None)
            }
            _ => (BalancingDecision::Hold(HoldReason::NoCores), None),
        };

        TickReport {
            snapshot,
            prediction: None,
            decision,
            migration,
        }
    }

    /// Pin one process to the currently least-loaded core.
    ///
    /// Candidate selection is skipped but eligibility still applies, so a
    /// process already pinned to the destination is rejected as a no-op.
    pub async fn balance_process(&mut self, pid: ProcessId) -> BalanceResult<MigrationReport> {
        let config = self.config.clone();
        self.events
            .info(LogKind::Command, format!("Balance requested for PID {}", pid));

        let table = Arc::clone(&self.table);
        let lookup = tokio::task::spawn_blocking(move || table.process(pid))
            .await
            .unwrap_or_else(|join| {
                Err(AffinityError::Os {
                    pid,
                    reason: join.to_string(),
                })
            });
        let record = lookup.map_err(|e| match e {
            AffinityError::ProcessVanished { .. } => {
                self.events
                    .warn(LogKind::Command, format!("PID {} is not running", pid));
                BalanceError::ProcessNotFound(pid)
            }
            other => BalanceError::Migration(other.into()),
        })?;

        let snapshot = self.sample(&config).await;
        let destination = snapshot
            .idlest()
            .ok_or_else(|| SamplingError::Unavailable {
                reason: "no cores reported".to_string(),
            })?;

        EligibilityPolicy::new(&config, &self.ledger, Instant::now())
            .check(&record, destination)
            .map_err(|reason| {
                self.events.warn(
                    LogKind::Command,
                    format!("Not migrating {} (PID {}): {}", record.name, pid, reason),
                );
                BalanceError::Migration(MigrationError::Ineligible(reason))
            })?;

        let source = match record.affinity.len() {
            1 => record.affinity.iter().next(),
            _ => None,
        };
        let proposal = Proposal {
            pid,
            name: record.name,
            source,
            destination,
        };

        Ok(
            AffinityMigrator::new(Arc::clone(&self.table), &self.ledger, &config, &self.events)
                .migrate(proposal)
                .await,
        )
    }

    /// Publish the busiest processes for display on the slow inventory tick.
    pub async fn publish_inventory(&self) -> Vec<ProcessRecord> {
        let config = self.config.clone();
        match self.inventory(&config, 0.0).await {
            Ok(inventory) => {
                let mut processes = inventory.records;
                processes.truncate(config.top_processes);
                self.events.emit(BalancerEvent::ProcessSnapshot {
                    processes: processes.clone(),
                });
                processes
            }
            Err(e) => {
                self.events
                    .warn(LogKind::Enumeration, format!("Process inventory failed: {}", e));
                Vec::new()
            }
        }
    }

    /// Inventory → selection → migration for one source/destination pair.
    async fn rebalance(
        &self,
        config: &BalancerConfig,
        snapshot: &CoreLoadSnapshot,
        source: CoreId,
        destination: CoreId,
    ) -> (BalancingDecision, Option<MigrationReport>) {
        let inventory = match self.inventory(config, config.min_cpu_percent).await {
            Ok(inventory) => inventory,
            Err(e) => {
                self.events.warn(
                    LogKind::Enumeration,
                    format!("Process enumeration failed, skipping migration: {}", e),
                );
                return (BalancingDecision::InventoryUnavailable, None);
            }
        };

        let source_load = snapshot.load(source).unwrap_or(0.0);
        let policy = EligibilityPolicy::new(config, &self.ledger, Instant::now());
        let selection = CandidateSelector::new(config, policy).select(
            &inventory.records,
            source,
            source_load,
            destination,
        );

        for reason in &selection.rejected {
            match reason {
                Ineligibility::ProtectedPriority { .. } | Ineligibility::RecentlyFailed { .. } => {
                    self.events
                        .info(LogKind::Decision, format!("Skipping: {}", reason))
                }
                _ => tracing::debug!(reason = %reason, "Candidate rejected"),
            }
        }

        let Some(candidate) = selection.chosen else {
            self.events.info(
                LogKind::NoCandidate,
                format!(
                    "No eligible process on {} ({} considered, {} rejected)",
                    source,
                    selection.considered,
                    selection.rejected.len()
                ),
            );
            return (
                BalancingDecision::NoCandidate {
                    source,
                    destination,
                },
                None,
            );
        };

        let pid = candidate.pid;
        let report = AffinityMigrator::new(Arc::clone(&self.table), &self.ledger, config, &self.events)
            .migrate(Proposal {
                pid,
                name: candidate.name,
                source: Some(source),
                destination,
            })
            .await;

        (
            BalancingDecision::Migrate {
                source,
                destination,
                pid,
            },
            Some(report),
        )
    }

    /// Sample per-core load, bounded by the tick interval.
    ///
    /// Failure or timeout degrades to an all-zero snapshot of the previous width.
    async fn sample(&self, config: &BalancerConfig) -> CoreLoadSnapshot {
        let limit = config.tick_interval;
        let sampler = Arc::clone(&self.sampler);

        let result =
            match tokio::time::timeout(limit, tokio::task::spawn_blocking(move || sampler.sample()))
                .await
            {
                Ok(Ok(result)) => result,
                Ok(Err(join)) => Err(SamplingError::Unavailable {
                    reason: join.to_string(),
                }),
                Err(_) => Err(SamplingError::Timeout { limit }),
            };

        match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let width = self
                    .history
                    .core_count()
                    .unwrap_or_else(|| self.sampler.core_count());
                self.events.warn(
                    LogKind::Sampling,
                    format!("Load sampling failed, assuming idle cores: {}", e),
                );
                CoreLoadSnapshot::zeroed(width)
            }
        }
    }

    /// Enumerate processes, bounded by the tick interval.
    async fn inventory(
        &self,
        config: &BalancerConfig,
        min_cpu_percent: f64,
    ) -> Result<Inventory, EnumerationError> {
        let limit = config.tick_interval;
        let table = Arc::clone(&self.table);

        let inventory = match tokio::time::timeout(
            limit,
            tokio::task::spawn_blocking(move || inventory::enumerate(table.as_ref(), min_cpu_percent)),
        )
        .await
        {
            Ok(Ok(result)) => result?,
            Ok(Err(join)) => {
                return Err(EnumerationError::Unavailable {
                    reason: join.to_string(),
                })
            }
            Err(_) => return Err(EnumerationError::Timeout { limit }),
        };

        if inventory.skipped > 0 {
            self.events.debug(
                LogKind::Enumeration,
                format!("{} processes could not be read", inventory.skipped),
            );
        }
        Ok(inventory)
    }
}
