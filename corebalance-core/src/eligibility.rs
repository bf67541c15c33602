// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Eligibility policy: which processes may be moved at all.
//!
//! The same policy runs at selection time and again right before every
//! affinity write, so a process that changed in between is caught.

use std::time::Instant;

use crate::config::BalancerConfig;
use crate::cooldown::CooldownLedger;
use crate::error::Ineligibility;
use crate::types::{CoreId, ProcessRecord};

/// Eligibility rules evaluated against one configuration snapshot.
#[derive(Debug, Clone, Copy)]
pub struct EligibilityPolicy<'a> {
    config: &'a BalancerConfig,
    ledger: &'a CooldownLedger,
    now: Instant,
}

impl<'a> EligibilityPolicy<'a> {
    pub fn new(config: &'a BalancerConfig, ledger: &'a CooldownLedger, now: Instant) -> Self {
        Self {
            config,
            ledger,
            now,
        }
    }

    /// Check whether `record` may be pinned to `target`.
    ///
    /// Returns the first rule that rejects it.
    pub fn check(&self, record: &ProcessRecord, target: CoreId) -> Result<(), Ineligibility> {
        let pid = record.pid;

        if pid.is_kernel_idle() {
            return Err(Ineligibility::KernelIdle { pid });
        }

        if pid.value() < self.config.pid_floor {
            return Err(Ineligibility::ReservedPid {
                pid,
                floor: self.config.pid_floor,
            });
        }

        if let Some(age) = self
            .ledger
            .cooling_age(pid, self.config.cooldown, self.now)
        {
            return Err(Ineligibility::CoolingDown {
                pid,
                age,
                window: self.config.cooldown,
            });
        }

        if self.config.is_denylisted(&record.name) {
            return Err(Ineligibility::Denylisted {
                pid,
                name: record.name.clone(),
            });
        }

        if record.status.is_terminated() {
            return Err(Ineligibility::Terminated {
                pid,
                status: record.status.name(),
            });
        }

        if record.affinity.is_empty() {
            return Err(Ineligibility::ProtectedMask { pid });
        }

        if record.affinity.is_only(target) {
            return Err(Ineligibility::AlreadyPinned { pid, target });
        }

        Ok(())
    }

    /// Automatic selection also skips a process whose last migration failed
    /// in a way that would repeat, for one cooldown window. Explicit requests
    /// do not go through this check.
    pub fn check_backoff(&self, record: &ProcessRecord) -> Result<(), Ineligibility> {
        match self
            .ledger
            .failed_within(record.pid, self.config.cooldown, self.now)
        {
            Some(age) => Err(Ineligibility::RecentlyFailed {
                pid: record.pid,
                age,
                window: self.config.cooldown,
            }),
            None => Ok(()),
        }
    }

    pub fn is_eligible(&self, record: &ProcessRecord, target: CoreId) -> bool {
        self.check(record, target).is_ok()
    }
}
