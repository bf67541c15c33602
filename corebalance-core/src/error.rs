// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Error types for the balancer.
//!
//! Every error is an explicit enum variant. Errors raised while talking to
//! the OS are caught at the component boundary and turned into log events;
//! none of them is allowed to stop the control loop.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::{AffinityMask, CoreId, ProcessId};

/// Top-level error type for the balancer.
#[derive(Debug, Error)]
pub enum BalanceError {
    // =========================================================================
    // Configuration Errors - rejected before anything is mutated
    // =========================================================================
    #[error("Configuration validation error: {0}")]
    ConfigValidation(#[from] ConfigValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // OS Observation Errors - degrade, never abort
    // =========================================================================
    #[error("Sampling error: {0}")]
    Sampling(#[from] SamplingError),

    #[error("Enumeration error: {0}")]
    Enumeration(#[from] EnumerationError),

    // =========================================================================
    // Migration Errors
    // =========================================================================
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Process not found: {0}")]
    ProcessNotFound(ProcessId),

    #[error("Monitoring is not active")]
    NotMonitoring,

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Invalid configuration values, from a file or a runtime command.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigValidationError {
    #[error("High threshold {high} must be greater than low threshold {low}")]
    HighNotAboveLow { high: f64, low: f64 },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    OutOfRange {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Field {field} must not be empty")]
    Empty { field: &'static str },
}

/// Per-core load could not be read this tick.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SamplingError {
    #[error("CPU statistics unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("CPU sampling exceeded {}ms", .limit.as_millis())]
    Timeout { limit: Duration },

    #[error("Core count changed from {expected} to {actual}")]
    CoreCountChanged { expected: usize, actual: usize },
}

/// The process listing failed as a whole.
///
/// Individual processes that cannot be read are skipped and counted instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EnumerationError {
    #[error("Process table unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Process enumeration exceeded {}ms", .limit.as_millis())]
    Timeout { limit: Duration },
}

/// Failures reading or writing a single process's affinity.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AffinityError {
    #[error("Permission denied for PID {pid}")]
    PermissionDenied { pid: ProcessId },

    #[error("PID {pid} no longer exists")]
    ProcessVanished { pid: ProcessId },

    #[error("{pid} is a thread id, not a process")]
    NotAProcess { pid: ProcessId },

    #[error("PID {pid} has a special affinity set that must not be overwritten")]
    ProtectedMask { pid: ProcessId },

    #[error("Affinity call failed for PID {pid}: {reason}")]
    Os { pid: ProcessId, reason: String },
}

impl AffinityError {
    /// Permanent failures are never retried.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Self::Os { .. })
    }
}

/// Why a process was not eligible for migration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Ineligibility {
    #[error("PID {pid} is the kernel idle task")]
    KernelIdle { pid: ProcessId },

    #[error("PID {pid} is below the reserved floor {floor}")]
    ReservedPid { pid: ProcessId, floor: u32 },

    #[error("PID {pid} was migrated {}s ago (cooldown {}s)", .age.as_secs(), .window.as_secs())]
    CoolingDown {
        pid: ProcessId,
        age: Duration,
        window: Duration,
    },

    #[error("{name} (PID {pid}) is a protected system process")]
    Denylisted { pid: ProcessId, name: String },

    #[error("PID {pid} is {status}")]
    Terminated { pid: ProcessId, status: &'static str },

    #[error("PID {pid} is already pinned to {target}")]
    AlreadyPinned { pid: ProcessId, target: CoreId },

    #[error("PID {pid} has a special affinity set")]
    ProtectedMask { pid: ProcessId },

    #[error("PID {pid} runs at high priority (nice {nice}) and {core} is not overloaded enough")]
    ProtectedPriority {
        pid: ProcessId,
        nice: i32,
        core: CoreId,
    },

    #[error("Moving PID {pid} failed {}s ago (backoff {}s)", .age.as_secs(), .window.as_secs())]
    RecentlyFailed {
        pid: ProcessId,
        age: Duration,
        window: Duration,
    },
}

/// Terminal outcome of a failed migration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MigrationError {
    #[error("Not eligible: {0}")]
    Ineligible(#[from] Ineligibility),

    #[error("Permission denied changing affinity of PID {pid}")]
    PermissionDenied { pid: ProcessId },

    #[error("PID {pid} exited before migration completed")]
    ProcessVanished { pid: ProcessId },

    #[error("{pid} is a thread id, not a process")]
    NotAProcess { pid: ProcessId },

    #[error("PID {pid} has a special affinity set that must not be overwritten")]
    ProtectedMask { pid: ProcessId },

    #[error("Affinity call failed for PID {pid}: {reason}")]
    Os { pid: ProcessId, reason: String },

    #[error("Affinity of PID {pid} reads back as {actual}, expected {expected}")]
    VerificationMismatch {
        pid: ProcessId,
        expected: AffinityMask,
        actual: AffinityMask,
    },

    #[error("Migration of PID {pid} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        pid: ProcessId,
        attempts: u32,
        last: String,
    },

    #[error(transparent)]
    InvalidTransition(#[from] StateTransitionError),
}

impl MigrationError {
    /// Only OS hiccups and ignored writes are worth another attempt.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Self::Os { .. } | Self::VerificationMismatch { .. })
    }

    /// Failures that would repeat if the same process were picked again on
    /// the next tick.
    pub fn blocks_reselection(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. } | Self::ProtectedMask { .. } | Self::RetriesExhausted { .. }
        )
    }
}

impl From<AffinityError> for MigrationError {
    fn from(err: AffinityError) -> Self {
        match err {
            AffinityError::PermissionDenied { pid } => Self::PermissionDenied { pid },
            AffinityError::ProcessVanished { pid } => Self::ProcessVanished { pid },
            AffinityError::NotAProcess { pid } => Self::NotAProcess { pid },
            AffinityError::ProtectedMask { pid } => Self::ProtectedMask { pid },
            AffinityError::Os { pid, reason } => Self::Os { pid, reason },
        }
    }
}

/// Migration state machine errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateTransitionError {
    #[error("Cannot transition from {from} to {to} for PID {pid}")]
    InvalidTransition {
        pid: ProcessId,
        from: &'static str,
        to: &'static str,
    },
}

/// Result type alias using BalanceError.
pub type BalanceResult<T> = Result<T, BalanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation_error_display() {
        let err = ConfigValidationError::HighNotAboveLow {
            high: 30.0,
            low: 40.0,
        };
        assert!(err.to_string().contains("30"));
        assert!(err.to_string().contains("40"));
    }

    #[test]
    fn test_error_chain() {
        let err: BalanceError = ConfigValidationError::Empty { field: "denylist" }.into();
        assert!(matches!(err, BalanceError::ConfigValidation(_)));
    }

    #[test]
    fn test_affinity_error_classification() {
        let pid = ProcessId::new(4242);
        assert!(AffinityError::PermissionDenied { pid }.is_permanent());
        assert!(AffinityError::ProcessVanished { pid }.is_permanent());
        assert!(AffinityError::ProtectedMask { pid }.is_permanent());
        assert!(AffinityError::NotAProcess { pid }.is_permanent());
        assert!(!AffinityError::Os {
            pid,
            reason: "EAGAIN".to_string()
        }
        .is_permanent());
    }

    #[test]
    fn test_verification_mismatch_is_transient() {
        let err = MigrationError::VerificationMismatch {
            pid: ProcessId::new(4242),
            expected: AffinityMask::single(CoreId::new(1)),
            actual: AffinityMask::all(4),
        };
        assert!(!err.is_permanent());
        assert!(err.to_string().contains("0-3"));
    }

    #[test]
    fn test_affinity_errors_keep_their_class() {
        let pid = ProcessId::new(4242);
        let denied: MigrationError = AffinityError::PermissionDenied { pid }.into();
        assert!(denied.is_permanent());

        let os: MigrationError = AffinityError::Os {
            pid,
            reason: "EAGAIN".to_string(),
        }
        .into();
        assert!(!os.is_permanent());
    }

    #[test]
    fn test_reselection_blocked_only_by_repeatable_failures() {
        let pid = ProcessId::new(4242);
        assert!(MigrationError::PermissionDenied { pid }.blocks_reselection());
        assert!(MigrationError::RetriesExhausted {
            pid,
            attempts: 3,
            last: "EAGAIN".to_string(),
        }
        .blocks_reselection());
        assert!(!MigrationError::ProcessVanished { pid }.blocks_reselection());
        assert!(!MigrationError::Ineligible(Ineligibility::KernelIdle { pid }).blocks_reselection());
    }
}
