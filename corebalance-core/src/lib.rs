//! CoreBalance Core Library
//!
//! Balancing decision engine for the CoreBalance CPU affinity balancer.
//! Provides load sampling and trend tracking, overload prediction, process
//! eligibility and candidate selection, verified affinity migration with
//! retries, cooldown bookkeeping, and the periodic control loop.

pub mod config;
pub mod controller;
pub mod cooldown;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod inventory;
#[cfg(target_os = "linux")]
pub mod linux;
pub mod migrator;
pub mod platform;
pub mod selector;
pub mod sim;
pub mod types;

// Re-export commonly used types
pub use config::{BalancerConfig, ConfigLoader};
pub use controller::{BalancerHandle, LoopState};
pub use cooldown::CooldownLedger;
pub use engine::{evaluate, Balancer, BalancingDecision, HoldReason, TickReport, TriggerDecision};
pub use error::{
    AffinityError, BalanceError, BalanceResult, ConfigValidationError, EnumerationError,
    Ineligibility, MigrationError, SamplingError,
};
pub use events::{BalancerEvent, EventSink, LogEvent, LogKind, Severity};
pub use history::{predict_overload, LoadHistory};
#[cfg(target_os = "linux")]
pub use linux::LinuxHost;
pub use migrator::{MigrationReport, MigrationState};
pub use platform::{LoadSampler, ProcessTable};
pub use sim::SimulatedHost;
pub use types::{AffinityMask, CoreId, CoreLoadSnapshot, ProcessId, ProcessRecord, ProcessStatus};
