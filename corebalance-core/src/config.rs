// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict validation.
//!
//! The same validation runs at boot and for every runtime threshold command,
//! so an invalid value is rejected before the live configuration changes.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BalanceError, BalanceResult, ConfigValidationError};

/// Process names that are never migrated, compared case-insensitively.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "system",
    "kernel",
    "init",
    "systemd",
    "systemd-logind",
    "systemd-journald",
    "systemd-udevd",
    "dbus-daemon",
    "login",
    "gdm",
    "sddm",
    "lightdm",
    "xorg",
    "gnome-shell",
    "plasmashell",
    "kwin_x11",
    "kwin_wayland",
    "kthreadd",
    "wininit",
    "services.exe",
    "explorer.exe",
    "csrss.exe",
    "lsass.exe",
    "winlogon.exe",
    "svchost.exe",
    "dwm.exe",
];

/// Raw balancer configuration as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBalancerConfig {
    #[serde(default = "default_high_threshold")]
    high_threshold: f64,
    #[serde(default = "default_low_threshold")]
    low_threshold: f64,
    #[serde(default = "default_min_gap")]
    min_gap: f64,
    #[serde(default = "default_min_cpu_percent")]
    min_cpu_percent: f64,
    #[serde(default = "default_cooldown_secs")]
    cooldown_secs: u64,
    #[serde(default = "default_tick_interval_ms")]
    tick_interval_ms: u64,
    #[serde(default = "default_inventory_interval_ms")]
    inventory_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    retry_backoff_ms: u64,
    #[serde(default = "default_auto_balance")]
    auto_balance: bool,
    #[serde(default = "default_pid_floor")]
    pid_floor: u32,
    #[serde(default)]
    denylist: Vec<String>,
    #[serde(default = "default_protect_nice")]
    protect_nice_at_or_below: i32,
    #[serde(default = "default_protect_margin")]
    protect_margin: f64,
    #[serde(default = "default_top_processes")]
    top_processes: usize,
}

fn default_high_threshold() -> f64 {
    70.0
}

fn default_low_threshold() -> f64 {
    30.0
}

fn default_min_gap() -> f64 {
    30.0
}

fn default_min_cpu_percent() -> f64 {
    1.0
}

fn default_cooldown_secs() -> u64 {
    15
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_inventory_interval_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_auto_balance() -> bool {
    true
}

fn default_pid_floor() -> u32 {
    10
}

fn default_protect_nice() -> i32 {
    -10
}

fn default_protect_margin() -> f64 {
    5.0
}

fn default_top_processes() -> usize {
    10
}

impl Default for RawBalancerConfig {
    fn default() -> Self {
        Self {
            high_threshold: default_high_threshold(),
            low_threshold: default_low_threshold(),
            min_gap: default_min_gap(),
            min_cpu_percent: default_min_cpu_percent(),
            cooldown_secs: default_cooldown_secs(),
            tick_interval_ms: default_tick_interval_ms(),
            inventory_interval_ms: default_inventory_interval_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            auto_balance: default_auto_balance(),
            pid_floor: default_pid_floor(),
            denylist: Vec::new(),
            protect_nice_at_or_below: default_protect_nice(),
            protect_margin: default_protect_margin(),
            top_processes: default_top_processes(),
        }
    }
}

/// Validated balancer configuration.
///
/// Cloned once at the start of every tick so a decision never observes a
/// half-applied command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalancerConfig {
    pub high_threshold: f64,
    pub low_threshold: f64,
    pub min_gap: f64,
    pub min_cpu_percent: f64,
    pub cooldown: Duration,
    pub tick_interval: Duration,
    pub inventory_interval: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub auto_balance: bool,
    pub pid_floor: u32,
    /// Lower-cased process names that are never migrated.
    pub denylist: Vec<String>,
    pub protect_nice_at_or_below: i32,
    pub protect_margin: f64,
    pub top_processes: usize,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        // The defaults are known-valid; validation only lower-cases the denylist.
        let raw = RawBalancerConfig::default();
        Self {
            high_threshold: raw.high_threshold,
            low_threshold: raw.low_threshold,
            min_gap: raw.min_gap,
            min_cpu_percent: raw.min_cpu_percent,
            cooldown: Duration::from_secs(raw.cooldown_secs),
            tick_interval: Duration::from_millis(raw.tick_interval_ms),
            inventory_interval: Duration::from_millis(raw.inventory_interval_ms),
            max_retries: raw.max_retries,
            retry_backoff: Duration::from_millis(raw.retry_backoff_ms),
            auto_balance: raw.auto_balance,
            pid_floor: raw.pid_floor,
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
            protect_nice_at_or_below: raw.protect_nice_at_or_below,
            protect_margin: raw.protect_margin,
            top_processes: raw.top_processes,
        }
    }
}

impl BalancerConfig {
    /// Copy with a new high threshold, rejected if it would not stay above low.
    pub fn with_high_threshold(&self, high: f64) -> Result<Self, ConfigValidationError> {
        check_percent("high_threshold", high)?;
        check_ordering(high, self.low_threshold)?;
        Ok(Self {
            high_threshold: high,
            ..self.clone()
        })
    }

    /// Copy with a new low threshold, rejected if high would not stay above it.
    pub fn with_low_threshold(&self, low: f64) -> Result<Self, ConfigValidationError> {
        check_percent("low_threshold", low)?;
        check_ordering(self.high_threshold, low)?;
        Ok(Self {
            low_threshold: low,
            ..self.clone()
        })
    }

    /// Case-insensitive denylist lookup.
    pub fn is_denylisted(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.denylist.iter().any(|entry| *entry == name)
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> BalanceResult<BalancerConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BalanceError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| BalanceError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> BalanceResult<BalancerConfig> {
        // An empty document means "all defaults".
        if content.trim().is_empty() {
            return Ok(Self::validate(RawBalancerConfig::default())?);
        }

        let raw: RawBalancerConfig =
            serde_yaml::from_str(content).map_err(|e| BalanceError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Ok(Self::validate(raw)?)
    }

    /// Validate raw configuration and convert to validated types.
    fn validate(raw: RawBalancerConfig) -> Result<BalancerConfig, ConfigValidationError> {
        check_percent("high_threshold", raw.high_threshold)?;
        check_percent("low_threshold", raw.low_threshold)?;
        check_percent("min_gap", raw.min_gap)?;
        check_ordering(raw.high_threshold, raw.low_threshold)?;

        if !raw.min_cpu_percent.is_finite() || raw.min_cpu_percent < 0.0 {
            return Err(ConfigValidationError::OutOfRange {
                field: "min_cpu_percent",
                value: raw.min_cpu_percent.to_string(),
                reason: "Must be a non-negative percentage".to_string(),
            });
        }

        check_range("cooldown_secs", raw.cooldown_secs, 1, 3600)?;
        check_range("tick_interval_ms", raw.tick_interval_ms, 100, 60_000)?;
        check_range("inventory_interval_ms", raw.inventory_interval_ms, 100, 60_000)?;
        check_range("max_retries", u64::from(raw.max_retries), 0, 10)?;
        check_range("retry_backoff_ms", raw.retry_backoff_ms, 0, 10_000)?;

        if raw.pid_floor == 0 {
            return Err(ConfigValidationError::OutOfRange {
                field: "pid_floor",
                value: "0".to_string(),
                reason: "PID floor must exclude at least the idle task".to_string(),
            });
        }

        if !raw.protect_margin.is_finite() || raw.protect_margin < 0.0 {
            return Err(ConfigValidationError::OutOfRange {
                field: "protect_margin",
                value: raw.protect_margin.to_string(),
                reason: "Must be a non-negative percentage".to_string(),
            });
        }

        if raw.top_processes == 0 {
            return Err(ConfigValidationError::OutOfRange {
                field: "top_processes",
                value: "0".to_string(),
                reason: "Must show at least one process".to_string(),
            });
        }

        let mut denylist: Vec<String> = DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect();
        for name in raw.denylist {
            let name = name.trim().to_lowercase();
            if name.is_empty() {
                return Err(ConfigValidationError::Empty { field: "denylist" });
            }
            if !denylist.contains(&name) {
                denylist.push(name);
            }
        }

        Ok(BalancerConfig {
            high_threshold: raw.high_threshold,
            low_threshold: raw.low_threshold,
            min_gap: raw.min_gap,
            min_cpu_percent: raw.min_cpu_percent,
            cooldown: Duration::from_secs(raw.cooldown_secs),
            tick_interval: Duration::from_millis(raw.tick_interval_ms),
            inventory_interval: Duration::from_millis(raw.inventory_interval_ms),
            max_retries: raw.max_retries,
            retry_backoff: Duration::from_millis(raw.retry_backoff_ms),
            auto_balance: raw.auto_balance,
            pid_floor: raw.pid_floor,
            denylist,
            protect_nice_at_or_below: raw.protect_nice_at_or_below,
            protect_margin: raw.protect_margin,
            top_processes: raw.top_processes,
        })
    }
}

fn check_percent(field: &'static str, value: f64) -> Result<(), ConfigValidationError> {
    if !(0.0..=100.0).contains(&value) {
        return Err(ConfigValidationError::OutOfRange {
            field,
            value: value.to_string(),
            reason: "Must be between 0 and 100".to_string(),
        });
    }
    Ok(())
}

fn check_ordering(high: f64, low: f64) -> Result<(), ConfigValidationError> {
    if high <= low {
        return Err(ConfigValidationError::HighNotAboveLow { high, low });
    }
    Ok(())
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigValidationError> {
    if !(min..=max).contains(&value) {
        return Err(ConfigValidationError::OutOfRange {
            field,
            value: value.to_string(),
            reason: format!("Must be between {} and {}", min, max),
        });
    }
    Ok(())
}
