// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

use std::path::Path;

use corebalance_core::{BalanceResult, BalancerConfig, ConfigLoader};

pub mod balance;
pub mod run;
pub mod snapshot;
pub mod validate;

/// Picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "corebalance.yaml";

/// Load the configuration named on the command line.
///
/// Without `--config`, `./corebalance.yaml` is used when it exists and the
/// built-in defaults otherwise. An explicitly named file must exist.
pub fn load_config(path: Option<&str>) -> BalanceResult<BalancerConfig> {
    match path {
        Some(path) => ConfigLoader::load_file(path),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            ConfigLoader::load_file(DEFAULT_CONFIG_FILE)
        }
        None => {
            tracing::debug!("No configuration file, using defaults");
            Ok(BalancerConfig::default())
        }
    }
}

/// Affinity writes to other users' processes need root or CAP_SYS_NICE.
pub fn warn_if_unprivileged() {
    if !nix::unistd::geteuid().is_root() {
        tracing::warn!(
            "Not running as root: affinity changes to other users' processes will be denied"
        );
    }
}
