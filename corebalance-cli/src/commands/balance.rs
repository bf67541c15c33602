// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `corebal balance` command - Pin one process to the least-loaded core.

use std::sync::Arc;
use std::time::Duration;

use corebalance_core::{Balancer, EventSink, LinuxHost, ProcessId};

use super::{load_config, warn_if_unprivileged};

/// Lets the first CPU sample cover a real interval.
const SETTLE_INTERVAL: Duration = Duration::from_millis(500);

pub async fn execute(config_path: Option<&str>, pid: u32) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    warn_if_unprivileged();

    let host = Arc::new(LinuxHost::new());
    let mut balancer = Balancer::new(config, host.clone(), host, EventSink::default());
    tokio::time::sleep(SETTLE_INTERVAL).await;

    match balancer.balance_process(ProcessId::new(pid)).await {
        Ok(report) if report.is_committed() => {
            println!(
                "✓ {} (PID {}) pinned to {}",
                report.name, report.pid, report.destination
            );
            Ok(())
        }
        Ok(report) => {
            eprintln!(
                "✗ {} (PID {}) could not be moved after {} attempt(s)",
                report.name, report.pid, report.attempts
            );
            if let Some(e) = report.error {
                eprintln!("  {}", e);
            }
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            std::process::exit(1);
        }
    }
}
