// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `corebal snapshot` command - One-shot view of per-core load and the
//! busiest processes.

use std::time::Duration;

use serde::Serialize;

use corebalance_core::inventory;
use corebalance_core::{CoreLoadSnapshot, LinuxHost, LoadSampler, ProcessRecord};

use super::run::print_processes;

/// CPU counters are deltas, so the first reading needs a second one.
const SETTLE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Serialize)]
struct Snapshot {
    cores: CoreLoadSnapshot,
    processes: Vec<ProcessRecord>,
}

pub async fn execute(top: usize, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let host = LinuxHost::new();

    // Prime process counters, then let both counters accumulate.
    let _ = inventory::enumerate(&host, 0.0);
    tokio::time::sleep(SETTLE_INTERVAL).await;

    let cores = host.sample()?;
    let mut processes = inventory::enumerate(&host, 0.0)?.records;
    processes.truncate(top);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&Snapshot { cores, processes })?
        );
        return Ok(());
    }

    println!("Per-core load:");
    for (core, load) in cores.loads().iter().enumerate() {
        println!("  cpu{:<3} {:>5.1}%  {}", core, load, bar(*load, 40));
    }
    if let (Some(busiest), Some(idlest)) = (cores.busiest(), cores.idlest()) {
        println!();
        println!("  Busiest: {}   Idlest: {}", busiest, idlest);
    }
    println!();
    println!("Top {} processes:", processes.len());
    print_processes(&processes);
    Ok(())
}

fn bar(load: f64, width: usize) -> String {
    let filled = ((load / 100.0) * width as f64).round() as usize;
    let filled = filled.min(width);
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}
