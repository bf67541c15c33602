// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `corebal run` command - Run the balancing loop in the foreground.
//!
//! Events are printed as they arrive; commands are read line by line from
//! stdin until `quit` or Ctrl+C.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use corebalance_core::{
    Balancer, BalancerEvent, BalancerHandle, CoreLoadSnapshot, EventSink, LinuxHost,
    LoadSampler, ProcessRecord, ProcessTable, SimulatedHost,
};

use super::{load_config, warn_if_unprivileged};
use crate::console::{ConsoleCommand, HELP};
use crate::metrics;

pub struct RunOptions {
    pub simulate: bool,
    pub json: bool,
    pub metrics_port: Option<u16>,
    pub paused: bool,
}

pub async fn execute(
    config_path: Option<&str>,
    options: RunOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    // Fail fast on invalid config
    let config = load_config(config_path)?;

    let (sampler, table): (Arc<dyn LoadSampler>, Arc<dyn ProcessTable>) = if options.simulate {
        tracing::info!("Running against a simulated machine");
        let host = Arc::new(SimulatedHost::demo());
        (host.clone() as Arc<dyn LoadSampler>, host as Arc<dyn ProcessTable>)
    } else {
        warn_if_unprivileged();
        let host = Arc::new(LinuxHost::new());
        (host.clone() as Arc<dyn LoadSampler>, host as Arc<dyn ProcessTable>)
    };

    tracing::info!(
        cores = sampler.core_count(),
        high = config.high_threshold,
        low = config.low_threshold,
        auto_balance = config.auto_balance,
        "Starting balancer"
    );

    let balancer = Balancer::new(config, sampler, table, EventSink::default());
    let (handle, task) = BalancerHandle::spawn(balancer);

    if let Some(port) = options.metrics_port {
        metrics::start_metrics_server(port);
    }

    let printer = tokio::spawn(print_events(handle.subscribe(), options.json));

    if !options.paused {
        handle.start_monitoring();
    }

    eprintln!("{}", HELP);
    eprintln!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match line.parse::<ConsoleCommand>() {
                    Ok(ConsoleCommand::Quit) => break,
                    Ok(command) => dispatch(&handle, command).await,
                    Err(e) => eprintln!("{}", e),
                },
                // Detached from a terminal: keep running until Ctrl+C
                None => stdin_open = false,
            },
        }
    }

    eprintln!("Shutting down...");
    handle.shutdown();
    let _ = task.await;
    printer.abort();

    Ok(())
}

async fn dispatch(handle: &BalancerHandle, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Start => handle.start_monitoring(),
        ConsoleCommand::Stop => handle.stop_monitoring(),
        ConsoleCommand::AutoBalance(enabled) => handle.set_auto_balance(enabled).await,
        ConsoleCommand::HighThreshold(high) => {
            if let Err(e) = handle.set_high_threshold(high).await {
                eprintln!("✗ {}", e);
            }
        }
        ConsoleCommand::LowThreshold(low) => {
            if let Err(e) = handle.set_low_threshold(low).await {
                eprintln!("✗ {}", e);
            }
        }
        ConsoleCommand::Force => match handle.force_balance_now().await {
            Ok(report) if report.decision.is_no_action() => {
                eprintln!("No migration: {:?}", report.decision)
            }
            Ok(_) => {}
            Err(e) => eprintln!("✗ {}", e),
        },
        ConsoleCommand::Balance(pid) => {
            if let Err(e) = handle.balance_process(pid).await {
                eprintln!("✗ {}", e);
            }
        }
        ConsoleCommand::Status => {
            let config = handle.config().await;
            eprintln!(
                "State: {:?} | auto-balance: {} | high {:.1}% low {:.1}% gap {:.1} | {} processes cooling down",
                handle.state(),
                config.auto_balance,
                config.high_threshold,
                config.low_threshold,
                config.min_gap,
                handle.ledger().len()
            );
        }
        ConsoleCommand::Help => eprintln!("{}", HELP),
        ConsoleCommand::Quit => {}
    }
}

async fn print_events(mut rx: tokio::sync::broadcast::Receiver<BalancerEvent>, json: bool) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                metrics::observe(&event);
                if json {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{}", line),
                        Err(e) => tracing::error!("Failed to encode event: {}", e),
                    }
                } else {
                    print_human(&event);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event printer fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Log events already reach the terminal through tracing.
fn print_human(event: &BalancerEvent) {
    match event {
        BalancerEvent::LoadUpdate {
            snapshot,
            predicted_overload,
        } => {
            let predicted = predicted_overload
                .map(|core| format!("  ▲ {}", core))
                .unwrap_or_default();
            println!("{}{}", load_line(snapshot), predicted);
        }
        BalancerEvent::ProcessSnapshot { processes } => print_processes(processes),
        BalancerEvent::Log(_) | BalancerEvent::Migration(_) => {}
    }
}

fn load_line(snapshot: &CoreLoadSnapshot) -> String {
    snapshot
        .loads()
        .iter()
        .enumerate()
        .map(|(core, load)| format!("cpu{} {:>5.1}%", core, load))
        .collect::<Vec<_>>()
        .join(" │ ")
}

pub(crate) fn print_processes(processes: &[ProcessRecord]) {
    println!(
        "{:>7}  {:<20} {:>7}  {:>5}  {:<10} {}",
        "PID", "NAME", "CPU%", "NICE", "STATUS", "AFFINITY"
    );
    for p in processes {
        println!(
            "{:>7}  {:<20} {:>7.1}  {:>5}  {:<10} {}",
            p.pid.value(),
            truncate(&p.name, 20),
            p.cpu_percent,
            p.nice.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string()),
            p.status.name(),
            p.affinity
        );
    }
}

fn truncate(name: &str, width: usize) -> String {
    if name.chars().count() <= width {
        name.to_string()
    } else {
        name.chars().take(width - 1).chain(std::iter::once('…')).collect()
    }
}
