// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `corebal validate` command - Validate configuration file.

use corebalance_core::ConfigLoader;

pub async fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Trigger:");
            println!("  High Threshold:   {:.1}%", config.high_threshold);
            println!("  Low Threshold:    {:.1}%", config.low_threshold);
            println!("  Minimum Gap:      {:.1} points", config.min_gap);
            println!("  Auto-balance:     {}", config.auto_balance);
            println!();
            println!("Loop:");
            println!("  Tick Interval:    {}ms", config.tick_interval.as_millis());
            println!(
                "  Inventory Tick:   {}ms",
                config.inventory_interval.as_millis()
            );
            println!(
                "  Retries:          {} (backoff {}ms)",
                config.max_retries,
                config.retry_backoff.as_millis()
            );
            println!();
            println!("Eligibility:");
            println!("  Min CPU Share:    {:.1}%", config.min_cpu_percent);
            println!("  Cooldown:         {}s", config.cooldown.as_secs());
            println!("  PID Floor:        {}", config.pid_floor);
            println!(
                "  Priority Guard:   nice <= {} unless load > {:.1}%",
                config.protect_nice_at_or_below,
                config.high_threshold + config.protect_margin
            );
            println!("  Denylist ({}):", config.denylist.len());
            for name in &config.denylist {
                println!("    - {}", name);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
