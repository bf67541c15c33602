// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Prometheus counters fed from balancer events.

use lazy_static::lazy_static;
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    GaugeVec, Histogram, IntCounter, IntCounterVec,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use corebalance_core::{BalancerEvent, LogKind};

lazy_static! {
    pub static ref MIGRATIONS: IntCounterVec = register_int_counter_vec!(
        "corebalance_migrations_total",
        "Finished migrations by outcome",
        &["outcome"]
    )
    .expect("metric registration");
    pub static ref MIGRATION_ATTEMPTS: IntCounter = register_int_counter!(
        "corebalance_migration_attempts_total",
        "Affinity writes issued, retries included"
    )
    .expect("metric registration");
    pub static ref MIGRATION_DURATION: Histogram = register_histogram!(
        "corebalance_migration_duration_seconds",
        "Time from proposal to commit or failure",
        vec![0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0, 2.0] // Retries back off 0.5s each
    )
    .expect("metric registration");
    pub static ref NO_CANDIDATE: IntCounter = register_int_counter!(
        "corebalance_no_candidate_total",
        "Triggers that found no eligible process"
    )
    .expect("metric registration");
    pub static ref SAMPLING_FAILURES: IntCounter = register_int_counter!(
        "corebalance_sampling_failures_total",
        "Ticks that fell back to an idle snapshot"
    )
    .expect("metric registration");
    pub static ref CORE_LOAD: GaugeVec = register_gauge_vec!(
        "corebalance_core_load_percent",
        "Most recent utilization per core",
        &["core"]
    )
    .expect("metric registration");
}

/// Update counters from one event.
pub fn observe(event: &BalancerEvent) {
    match event {
        BalancerEvent::Migration(report) => {
            let outcome = if report.is_committed() {
                "committed"
            } else {
                "failed"
            };
            MIGRATIONS.with_label_values(&[outcome]).inc();
            MIGRATION_ATTEMPTS.inc_by(u64::from(report.attempts));
            MIGRATION_DURATION.observe(report.elapsed_ms as f64 / 1000.0);
        }
        BalancerEvent::LoadUpdate { snapshot, .. } => {
            for (core, load) in snapshot.loads().iter().enumerate() {
                CORE_LOAD.with_label_values(&[&core.to_string()]).set(*load);
            }
        }
        BalancerEvent::Log(log) => match log.kind {
            LogKind::NoCandidate => NO_CANDIDATE.inc(),
            LogKind::Sampling => SAMPLING_FAILURES.inc(),
            _ => {}
        },
        BalancerEvent::ProcessSnapshot { .. } => {}
    }
}

/// Start the metrics server in a background task.
pub fn start_metrics_server(port: u16) {
    // Force initialization of metrics
    lazy_static::initialize(&MIGRATIONS);
    lazy_static::initialize(&MIGRATION_ATTEMPTS);
    lazy_static::initialize(&MIGRATION_DURATION);
    lazy_static::initialize(&NO_CANDIDATE);
    lazy_static::initialize(&SAMPLING_FAILURES);
    lazy_static::initialize(&CORE_LOAD);

    tokio::spawn(async move {
        let addr = format!("0.0.0.0:{}", port);
        match TcpListener::bind(&addr).await {
            Ok(listener) => {
                tracing::info!("Metrics server listening on {}", addr);
                loop {
                    if let Ok((mut socket, _)) = listener.accept().await {
                        tokio::spawn(async move {
                            let body = render();
                            let response = format!(
                                "HTTP/1.0 200 OK\r\nConnection: close\r\nContent-Length: {}\r\nContent-Type: text/plain; version=0.0.4\r\n\r\n{}",
                                body.len(),
                                body
                            );
                            let _ = socket.write_all(response.as_bytes()).await;
                            let _ = socket.flush().await;
                        });
                    }
                }
            }
            Err(e) => {
                tracing::error!("Failed to bind metrics server: {}", e);
            }
        }
    });
}

fn render() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }

    String::from_utf8(buffer).unwrap_or_else(|_| String::from("Encoding error"))
}
