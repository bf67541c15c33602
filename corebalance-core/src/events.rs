// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Outward events consumed by whatever presents the balancer.
//!
//! Every log event is also mirrored to `tracing` so a headless run is fully
//! narrated even when nobody subscribes.

use std::fmt;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::migrator::MigrationReport;
use crate::types::{now_millis, CoreId, CoreLoadSnapshot, ProcessRecord};

/// Default number of events buffered per subscriber.
pub const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

/// What a log line narrates, so observers can count outcomes without
/// parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogKind {
    Lifecycle,
    Command,
    Sampling,
    Enumeration,
    Decision,
    NoCandidate,
    Attempt,
    Retry,
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub severity: Severity,
    pub kind: LogKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub enum BalancerEvent {
    Log(LogEvent),
    /// Emitted once per tick.
    LoadUpdate {
        snapshot: CoreLoadSnapshot,
        predicted_overload: Option<CoreId>,
    },
    /// Emitted on the slower inventory tick.
    ProcessSnapshot { processes: Vec<ProcessRecord> },
    /// Terminal result of every migration attempt sequence.
    Migration(MigrationReport),
}

/// Cloneable broadcast sender for balancer events.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<BalancerEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BalancerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: BalancerEvent) {
        let _ = self.tx.send(event);
    }

    /// Publish a log line and mirror it to `tracing`.
    pub fn log(&self, severity: Severity, kind: LogKind, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Debug => tracing::debug!(kind = ?kind, "{}", message),
            Severity::Info => tracing::info!(kind = ?kind, "{}", message),
            Severity::Warning => tracing::warn!(kind = ?kind, "{}", message),
            Severity::Error => tracing::error!(kind = ?kind, "{}", message),
        }

        self.emit(BalancerEvent::Log(LogEvent {
            timestamp_ms: now_millis(),
            severity,
            kind,
            message,
        }));
    }

    pub fn debug(&self, kind: LogKind, message: impl Into<String>) {
        self.log(Severity::Debug, kind, message);
    }

    pub fn info(&self, kind: LogKind, message: impl Into<String>) {
        self.log(Severity::Info, kind, message);
    }

    pub fn warn(&self, kind: LogKind, message: impl Into<String>) {
        self.log(Severity::Warning, kind, message);
    }

    pub fn error(&self, kind: LogKind, message: impl Into<String>) {
        self.log(Severity::Error, kind, message);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(EVENT_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_reaches_subscriber() {
        let sink = EventSink::default();
        let mut rx = sink.subscribe();

        sink.warn(LogKind::Sampling, "sampling failed");

        match rx.try_recv().unwrap() {
            BalancerEvent::Log(event) => {
                assert_eq!(event.severity, Severity::Warning);
                assert_eq!(event.kind, LogKind::Sampling);
                assert_eq!(event.message, "sampling failed");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let sink = EventSink::new(4);
        sink.info(LogKind::Lifecycle, "nobody listening");
    }
}
