// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Periodic control loop and the command handle used to drive it.
//!
//! Automatic ticks and manual commands all go through one async mutex around
//! the [`Balancer`], so they never interleave. Stopping takes effect before
//! the next tick; a tick already running finishes its migration first.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::BalancerConfig;
use crate::cooldown::CooldownLedger;
use crate::engine::{Balancer, TickReport};
use crate::error::{BalanceError, BalanceResult};
use crate::events::{BalancerEvent, EventSink, LogKind};
use crate::migrator::MigrationReport;
use crate::types::ProcessId;

/// Running state of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopState {
    Stopped,
    Running,
    ShuttingDown,
}

/// Cloneable handle for commands into a spawned control loop.
#[derive(Clone)]
pub struct BalancerHandle {
    balancer: Arc<Mutex<Balancer>>,
    state: Arc<watch::Sender<LoopState>>,
    events: EventSink,
    ledger: Arc<CooldownLedger>,
}

impl BalancerHandle {
    /// Spawn the control loop in the stopped state.
    pub fn spawn(balancer: Balancer) -> (Self, JoinHandle<()>) {
        let events = balancer.events().clone();
        let ledger = Arc::clone(balancer.ledger());
        let balancer = Arc::new(Mutex::new(balancer));
        let (state_tx, state_rx) = watch::channel(LoopState::Stopped);

        let task = tokio::spawn(run_loop(Arc::clone(&balancer), state_rx));

        let handle = Self {
            balancer,
            state: Arc::new(state_tx),
            events,
            ledger,
        };
        (handle, task)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BalancerEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub fn is_monitoring(&self) -> bool {
        self.state() == LoopState::Running
    }

    pub fn ledger(&self) -> Arc<CooldownLedger> {
        Arc::clone(&self.ledger)
    }

    /// Snapshot of the live configuration.
    pub async fn config(&self) -> BalancerConfig {
        self.balancer.lock().await.config().clone()
    }

    pub fn start_monitoring(&self) {
        if self.transition(LoopState::Stopped, LoopState::Running) {
            self.events.info(LogKind::Lifecycle, "Monitoring started");
        }
    }

    pub fn stop_monitoring(&self) {
        if self.transition(LoopState::Running, LoopState::Stopped) {
            self.events.info(LogKind::Lifecycle, "Monitoring stopped");
        }
    }

    /// Stop the loop for good. The spawned task exits after any in-flight tick.
    pub fn shutdown(&self) {
        self.state.send_replace(LoopState::ShuttingDown);
        self.events.info(LogKind::Lifecycle, "Balancer shutting down");
    }

    pub async fn set_auto_balance(&self, enabled: bool) {
        self.balancer.lock().await.set_auto_balance(enabled);
    }

    pub async fn set_high_threshold(&self, high: f64) -> BalanceResult<()> {
        self.balancer.lock().await.set_high_threshold(high)
    }

    pub async fn set_low_threshold(&self, low: f64) -> BalanceResult<()> {
        self.balancer.lock().await.set_low_threshold(low)
    }

    /// Manual trigger. Requires monitoring to be active.
    pub async fn force_balance_now(&self) -> BalanceResult<TickReport> {
        self.require_monitoring()?;
        Ok(self.balancer.lock().await.force_balance().await)
    }

    /// Targeted migration. Requires monitoring to be active.
    pub async fn balance_process(&self, pid: ProcessId) -> BalanceResult<MigrationReport> {
        self.require_monitoring()?;
        self.balancer.lock().await.balance_process(pid).await
    }

    fn require_monitoring(&self) -> BalanceResult<()> {
        if self.is_monitoring() {
            Ok(())
        } else {
            self.events
                .warn(LogKind::Command, "Start monitoring before balancing");
            Err(BalanceError::NotMonitoring)
        }
    }

    fn transition(&self, from: LoopState, to: LoopState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }
}

async fn run_loop(balancer: Arc<Mutex<Balancer>>, mut state_rx: watch::Receiver<LoopState>) {
    loop {
        let state = *state_rx.borrow_and_update();
        match state {
            LoopState::ShuttingDown => break,
            LoopState::Running => {}
            LoopState::Stopped => {
                if state_rx.changed().await.is_err() {
                    break;
                }
                continue;
            }
        }

        let (tick_every, inventory_every) = {
            let guard = balancer.lock().await;
            (
                guard.config().tick_interval,
                guard.config().inventory_interval,
            )
        };

        let mut ticks = interval(tick_every);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut inventory_ticks = interval(inventory_every);
        inventory_ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if *state_rx.borrow() != LoopState::Running {
                        break;
                    }
                }
                _ = ticks.tick() => {
                    let report = balancer.lock().await.tick().await;
                    tracing::trace!(decision = ?report.decision, "Tick complete");
                }
                _ = inventory_ticks.tick() => {
                    balancer.lock().await.publish_inventory().await;
                }
            }
        }
    }

    tracing::debug!("Control loop exited");
}
