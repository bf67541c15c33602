// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Rolling load history and the overload predictor built on top of it.

use std::collections::VecDeque;

use crate::types::{CoreId, CoreLoadSnapshot};

/// Snapshots retained for trend tracking.
pub const HISTORY_CAPACITY: usize = 20;

/// Snapshots averaged by the predictor.
pub const PREDICTION_WINDOW: usize = 5;

/// Percentage points below the high threshold at which a core's recent
/// average counts as trending toward saturation.
pub const PREDICTION_HEADROOM: f64 = 10.0;

/// Bounded FIFO of the most recent snapshots.
///
/// All entries share one core count. A snapshot with a different width
/// resets the history instead of mixing incompatible rows.
#[derive(Debug, Clone)]
pub struct LoadHistory {
    snapshots: VecDeque<CoreLoadSnapshot>,
    capacity: usize,
}

impl LoadHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            snapshots: VecDeque::with_capacity(capacity + 1),
            capacity: capacity.max(1),
        }
    }

    /// Append the newest snapshot, evicting the oldest past capacity.
    pub fn push(&mut self, snapshot: CoreLoadSnapshot) {
        if let Some(last) = self.snapshots.back() {
            if last.core_count() != snapshot.core_count() {
                tracing::warn!(
                    expected = last.core_count(),
                    actual = snapshot.core_count(),
                    "Core count changed, resetting load history"
                );
                self.snapshots.clear();
            }
        }

        self.snapshots.push_back(snapshot);
        while self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn latest(&self) -> Option<&CoreLoadSnapshot> {
        self.snapshots.back()
    }

    /// Core count of the retained snapshots, if any.
    pub fn core_count(&self) -> Option<usize> {
        self.latest().map(CoreLoadSnapshot::core_count)
    }

    /// The last `n` snapshots, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &CoreLoadSnapshot> {
        let skip = self.snapshots.len().saturating_sub(n);
        self.snapshots.iter().skip(skip)
    }

    /// Per-core arithmetic mean over the last `n` snapshots.
    ///
    /// Returns `None` when fewer than `n` snapshots are available.
    pub fn mean_of_recent(&self, n: usize) -> Option<Vec<f64>> {
        if n == 0 || self.snapshots.len() < n {
            return None;
        }

        let cores = self.core_count()?;
        let mut sums = vec![0.0; cores];
        for snapshot in self.recent(n) {
            for (sum, load) in sums.iter_mut().zip(snapshot.loads()) {
                *sum += load;
            }
        }
        Some(sums.into_iter().map(|s| s / n as f64).collect())
    }
}

impl Default for LoadHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Leading indicator of which core is heading for saturation.
///
/// Returns the lowest-index core whose mean over the last
/// [`PREDICTION_WINDOW`] snapshots exceeds `high_threshold - 10`, or `None`
/// when there is not enough history yet.
pub fn predict_overload(history: &LoadHistory, high_threshold: f64) -> Option<CoreId> {
    let means = history.mean_of_recent(PREDICTION_WINDOW)?;
    let limit = high_threshold - PREDICTION_HEADROOM;

    means
        .iter()
        .position(|&mean| mean > limit)
        .map(CoreId::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(loads: &[f64]) -> CoreLoadSnapshot {
        CoreLoadSnapshot::new(loads.to_vec())
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = LoadHistory::new();
        for i in 0..25 {
            history.push(snap(&[i as f64, 0.0]));
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);
        let oldest = history.recent(HISTORY_CAPACITY).next().unwrap();
        assert_eq!(oldest.loads()[0], 5.0);
        assert_eq!(history.latest().unwrap().loads()[0], 24.0);
    }

    #[test]
    fn test_history_resets_on_core_count_change() {
        let mut history = LoadHistory::new();
        history.push(snap(&[10.0, 20.0]));
        history.push(snap(&[10.0, 20.0]));
        history.push(snap(&[10.0, 20.0, 30.0]));
        assert_eq!(history.len(), 1);
        assert_eq!(history.core_count(), Some(3));
    }

    #[test]
    fn test_no_prediction_with_short_history() {
        let mut history = LoadHistory::new();
        for _ in 0..(PREDICTION_WINDOW - 1) {
            history.push(snap(&[100.0, 100.0, 100.0, 100.0]));
        }
        assert_eq!(predict_overload(&history, 70.0), None);
    }

    #[test]
    fn test_prediction_at_exactly_five_snapshots() {
        let mut history = LoadHistory::new();
        for load in [55.0, 60.0, 61.0, 64.0, 65.0] {
            history.push(snap(&[20.0, 20.0, 20.0, load]));
        }
        // Mean of core 3 is 61.0, above 70 - 10.
        assert_eq!(predict_overload(&history, 70.0), Some(CoreId::new(3)));
    }

    #[test]
    fn test_prediction_uses_only_recent_window() {
        let mut history = LoadHistory::new();
        for _ in 0..10 {
            history.push(snap(&[100.0, 0.0]));
        }
        for _ in 0..PREDICTION_WINDOW {
            history.push(snap(&[10.0, 0.0]));
        }
        assert_eq!(predict_overload(&history, 70.0), None);
    }

    #[test]
    fn test_prediction_boundary_is_exclusive() {
        let mut history = LoadHistory::new();
        for _ in 0..PREDICTION_WINDOW {
            history.push(snap(&[60.0, 0.0]));
        }
        assert_eq!(predict_overload(&history, 70.0), None);
    }

    #[test]
    fn test_prediction_lowest_index_wins() {
        let mut history = LoadHistory::new();
        for _ in 0..PREDICTION_WINDOW {
            history.push(snap(&[10.0, 90.0, 95.0]));
        }
        assert_eq!(predict_overload(&history, 70.0), Some(CoreId::new(1)));
    }
}
