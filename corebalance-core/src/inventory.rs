// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Process inventory: enumerate, drop idle processes, order by CPU share.

use std::cmp::Ordering;

use crate::error::EnumerationError;
use crate::platform::ProcessTable;
use crate::types::ProcessRecord;

/// Processes worth considering this tick.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    /// Sorted by CPU share, descending; ties keep enumeration order.
    pub records: Vec<ProcessRecord>,
    /// Processes that could not be read and were left out.
    pub skipped: usize,
}

/// Enumerate processes using at least `min_cpu_percent`, busiest first.
pub fn enumerate(
    table: &dyn ProcessTable,
    min_cpu_percent: f64,
) -> Result<Inventory, EnumerationError> {
    let listing = table.list()?;

    let mut records: Vec<ProcessRecord> = listing
        .records
        .into_iter()
        .filter(|r| r.cpu_percent >= min_cpu_percent)
        .collect();
    sort_by_cpu(&mut records);

    Ok(Inventory {
        records,
        skipped: listing.skipped,
    })
}

/// Stable sort by CPU share, descending. NaN shares sort last.
pub fn sort_by_cpu(records: &mut [ProcessRecord]) {
    records.sort_by(|a, b| cmp_cpu_desc(a.cpu_percent, b.cpu_percent));
}

pub(crate) fn cmp_cpu_desc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedHost;

    #[test]
    fn test_enumerate_filters_and_sorts() {
        let host = SimulatedHost::new(4);
        host.spawn(200, "idle-daemon", 0.5);
        host.spawn(201, "compiler", 40.0);
        host.spawn(202, "encoder", 85.0);
        host.spawn(203, "editor", 1.0);

        let inventory = enumerate(&host, 1.0).unwrap();
        let pids: Vec<u32> = inventory.records.iter().map(|r| r.pid.value()).collect();
        assert_eq!(pids, vec![202, 201, 203]);
    }

    #[test]
    fn test_ties_keep_enumeration_order() {
        let host = SimulatedHost::new(2);
        host.spawn(300, "a", 25.0);
        host.spawn(100, "b", 25.0);
        host.spawn(200, "c", 25.0);

        let inventory = enumerate(&host, 1.0).unwrap();
        let pids: Vec<u32> = inventory.records.iter().map(|r| r.pid.value()).collect();
        assert_eq!(pids, vec![300, 100, 200]);
    }

    #[test]
    fn test_partial_enumeration_reports_skipped() {
        let host = SimulatedHost::new(2);
        host.spawn(300, "a", 25.0);
        host.set_unreadable(3);

        let inventory = enumerate(&host, 1.0).unwrap();
        assert_eq!(inventory.records.len(), 1);
        assert_eq!(inventory.skipped, 3);
    }

    #[test]
    fn test_failed_enumeration() {
        let host = SimulatedHost::new(2);
        host.set_enumeration_fails(true);
        assert!(enumerate(&host, 1.0).is_err());
    }

    #[test]
    fn test_nan_sorts_last() {
        let mut values = [f64::NAN, 10.0, 50.0];
        values.sort_by(|a, b| cmp_cpu_desc(*a, *b));
        assert_eq!(values[0], 50.0);
        assert_eq!(values[1], 10.0);
        assert!(values[2].is_nan());
    }
}
