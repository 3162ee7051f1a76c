//! Live vehicle counters for the counting phase.
//!
//! Input from the surveyor is deliberately permissive: anything that is not a
//! non-negative integer becomes 0 instead of an error, so counting is never
//! interrupted under time pressure.

use serde::Serialize;

use crate::model::{VehicleCategory, VehicleCounts};

/// Mutable counters, one per [`VehicleCategory`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VehicleTally {
    counts: VehicleCounts,
}

/// One bar of the vehicle distribution chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionRow {
    pub category: VehicleCategory,
    pub label: &'static str,
    pub count: u32,
    /// Share of the total in percent; 0 when nothing was counted.
    pub percentage: f64,
}

impl VehicleTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, category: VehicleCategory) {
        let count = self.counts.get_mut(category);
        *count = count.saturating_add(1);
    }

    /// Decrement, never going below zero.
    pub fn decrement(&mut self, category: VehicleCategory) {
        let count = self.counts.get_mut(category);
        *count = count.saturating_sub(1);
    }

    /// Overwrite a counter from raw text input.
    ///
    /// Non-numeric, negative or empty input is coerced to 0.
    pub fn set_direct(&mut self, category: VehicleCategory, raw: &str) {
        *self.counts.get_mut(category) = coerce_count(raw);
    }

    pub fn get(&self, category: VehicleCategory) -> u32 {
        self.counts.get(category)
    }

    /// Sum of all counters, computed on read.
    pub fn total(&self) -> u64 {
        self.counts.total()
    }

    /// Snapshot of the counters.
    pub fn counts(&self) -> VehicleCounts {
        self.counts
    }

    /// Per-category rows for the distribution chart.
    pub fn distribution(&self) -> Vec<DistributionRow> {
        distribution(&self.counts)
    }
}

/// Per-category rows for the distribution chart.
pub fn distribution(counts: &VehicleCounts) -> Vec<DistributionRow> {
    let total = counts.total();
    VehicleCategory::ALL
        .iter()
        .map(|&category| {
            let count = counts.get(category);
            let percentage = if total > 0 {
                f64::from(count) / total as f64 * 100.0
            } else {
                0.0
            };
            DistributionRow {
                category,
                label: category.label(),
                count,
                percentage,
            }
        })
        .collect()
}

fn coerce_count(raw: &str) -> u32 {
    raw.trim().parse::<u32>().unwrap_or(0)
}
