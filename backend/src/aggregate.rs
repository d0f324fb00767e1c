//! Derived views over the record set.
//!
//! Aggregates mix revealed values with the public `public_aux1` fallback for records
//! that were never revealed. `fallback_count` says how many records did that; a
//! non-zero count means the numbers are not cryptographically verified.

use crate::models::{fnv1a, ConfidentialRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trailing window for `recent_activity`.
pub const RECENT_WINDOW_SECS: i64 = 60 * 60 * 24;

/// Side length of the intensity grid.
pub const GRID_SIDE: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total_reports: usize,
    pub verified_count: usize,
    pub avg_decibel: f64,
    pub max_decibel: u64,
    pub recent_activity: usize,
    pub fallback_count: usize,
}

pub fn compute_stats(records: &[ConfidentialRecord], now: DateTime<Utc>) -> AggregateStats {
    let total_reports = records.len();
    let verified_count = records.iter().filter(|r| r.verified).count();
    let fallback_count = records.iter().filter(|r| r.revealed_value.is_none()).count();

    let values: Vec<u64> = records.iter().map(ConfidentialRecord::effective_value).collect();
    let avg_decibel = if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<u64>() as f64 / values.len() as f64
    };
    let max_decibel = values.iter().copied().max().unwrap_or(0);

    let cutoff = now.timestamp() - RECENT_WINDOW_SECS;
    let recent_activity = records.iter().filter(|r| r.created_at > cutoff).count();

    AggregateStats {
        total_reports,
        verified_count,
        avg_decibel,
        max_decibel,
        recent_activity,
        fallback_count,
    }
}

/// Stats against the wall clock at call time.
pub fn compute_stats_now(records: &[ConfidentialRecord]) -> AggregateStats {
    compute_stats(records, Utc::now())
}

/// Coarse spatial intensity, row-major, each cell in `0..=100`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntensityGrid {
    pub side: usize,
    pub cells: Vec<u8>,
}

fn cell_for(location_hint: &str) -> usize {
    let cells = (GRID_SIDE * GRID_SIDE) as u64;
    let n = location_hint
        .strip_prefix("Area ")
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or_else(|| fnv1a(location_hint.as_bytes()));
    (n % cells) as usize
}

pub fn heatmap(records: &[ConfidentialRecord]) -> IntensityGrid {
    let n_cells = GRID_SIDE * GRID_SIDE;
    let mut sums = vec![0u64; n_cells];
    let mut counts = vec![0u64; n_cells];

    for r in records {
        let c = cell_for(&r.location_hint);
        sums[c] += r.effective_value();
        counts[c] += 1;
    }

    let means: Vec<f64> = sums
        .iter()
        .zip(&counts)
        .map(|(s, c)| if *c == 0 { 0.0 } else { *s as f64 / *c as f64 })
        .collect();
    let hottest = means.iter().copied().fold(0.0f64, f64::max);

    let cells = means
        .iter()
        .map(|m| if hottest > 0.0 { (m / hottest * 100.0).round() as u8 } else { 0 })
        .collect();

    IntensityGrid { side: GRID_SIDE, cells }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: &str, verified: Option<u64>, aux1: u32, created_at: i64, hint: &str) -> ConfidentialRecord {
        ConfidentialRecord {
            id: id.to_string(),
            label: id.to_string(),
            encrypted_value_handle: format!("h-{id}"),
            public_aux1: aux1,
            public_aux2: 0,
            description: String::new(),
            submitter: "0xalice".into(),
            created_at,
            verified: verified.is_some(),
            revealed_value: verified,
            location_hint: hint.to_string(),
        }
    }

    #[test]
    fn verified_values_with_fallback() {
        let now = Utc::now();
        let t = now.timestamp();
        let records = vec![
            record("a", Some(30), 1, t, "Area 1"),
            record("b", Some(45), 2, t, "Area 2"),
            record("c", Some(60), 3, t, "Area 3"),
            record("d", None, 50, t, "Area 4"),
        ];

        let s = compute_stats(&records, now);
        assert_eq!(s.total_reports, 4);
        assert_eq!(s.verified_count, 3);
        assert_eq!(s.fallback_count, 1);
        assert!((s.avg_decibel - 46.25).abs() < 1e-9);
        assert_eq!(s.max_decibel, 60);
    }

    #[test]
    fn recency_is_a_trailing_day() {
        let now = Utc::now();
        let records = vec![
            record("fresh", None, 1, now.timestamp(), "Area 0"),
            record("stale", None, 1, (now - Duration::hours(25)).timestamp(), "Area 0"),
        ];
        assert_eq!(compute_stats(&records, now).recent_activity, 1);

        // Same records, evaluated a day later.
        assert_eq!(compute_stats(&records, now + Duration::hours(24)).recent_activity, 0);
    }

    #[test]
    fn empty_set_has_zero_stats() {
        let s = compute_stats_now(&[]);
        assert_eq!(s.total_reports, 0);
        assert_eq!(s.avg_decibel, 0.0);
        assert_eq!(s.max_decibel, 0);
    }

    #[test]
    fn heatmap_scales_against_the_hottest_cell() {
        let t = Utc::now().timestamp();
        let records = vec![
            record("a", Some(80), 0, t, "Area 0"),
            record("b", Some(40), 0, t, "Area 25"),
            record("c", None, 20, t, "Area 7"),
        ];

        let grid = heatmap(&records);
        assert_eq!(grid.side, 5);
        assert_eq!(grid.cells.len(), 25);
        assert_eq!(grid.cells[0], 100); // mean of 80 and 40 is the max
        assert_eq!(grid.cells[7], 33);
        assert_eq!(grid.cells.iter().filter(|c| **c > 0).count(), 2);
    }

    #[test]
    fn heatmap_of_nothing_is_cold() {
        assert!(heatmap(&[]).cells.iter().all(|c| *c == 0));
    }
}
