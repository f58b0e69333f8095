//! Property-based tests for statistics aggregation
//!
//! Run with: cargo test --test stats_props

use fruitscan::stats::{StatsSnapshot, StatsSummary};
use fruitscan::testing::sample_record;
use fruitscan::types::Label;
use proptest::prelude::*;

fn any_label() -> impl Strategy<Value = Label> {
    prop_oneof![
        Just(Label::Acceptable),
        Just(Label::Defective),
        Just(Label::Unknown),
        Just(Label::NoObject),
    ]
}

proptest! {
    /// INVARIANT: counters stay mutually consistent after every update
    #[test]
    fn summary_stays_consistent(labels in prop::collection::vec(any_label(), 0..300)) {
        let mut summary = StatsSummary::default();
        for label in &labels {
            summary.apply(&sample_record(*label));
            prop_assert!(summary.is_consistent(), "inconsistent: {:?}", summary);
        }
        prop_assert_eq!(summary.total_detections, labels.len() as u64);
    }

    /// INVARIANT: success rate is OK / objects, and 0 with no objects
    #[test]
    fn success_rate_matches_counts(labels in prop::collection::vec(any_label(), 0..300)) {
        let mut summary = StatsSummary::default();
        for label in &labels {
            summary.apply(&sample_record(*label));
        }

        let ok = labels.iter().filter(|l| **l == Label::Acceptable).count() as f64;
        let objects = labels.iter().filter(|l| l.is_object()).count() as f64;
        let expected = if objects == 0.0 { 0.0 } else { ok / objects };
        prop_assert!((summary.success_rate - expected).abs() < 1e-9);
        prop_assert!((0.0..=1.0).contains(&summary.success_rate));
    }

    /// INVARIANT: history never exceeds its cap and keeps the newest records
    #[test]
    fn history_is_capped_fifo(
        limit in 1usize..20,
        labels in prop::collection::vec(any_label(), 0..100),
    ) {
        let mut snapshot = StatsSnapshot::default();
        let mut ids = Vec::new();
        for label in &labels {
            let record = sample_record(*label);
            ids.push(record.id.clone());
            snapshot.apply(record, limit);
            prop_assert!(snapshot.history.len() <= limit);
        }

        let kept: Vec<_> = snapshot.history.iter().map(|r| r.id.clone()).collect();
        let start = ids.len().saturating_sub(limit);
        prop_assert_eq!(kept, ids[start..].to_vec());
        prop_assert_eq!(snapshot.summary.total_detections, labels.len() as u64);
    }
}
