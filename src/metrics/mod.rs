//! Monthly wallet engagement metrics.
//!
//! Tracks, per period:
//! - unique splitters / redeemers and how they overlap
//! - new wallets (first appearance ever) vs returning wallets
//! - retention rate and cumulative cohort sizes
//!
//! New-vs-returning depends on every earlier period, so metrics are a
//! strict left fold: [`process_month`] reads the [`CohortState`] as it
//! stood before the period and hands back the state after it. Feed periods
//! in chronological order, one at a time.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::event::{resolve_all, Event, EventKind, RawEvent};
use crate::period::month_name;

/// Every wallet seen so far, per activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CohortState {
    pub splitters_seen: HashSet<String>,
    pub redeemers_seen: HashSet<String>,
    pub all_seen: HashSet<String>,
}

impl CohortState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// One period of resolved activity, ready to aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthActivity {
    pub label: String,
    pub splits: Vec<Event>,
    pub redemptions: Vec<Event>,
    /// Raw record counts, including records without a usable wallet.
    pub total_splits: usize,
    pub total_redemptions: usize,
}

impl MonthActivity {
    pub fn from_raw(label: &str, splits: &[RawEvent], redemptions: &[RawEvent]) -> Self {
        Self {
            label: label.to_string(),
            splits: resolve_all(EventKind::Split, splits),
            redemptions: resolve_all(EventKind::Redemption, redemptions),
            total_splits: splits.len(),
            total_redemptions: redemptions.len(),
        }
    }

    pub fn from_events(label: &str, splits: Vec<Event>, redemptions: Vec<Event>) -> Self {
        Self {
            label: label.to_string(),
            total_splits: splits.len(),
            total_redemptions: redemptions.len(),
            splits,
            redemptions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyMetrics {
    pub month: String,
    pub month_name: String,
    pub unique_splitters: usize,
    pub unique_redeemers: usize,
    pub monthly_active_users: usize,
    pub split_and_redeemed: usize,
    pub only_split: usize,
    pub only_redeemed: usize,
    pub total_splits: usize,
    pub total_redemptions: usize,
    pub redeemer_splitter_ratio: f64,
    pub new_users: usize,
    pub new_splitters: usize,
    pub new_redeemers: usize,
    pub returning_users: usize,
    /// Percent, 0..=100.
    pub retention_rate: f64,
    pub cumulative_users: usize,
    pub cumulative_splitters: usize,
    pub cumulative_redeemers: usize,
}

fn wallets(events: &[Event]) -> HashSet<String> {
    events.iter().map(|e| e.wallet.clone()).collect()
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Aggregate one period against the cohort state that preceded it.
pub fn process_month(activity: &MonthActivity, prior: CohortState) -> (MonthlyMetrics, CohortState) {
    let splitters = wallets(&activity.splits);
    let redeemers = wallets(&activity.redemptions);

    let active: HashSet<&String> = splitters.union(&redeemers).collect();
    let both = splitters.intersection(&redeemers).count();

    let new_splitters = splitters.difference(&prior.splitters_seen).count();
    let new_redeemers = redeemers.difference(&prior.redeemers_seen).count();
    let new_users = active.iter().filter(|w| !prior.all_seen.contains(**w)).count();
    let monthly_active_users = active.len();
    let returning_users = monthly_active_users - new_users;

    let mut state = prior;
    state.all_seen.extend(active.iter().map(|w| (*w).clone()));
    state.splitters_seen.extend(splitters.iter().cloned());
    state.redeemers_seen.extend(redeemers.iter().cloned());

    let metrics = MonthlyMetrics {
        month: activity.label.clone(),
        month_name: month_name(&activity.label).unwrap_or_else(|| activity.label.clone()),
        unique_splitters: splitters.len(),
        unique_redeemers: redeemers.len(),
        monthly_active_users,
        split_and_redeemed: both,
        only_split: splitters.len() - both,
        only_redeemed: redeemers.len() - both,
        total_splits: activity.total_splits,
        total_redemptions: activity.total_redemptions,
        redeemer_splitter_ratio: ratio(redeemers.len(), splitters.len()),
        new_users,
        new_splitters,
        new_redeemers,
        returning_users,
        retention_rate: ratio(returning_users, monthly_active_users) * 100.0,
        cumulative_users: state.all_seen.len(),
        cumulative_splitters: state.splitters_seen.len(),
        cumulative_redeemers: state.redeemers_seen.len(),
    };
    (metrics, state)
}

/// Owns the cohort state across a chronological run of periods.
#[derive(Debug, Default)]
pub struct CohortFold {
    state: CohortState,
    records: Vec<MonthlyMetrics>,
}

impl CohortFold {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a previously accumulated state.
    pub fn with_state(state: CohortState) -> Self {
        Self {
            state,
            records: Vec::new(),
        }
    }

    /// Aggregate the next period in order.
    pub fn push(&mut self, activity: &MonthActivity) -> &MonthlyMetrics {
        let (metrics, state) = process_month(activity, std::mem::take(&mut self.state));
        self.state = state;
        self.records.push(metrics);
        &self.records[self.records.len() - 1]
    }

    pub fn state(&self) -> &CohortState {
        &self.state
    }

    pub fn records(&self) -> &[MonthlyMetrics] {
        &self.records
    }

    pub fn finish(self) -> (Vec<MonthlyMetrics>, CohortState) {
        (self.records, self.state)
    }
}

/// Fold a chronological sequence of periods from an empty state.
pub fn fold_months<'a>(months: impl IntoIterator<Item = &'a MonthActivity>) -> Vec<MonthlyMetrics> {
    let mut fold = CohortFold::new();
    for month in months {
        fold.push(month);
    }
    fold.finish().0
}

/// Headline numbers over a metrics sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub months: usize,
    /// Sum of monthly active wallets (a wallet active in two months counts twice).
    pub total_active: usize,
    pub total_new_users: usize,
    /// Cumulative unique wallets as of the last period.
    pub cumulative_users: usize,
    pub avg_retention_rate: f64,
    pub avg_redeemer_splitter_ratio: f64,
    pub best_acquisition: Option<(String, usize)>,
    pub best_retention: Option<(String, f64)>,
    pub peak_redemptions: Option<(String, usize)>,
}

/// First record holding the maximum of `key`.
fn first_max<T: PartialOrd + Copy>(
    records: &[MonthlyMetrics],
    key: impl Fn(&MonthlyMetrics) -> T,
) -> Option<(String, T)> {
    let mut best: Option<(&MonthlyMetrics, T)> = None;
    for r in records {
        let v = key(r);
        if best.map_or(true, |(_, b)| v > b) {
            best = Some((r, v));
        }
    }
    best.map(|(r, v)| (r.month_name.clone(), v))
}

impl MetricsSummary {
    pub fn from_records(records: &[MonthlyMetrics]) -> Self {
        let n = records.len();
        let mean = |f: fn(&MonthlyMetrics) -> f64| {
            if n == 0 {
                0.0
            } else {
                records.iter().map(f).sum::<f64>() / n as f64
            }
        };
        Self {
            months: n,
            total_active: records.iter().map(|r| r.monthly_active_users).sum(),
            total_new_users: records.iter().map(|r| r.new_users).sum(),
            cumulative_users: records.last().map_or(0, |r| r.cumulative_users),
            avg_retention_rate: mean(|r| r.retention_rate),
            avg_redeemer_splitter_ratio: mean(|r| r.redeemer_splitter_ratio),
            best_acquisition: first_max(records, |r| r.new_users),
            best_retention: first_max(records, |r| r.retention_rate),
            peak_redemptions: first_max(records, |r| r.unique_redeemers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ev(kind: EventKind, wallet: &str) -> Event {
        Event {
            kind,
            wallet: wallet.to_ascii_lowercase(),
            timestamp: Some(0),
            amount: 0,
        }
    }

    fn month(label: &str, splitters: &[&str], redeemers: &[&str]) -> MonthActivity {
        MonthActivity::from_events(
            label,
            splitters.iter().map(|w| ev(EventKind::Split, w)).collect(),
            redeemers.iter().map(|w| ev(EventKind::Redemption, w)).collect(),
        )
    }

    #[test]
    fn test_two_month_scenario() {
        let m1 = month("2025-01", &["A", "B"], &["B", "C"]);
        let m2 = month("2025-02", &["A", "D"], &[]);

        let (r1, state) = process_month(&m1, CohortState::new());
        assert_eq!(r1.month_name, "January");
        assert_eq!(r1.unique_splitters, 2);
        assert_eq!(r1.unique_redeemers, 2);
        assert_eq!(r1.monthly_active_users, 3);
        assert_eq!(r1.split_and_redeemed, 1);
        assert_eq!(r1.only_split, 1);
        assert_eq!(r1.only_redeemed, 1);
        assert_eq!(r1.new_users, 3);
        assert_eq!(r1.returning_users, 0);
        assert_eq!(r1.retention_rate, 0.0);
        assert_eq!(r1.redeemer_splitter_ratio, 1.0);
        assert_eq!(r1.cumulative_users, 3);

        let (r2, state) = process_month(&m2, state);
        assert_eq!(r2.new_users, 1);
        assert_eq!(r2.returning_users, 1);
        assert_eq!(r2.retention_rate, 50.0);
        assert_eq!(r2.new_splitters, 1);
        assert_eq!(r2.new_redeemers, 0);
        assert_eq!(r2.redeemer_splitter_ratio, 0.0);
        assert_eq!(r2.cumulative_users, 4);
        assert_eq!(r2.cumulative_splitters, 3);
        assert_eq!(r2.cumulative_redeemers, 2);
        assert_eq!(state.all_seen.len(), 4);
    }

    #[test]
    fn test_order_sensitivity() {
        let a = month("2025-01", &["0xshared", "0xa"], &[]);
        let b = month("2025-02", &["0xshared"], &["0xb"]);

        let in_order = fold_months([&a, &b]);
        let alone = fold_months([&b]);
        assert_eq!(in_order[1].new_users, 1);
        assert_eq!(alone[0].new_users, 2);

        // Reversed order counts the shared wallet as new in B instead of A.
        let reversed = fold_months([&b, &a]);
        assert_eq!(reversed[1].new_users, 1);
        assert_eq!(reversed[1].returning_users, 1);
    }

    #[test]
    fn test_seeded_prior_state() {
        let mut prior = CohortState::new();
        prior.splitters_seen.insert("0xold".into());
        prior.all_seen.insert("0xold".into());

        let m = month("2025-06", &[], &["0xOLD"]);
        let (r, state) = process_month(&m, prior);
        // Seen as a splitter, never as a redeemer.
        assert_eq!(r.new_users, 0);
        assert_eq!(r.new_redeemers, 1);
        assert_eq!(r.new_splitters, 0);
        assert_eq!(r.retention_rate, 100.0);
        assert!(state.redeemers_seen.contains("0xold"));
    }

    #[test]
    fn test_empty_month() {
        let (r, state) = process_month(&month("2025-03", &[], &[]), CohortState::new());
        assert_eq!(r.monthly_active_users, 0);
        assert_eq!(r.retention_rate, 0.0);
        assert_eq!(r.redeemer_splitter_ratio, 0.0);
        assert_eq!(state, CohortState::new());
    }

    #[test]
    fn test_raw_counts_include_walletless_records() {
        let splits: Vec<RawEvent> = serde_json::from_value(serde_json::json!([
            { "stakeholder": "0xAA", "timestamp": "1" },
            { "stakeholder": "0xaa", "timestamp": "2" },
            { "timestamp": "3" }
        ]))
        .unwrap();
        let m = MonthActivity::from_raw("2025-04", &splits, &[]);
        let (r, _) = process_month(&m, CohortState::new());
        assert_eq!(r.total_splits, 3);
        assert_eq!(r.unique_splitters, 1);
    }

    #[test]
    fn test_timestampless_records_still_count_wallets() {
        let splits: Vec<RawEvent> = serde_json::from_value(serde_json::json!([
            { "stakeholder": "0xAA", "timestamp": "1" },
            { "stakeholder": "0xBB" }
        ]))
        .unwrap();
        let redemptions: Vec<RawEvent> =
            serde_json::from_value(serde_json::json!([{ "redeemer": "0xbb", "timestamp": null }])).unwrap();
        let m = MonthActivity::from_raw("2025-05", &splits, &redemptions);
        let (r, state) = process_month(&m, CohortState::new());
        assert_eq!(r.unique_splitters, 2);
        assert_eq!(r.unique_redeemers, 1);
        assert_eq!(r.split_and_redeemed, 1);
        assert!(state.redeemers_seen.contains("0xbb"));
    }

    #[test]
    fn test_fold_matches_manual_chain() {
        let months = vec![
            month("2025-01", &["a", "b"], &["c"]),
            month("2025-02", &["b"], &["d"]),
            month("2025-03", &["e"], &["a"]),
        ];
        let mut state = CohortState::new();
        let mut manual = Vec::new();
        for m in &months {
            let (r, next) = process_month(m, state);
            manual.push(r);
            state = next;
        }
        let mut fold = CohortFold::new();
        for m in &months {
            fold.push(m);
        }
        assert_eq!(fold.records(), manual.as_slice());
        assert_eq!(fold.state(), &state);
    }

    #[test]
    fn test_summary() {
        let months = vec![
            month("2025-01", &["a", "b"], &["c"]),
            month("2025-02", &["a"], &["d", "e"]),
            month("2025-03", &["a"], &["b"]),
        ];
        let records = fold_months(&months);
        let s = MetricsSummary::from_records(&records);
        assert_eq!(s.months, 3);
        assert_eq!(s.total_active, 3 + 3 + 2);
        assert_eq!(s.total_new_users, 5);
        assert_eq!(s.cumulative_users, 5);
        assert_eq!(s.best_acquisition, Some(("January".to_string(), 3)));
        assert_eq!(s.best_retention, Some(("March".to_string(), 100.0)));
        assert_eq!(s.peak_redemptions, Some(("February".to_string(), 2)));

        let empty = MetricsSummary::from_records(&[]);
        assert_eq!(empty.avg_retention_rate, 0.0);
        assert_eq!(empty.best_acquisition, None);
    }

    fn wallet_months() -> impl Strategy<Value = Vec<(Vec<u8>, Vec<u8>)>> {
        prop::collection::vec(
            (
                prop::collection::vec(0u8..20, 0..12),
                prop::collection::vec(0u8..20, 0..12),
            ),
            1..6,
        )
    }

    proptest! {
        #[test]
        fn prop_partition_and_bounds(months in wallet_months()) {
            let activities: Vec<MonthActivity> = months
                .iter()
                .enumerate()
                .map(|(i, (s, r))| {
                    let s: Vec<String> = s.iter().map(|w| format!("0x{w:02x}")).collect();
                    let r: Vec<String> = r.iter().map(|w| format!("0x{w:02x}")).collect();
                    let s: Vec<&str> = s.iter().map(String::as_str).collect();
                    let r: Vec<&str> = r.iter().map(String::as_str).collect();
                    month(&format!("m{i}"), &s, &r)
                })
                .collect();

            let mut previous_cumulative = 0;
            for r in fold_months(&activities) {
                prop_assert_eq!(r.only_split + r.only_redeemed + r.split_and_redeemed, r.monthly_active_users);
                prop_assert_eq!(r.only_split + r.split_and_redeemed, r.unique_splitters);
                prop_assert_eq!(r.new_users + r.returning_users, r.monthly_active_users);
                prop_assert!(r.retention_rate >= 0.0 && r.retention_rate <= 100.0);
                if r.monthly_active_users == 0 {
                    prop_assert_eq!(r.retention_rate, 0.0);
                }
                prop_assert_eq!(r.cumulative_users, previous_cumulative + r.new_users);
                previous_cumulative = r.cumulative_users;
            }
        }
    }
}
