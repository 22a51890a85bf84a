//! Loads persisted windows back for analysis.
//!
//! A month is usable only when both its splits and redemptions files
//! exist. Missing months are skipped with a warning and listed in
//! [`Analysis::gaps`]; no placeholder rows are fabricated for them, so the
//! cohort fold simply continues with the next month present.

use thiserror::Error;
use tracing::{info, warn};

use crate::event::EventKind;
use crate::metrics::{CohortFold, CohortState, MonthActivity, MonthlyMetrics};
use crate::store::{DataStore, StoreError};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("no {kind} data for {label}")]
    Missing { label: String, kind: EventKind },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LoadError {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing { .. })
    }
}

/// Result of folding every available month in order.
#[derive(Debug)]
pub struct Analysis {
    pub records: Vec<MonthlyMetrics>,
    /// Labels requested but not found on disk, in request order.
    pub gaps: Vec<String>,
    pub state: CohortState,
}

pub struct ReportLoader {
    store: DataStore,
}

impl ReportLoader {
    pub fn new(store: DataStore) -> Self {
        Self { store }
    }

    /// Read one month's splits and redemptions.
    pub fn load_month(&self, label: &str) -> Result<MonthActivity, LoadError> {
        let read = |kind: EventKind| -> Result<_, LoadError> {
            self.store
                .read_window(kind, label)?
                .ok_or_else(|| LoadError::Missing {
                    label: label.to_string(),
                    kind,
                })
        };
        let splits = read(EventKind::Split)?;
        let redemptions = read(EventKind::Redemption)?;
        Ok(MonthActivity::from_raw(label, &splits, &redemptions))
    }

    /// Fold the given labels chronologically, skipping absent months.
    pub fn analyze<I, L>(&self, labels: I) -> Result<Analysis, LoadError>
    where
        I: IntoIterator<Item = L>,
        L: AsRef<str>,
    {
        let mut fold = CohortFold::new();
        let mut gaps = Vec::new();

        for label in labels {
            let label = label.as_ref();
            match self.load_month(label) {
                Ok(activity) => {
                    let m = fold.push(&activity);
                    info!(
                        month = %label,
                        active = m.monthly_active_users,
                        new = m.new_users,
                        retention = format!("{:.1}%", m.retention_rate),
                        "month analyzed"
                    );
                }
                Err(e) if e.is_missing() => {
                    warn!(month = %label, reason = %e, "data not found, skipping month");
                    gaps.push(label.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        let (records, state) = fold.finish();
        Ok(Analysis {
            records,
            gaps,
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RawEvent;
    use serde_json::json;

    fn splits(wallets: &[&str]) -> Vec<RawEvent> {
        wallets
            .iter()
            .map(|w| serde_json::from_value(json!({ "stakeholder": w, "timestamp": "1", "amount": "1" })).unwrap())
            .collect()
    }

    fn redemptions(wallets: &[&str]) -> Vec<RawEvent> {
        wallets
            .iter()
            .map(|w| serde_json::from_value(json!({ "redeemer": w, "timestamp": "1", "payout": "1" })).unwrap())
            .collect()
    }

    fn seed(store: &DataStore, label: &str, s: &[&str], r: &[&str]) {
        store.write_window(EventKind::Split, label, &splits(s)).unwrap();
        store.write_window(EventKind::Redemption, label, &redemptions(r)).unwrap();
    }

    #[test]
    fn test_load_month_normalizes_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::new(dir.path());
        seed(&store, "2025-01", &["0xAB", "0xab"], &["0xCD"]);

        let loader = ReportLoader::new(store.clone());
        let m = loader.load_month("2025-01").unwrap();
        assert_eq!(m.total_splits, 2);
        assert!(m.splits.iter().all(|e| e.wallet == "0xab"));

        // Files keep upstream casing.
        let on_disk = store.read_window(EventKind::Split, "2025-01").unwrap().unwrap();
        assert_eq!(on_disk[0].0["stakeholder"], "0xAB");
    }

    #[test]
    fn test_half_present_month_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::new(dir.path());
        store.write_window(EventKind::Split, "2025-02", &splits(&["0x1"])).unwrap();

        let err = ReportLoader::new(store).load_month("2025-02").unwrap_err();
        match err {
            LoadError::Missing { label, kind } => {
                assert_eq!(label, "2025-02");
                assert_eq!(kind, EventKind::Redemption);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_analyze_skips_gaps_without_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::new(dir.path());
        seed(&store, "2025-01", &["0xA", "0xB"], &["0xB", "0xC"]);
        seed(&store, "2025-03", &["0xA", "0xD"], &[]);

        let analysis = ReportLoader::new(store)
            .analyze(["2025-01", "2025-02", "2025-03"])
            .unwrap();
        assert_eq!(analysis.gaps, vec!["2025-02".to_string()]);
        assert_eq!(analysis.records.len(), 2);
        assert_eq!(analysis.records[1].month, "2025-03");
        assert_eq!(analysis.records[1].new_users, 1);
        assert_eq!(analysis.records[1].retention_rate, 50.0);
        assert_eq!(analysis.state.all_seen.len(), 4);
    }

    #[test]
    fn test_corrupt_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::new(dir.path());
        seed(&store, "2025-01", &["0xA"], &[]);
        std::fs::write(store.window_path(EventKind::Redemption, "2025-01"), b"{not json").unwrap();

        let err = ReportLoader::new(store).analyze(["2025-01"]).unwrap_err();
        assert!(matches!(err, LoadError::Store(_)));
    }
}
