//! Polymarket wallet engagement metrics.
//!
//! Collects splits and redemptions from the activity subgraph window by
//! window, stores them as flat JSON files, and folds them month by month
//! into new/returning/cumulative wallet cohorts.

pub mod collector;
pub mod config;
pub mod event;
pub mod metrics;
pub mod period;
pub mod report;
pub mod store;
pub mod subgraph;
