//! Window-by-window collection of splits and redemptions.
//!
//! Each window is paged newest-first with a timestamp cursor rather than
//! `skip` offsets: the first page asks for `timestamp < period.end`.
//!
//! Records in one block share a timestamp, so a page break usually lands
//! inside an instant. A full page therefore keeps only the records newer
//! than its oldest timestamp `t` and the next page asks for
//! `timestamp < t + 1`, which returns the whole of `t` again. When an
//! entire full page is a single instant, that instant is read out with
//! `skip` offsets (`t <= timestamp < t + 1`) and the cursor moves to `t`.
//! The cursor strictly decreases either way, so paging terminates, and no
//! record is dropped or fetched twice as long as the subgraph orders ties
//! the same way on every query.
//!
//! Windows are atomic. After a window is fully fetched its file is written
//! and the run's cumulative file is rewritten; a crash loses at most the
//! window in flight, and re-running simply overwrites what is there.

use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CollectConfig;
use crate::event::{EventKind, RawEvent};
use crate::period::Period;
use crate::store::{DataStore, StoreError};
use crate::subgraph::{QueryOutcome, Sleeper, SubgraphClient, SubgraphError, Transport};

#[derive(Error, Debug)]
pub enum CollectError {
    #[error("{kind} window {window}: query for page {page} failed: {source}")]
    Query {
        kind: EventKind,
        window: String,
        page: usize,
        #[source]
        source: SubgraphError,
    },
    #[error("{kind} window {window}: malformed page {page}: {reason}")]
    MalformedPage {
        kind: EventKind,
        window: String,
        page: usize,
        reason: String,
    },
    #[error("{kind} window {window}: failed to persist: {source}")]
    Store {
        kind: EventKind,
        window: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub batch_size: usize,
    pub page_delay: Duration,
    pub window_delay: Duration,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            page_delay: Duration::from_millis(500),
            window_delay: Duration::from_secs(1),
        }
    }
}

impl From<&CollectConfig> for CollectorOptions {
    fn from(cfg: &CollectConfig) -> Self {
        Self {
            batch_size: cfg.batch_size.max(1),
            page_delay: Duration::from_millis(cfg.page_delay_ms),
            window_delay: Duration::from_millis(cfg.window_delay_ms),
        }
    }
}

/// Per-window record count from a collection run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSummary {
    pub label: String,
    pub records: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSummary {
    pub kind: EventKind,
    pub windows: Vec<WindowSummary>,
    pub total_records: usize,
}

/// GraphQL document for one page: `first` records of `kind` with
/// `start <= timestamp < cursor`, newest first, after skipping `skip`.
pub fn build_query(kind: EventKind, first: usize, skip: usize, start: i64, cursor: i64) -> String {
    let skip = if skip > 0 {
        format!("\n    skip: {skip},")
    } else {
        String::new()
    };
    format!(
        r#"{{
  {entity}(
    first: {first},{skip}
    where: {{timestamp_gte: {start}, timestamp_lt: {cursor}}},
    orderBy: timestamp,
    orderDirection: desc
  ) {{
    {wallet}
    timestamp
    {amount}
  }}
}}"#,
        entity = kind.entity(),
        wallet = kind.wallet_field(),
        amount = kind.amount_field(),
    )
}

pub struct Collector<T, S> {
    client: SubgraphClient<T, S>,
    store: DataStore,
    options: CollectorOptions,
}

impl<T: Transport, S: Sleeper> Collector<T, S> {
    pub fn new(client: SubgraphClient<T, S>, store: DataStore, options: CollectorOptions) -> Self {
        Self {
            client,
            store,
            options,
        }
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    /// Fetch every `kind` record in `period`, newest first.
    pub async fn collect_window(
        &self,
        period: &Period,
        kind: EventKind,
    ) -> Result<Vec<RawEvent>, CollectError> {
        let batch_size = self.options.batch_size.max(1);
        let mut records: Vec<RawEvent> = Vec::new();
        let mut cursor = period.end;
        let mut page = 0usize;

        loop {
            page += 1;
            let query = build_query(kind, batch_size, 0, period.start, cursor);
            debug!(kind = %kind, window = %period.label, page, cursor, total = records.len(), "fetching page");
            let Some(mut batch) = self.fetch_page(period, kind, &query, page).await? else {
                break;
            };
            if batch.is_empty() {
                break;
            }

            let oldest = match batch.last().and_then(RawEvent::timestamp) {
                Some(ts) if ts < cursor => ts,
                Some(ts) => {
                    let reason = format!("oldest timestamp {ts} is not below cursor {cursor}");
                    return Err(self.malformed(period, kind, page, reason));
                }
                None => {
                    let reason = "last record has no timestamp".to_string();
                    return Err(self.malformed(period, kind, page, reason));
                }
            };

            if batch.len() < batch_size {
                records.extend(batch);
                break;
            }

            // The page may have cut the oldest instant short. Drop that
            // instant here and start the next page at it again.
            let keep = batch
                .iter()
                .rposition(|r| r.timestamp() != Some(oldest))
                .map_or(0, |i| i + 1);
            if keep > 0 {
                batch.truncate(keep);
                records.extend(batch);
                cursor = oldest + 1;
            } else {
                // The whole page is one instant: read it out by offset.
                let complete = self
                    .collect_instant(period, kind, oldest, &mut page, &mut records)
                    .await?;
                if !complete {
                    break;
                }
                cursor = oldest;
            }

            self.client.sleeper().sleep(self.options.page_delay).await;
        }

        info!(kind = %kind, window = %period.label, records = records.len(), pages = page, "window collected");
        Ok(records)
    }

    /// Page through every record stamped exactly `instant` with `skip`
    /// offsets. Returns `false` if the subgraph cut the read short.
    async fn collect_instant(
        &self,
        period: &Period,
        kind: EventKind,
        instant: i64,
        page: &mut usize,
        records: &mut Vec<RawEvent>,
    ) -> Result<bool, CollectError> {
        let batch_size = self.options.batch_size.max(1);
        let mut skip = 0usize;

        loop {
            *page += 1;
            let query = build_query(kind, batch_size, skip, instant, instant + 1);
            debug!(kind = %kind, window = %period.label, page = *page, instant, skip, "fetching instant page");
            let Some(batch) = self.fetch_page(period, kind, &query, *page).await? else {
                return Ok(false);
            };
            let len = batch.len();
            records.extend(batch);
            if len < batch_size {
                return Ok(true);
            }
            skip += len;
            self.client.sleeper().sleep(self.options.page_delay).await;
        }
    }

    /// Run one page query. `Ok(None)` when the subgraph answered with
    /// GraphQL errors, which ends the window early.
    async fn fetch_page(
        &self,
        period: &Period,
        kind: EventKind,
        query: &str,
        page: usize,
    ) -> Result<Option<Vec<RawEvent>>, CollectError> {
        let outcome = self
            .client
            .query(query)
            .await
            .map_err(|source| CollectError::Query {
                kind,
                window: period.label.clone(),
                page,
                source,
            })?;

        match outcome {
            QueryOutcome::Data(data) => extract_page(&data, kind)
                .map(Some)
                .map_err(|reason| self.malformed(period, kind, page, reason)),
            QueryOutcome::Errors(errors) => {
                warn!(
                    kind = %kind,
                    window = %period.label,
                    page,
                    errors = ?errors,
                    "subgraph returned errors, ending window early"
                );
                Ok(None)
            }
        }
    }

    fn malformed(&self, period: &Period, kind: EventKind, page: usize, reason: String) -> CollectError {
        CollectError::MalformedPage {
            kind,
            window: period.label.clone(),
            page,
            reason,
        }
    }

    /// Collect `kind` over `periods` in order, persisting each window and
    /// the running cumulative set as soon as the window completes.
    pub async fn collect_all(
        &self,
        periods: &[Period],
        kind: EventKind,
    ) -> Result<CollectionSummary, CollectError> {
        let mut cumulative: Vec<RawEvent> = Vec::new();
        let mut windows = Vec::with_capacity(periods.len());

        for (i, period) in periods.iter().enumerate() {
            info!(kind = %kind, window = %period.label, index = i + 1, total = periods.len(), "collecting window");
            let records = self.collect_window(period, kind).await?;

            let store_err = |source| CollectError::Store {
                kind,
                window: period.label.clone(),
                source,
            };
            let path = self
                .store
                .write_window(kind, &period.label, &records)
                .map_err(store_err)?;
            windows.push(WindowSummary {
                label: period.label.clone(),
                records: records.len(),
            });
            cumulative.extend(records);
            self.store
                .write_cumulative(kind, &cumulative)
                .map_err(store_err)?;
            info!(
                kind = %kind,
                window = %period.label,
                path = %path.display(),
                cumulative = cumulative.len(),
                "window saved"
            );

            if i + 1 < periods.len() {
                self.client.sleeper().sleep(self.options.window_delay).await;
            }
        }

        Ok(CollectionSummary {
            kind,
            total_records: cumulative.len(),
            windows,
        })
    }
}

fn extract_page(data: &serde_json::Value, kind: EventKind) -> Result<Vec<RawEvent>, String> {
    let items = data
        .get(kind.entity())
        .ok_or_else(|| format!("response has no `{}` field", kind.entity()))?;
    serde_json::from_value(items.clone()).map_err(|e| format!("`{}` is not a list of records: {e}", kind.entity()))
}
