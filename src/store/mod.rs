//! Flat-file JSON store for collected records and derived metrics.
//!
//! Layout under `data_dir`:
//!   {splits|redemptions}_{label}.json  → JSON array of raw records for one window
//!   {splits|redemptions}_all.json      → every record collected in the last run
//!   metrics.json                       → JSON array of MonthlyMetrics
//!
//! Records are stored as the subgraph returned them (field names and
//! address casing untouched). Every write goes to a sibling temp file and
//! is renamed into place, so a reader never sees a partial file.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::event::{EventKind, RawEvent};
use crate::metrics::MonthlyMetrics;

const CUMULATIVE_LABEL: &str = "all";
const METRICS_FILE: &str = "metrics.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct DataStore {
    root: PathBuf,
}

impl DataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn window_path(&self, kind: EventKind, label: &str) -> PathBuf {
        self.root.join(format!("{}_{}.json", kind.file_prefix(), label))
    }

    pub fn cumulative_path(&self, kind: EventKind) -> PathBuf {
        self.window_path(kind, CUMULATIVE_LABEL)
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.root.join(METRICS_FILE)
    }

    /// Replace the file for one window.
    pub fn write_window(
        &self,
        kind: EventKind,
        label: &str,
        records: &[RawEvent],
    ) -> Result<PathBuf, StoreError> {
        let path = self.window_path(kind, label);
        self.write_json(&path, records)?;
        Ok(path)
    }

    pub fn write_cumulative(&self, kind: EventKind, records: &[RawEvent]) -> Result<PathBuf, StoreError> {
        let path = self.cumulative_path(kind);
        self.write_json(&path, records)?;
        Ok(path)
    }

    /// `Ok(None)` when the window was never collected.
    pub fn read_window(&self, kind: EventKind, label: &str) -> Result<Option<Vec<RawEvent>>, StoreError> {
        read_json(&self.window_path(kind, label))
    }

    pub fn write_metrics(&self, records: &[MonthlyMetrics]) -> Result<PathBuf, StoreError> {
        let path = self.metrics_path();
        self.write_json(&path, records)?;
        Ok(path)
    }

    pub fn read_metrics(&self) -> Result<Option<Vec<MonthlyMetrics>>, StoreError> {
        read_json(&self.metrics_path())
    }

    fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        std::fs::create_dir_all(&self.root).map_err(|e| StoreError::Io {
            path: self.root.clone(),
            source: e,
        })?;

        let mut bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        bytes.push(b'\n');

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &bytes).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;
        debug!(path = %path.display(), bytes = bytes.len(), "wrote file");
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let contents = match std::fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&contents)
        .map(Some)
        .map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
}
