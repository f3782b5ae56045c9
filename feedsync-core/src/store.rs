//! Local persistence for dataset artifacts and their metadata sidecars.
//!
//! Layout: `{data_dir}/{key}.csv` plus `{data_dir}/{key}.meta.json`
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Date normalization on every load and save (day precision, no timezone)
//! - Quarantine for corrupt artifacts ({filename}.quarantined)
//! - Sidecar carries the poll clock (`last_checked`) plus a content summary
//!
//! Both stores are passive adapters: they never decide WHEN to mutate, only
//! HOW. The sync engine owns all mutation decisions.

use crate::table::{parse_day, Row, Table};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Structured error types for local storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no dataset artifact for key '{key}'")]
    Missing { key: String },

    #[error("corrupt dataset artifact for key '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    #[error("store I/O error: {0}")]
    Io(String),
}

/// Path of the dataset artifact for a key.
pub fn dataset_path(data_dir: &Path, key: &str) -> PathBuf {
    data_dir.join(format!("{key}.csv"))
}

/// Path of the metadata sidecar for a key.
pub fn meta_path(data_dir: &Path, key: &str) -> PathBuf {
    data_dir.join(format!("{key}.meta.json"))
}

/// Write bytes to `path` atomically: write a sibling .tmp, rename into place.
///
/// A reader never observes a half-written artifact.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        e
    })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

// ── Dataset store ───────────────────────────────────────────────────

/// CSV-backed store for date-indexed tables, one artifact per key.
pub struct DatasetStore {
    data_dir: PathBuf,
}

impl DatasetStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path(&self, key: &str) -> PathBuf {
        dataset_path(&self.data_dir, key)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path(key).exists()
    }

    /// Load and normalize the artifact for `key`.
    ///
    /// A missing file is `StoreError::Missing`. Any parse failure quarantines
    /// the file (renamed `*.quarantined`) and returns `StoreError::Corrupt`,
    /// so a later save starts from a clean slate. Callers treat both cases
    /// as "absent".
    pub fn load(&self, key: &str) -> Result<Table, StoreError> {
        let path = self.path(key);
        if !path.exists() {
            return Err(StoreError::Missing {
                key: key.to_string(),
            });
        }

        let content = fs::read_to_string(&path).map_err(|e| StoreError::Io(format!("read: {e}")))?;
        match parse_csv(&content) {
            Ok(table) => Ok(table),
            Err(reason) => {
                let quarantine = path.with_extension("csv.quarantined");
                eprintln!(
                    "WARNING: quarantining corrupt dataset artifact {}: {reason}",
                    path.display()
                );
                let _ = fs::rename(&path, &quarantine);
                Err(StoreError::Corrupt {
                    key: key.to_string(),
                    reason,
                })
            }
        }
    }

    /// Atomically overwrite the artifact for `key`.
    ///
    /// Dates are serialized `%Y-%m-%d`; absent cells are written empty so the
    /// merge stays field-agnostic across loads.
    pub fn save(&self, key: &str, table: &Table) -> Result<(), StoreError> {
        let bytes = write_csv(table).map_err(|e| StoreError::Io(format!("encode csv: {e}")))?;
        atomic_write(&self.path(key), &bytes).map_err(|e| StoreError::Io(format!("write: {e}")))
    }

    /// Remove the artifact for `key` (cache invalidation). Missing is fine.
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(format!("remove: {e}"))),
        }
    }
}

fn parse_csv(content: &str) -> Result<Table, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| format!("read header: {e}"))?
        .clone();
    let date_col = headers
        .iter()
        .position(|h| h == "date")
        .ok_or_else(|| "missing 'date' column".to_string())?;

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| format!("row {line}: {e}"))?;
        let date_text = record
            .get(date_col)
            .ok_or_else(|| format!("row {line}: no date cell"))?;
        let date = parse_day(date_text)
            .ok_or_else(|| format!("row {line}: unparseable date '{date_text}'"))?;

        let mut row = Row::new(date);
        for (i, cell) in record.iter().enumerate() {
            if i == date_col {
                continue;
            }
            let cell = cell.trim();
            if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
                continue;
            }
            let value: f64 = cell
                .parse()
                .map_err(|_| format!("row {line}: non-numeric cell '{cell}'"))?;
            let name = headers
                .get(i)
                .ok_or_else(|| format!("row {line}: cell beyond header"))?;
            row.values.insert(name.to_string(), value);
        }
        rows.push(row);
    }

    Ok(Table::from_rows(rows))
}

fn write_csv(table: &Table) -> Result<Vec<u8>, csv::Error> {
    let columns = table.columns();
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec!["date".to_string()];
    header.extend(columns.iter().cloned());
    writer.write_record(&header)?;

    for row in table.rows() {
        let mut record = vec![row.date.format("%Y-%m-%d").to_string()];
        for col in &columns {
            match row.values.get(col) {
                Some(v) if v.is_finite() => record.push(v.to_string()),
                _ => record.push(String::new()),
            }
        }
        writer.write_record(&record)?;
    }

    writer
        .into_inner()
        .map_err(|e| csv::Error::from(io::Error::other(e.to_string())))
}

// ── Metadata store ──────────────────────────────────────────────────

/// Sidecar record for a dataset: the poll clock plus a content summary.
///
/// `last_checked` records the last *attempted* refresh check, which is
/// distinct from the data's own recency. The summary describes the artifact as of its last
/// save and is preserved untouched by `touch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub last_checked: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<DatasetSummary>,
}

/// Content summary of a saved artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub rows: usize,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub data_hash: String,
}

impl DatasetSummary {
    /// Describe a non-empty table. The hash is a deterministic BLAKE3 digest
    /// over dates and values in row order.
    pub fn describe(table: &Table) -> Option<DatasetSummary> {
        let (start_date, end_date) = match (table.min_date(), table.max_date()) {
            (Some(s), Some(e)) => (s, e),
            _ => return None,
        };

        let mut hasher = blake3::Hasher::new();
        for row in table.rows() {
            hasher.update(row.date.to_string().as_bytes());
            for (name, value) in &row.values {
                hasher.update(name.as_bytes());
                hasher.update(&value.to_le_bytes());
            }
        }

        Some(DatasetSummary {
            rows: table.len(),
            start_date,
            end_date,
            data_hash: hasher.finalize().to_hex().to_string(),
        })
    }
}

/// JSON sidecar store for per-dataset metadata.
pub struct MetaStore {
    data_dir: PathBuf,
}

impl MetaStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn path(&self, key: &str) -> PathBuf {
        meta_path(&self.data_dir, key)
    }

    /// Read the sidecar, if present and parseable.
    pub fn read(&self, key: &str) -> Option<DatasetMeta> {
        let content = fs::read_to_string(self.path(key)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// The last refresh-check timestamp, or the Unix epoch when no record
    /// exists, so the first-ever check always sees an expired cooldown.
    pub fn last_checked(&self, key: &str) -> NaiveDateTime {
        self.read(key)
            .map(|m| m.last_checked)
            .unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH.naive_utc())
    }

    /// Set `last_checked` to now, preserving any existing summary.
    ///
    /// Idempotent, and deliberately independent of whether the dataset
    /// changed this cycle: "checked and found nothing new" is itself a
    /// cacheable fact.
    pub fn touch(&self, key: &str) -> Result<(), StoreError> {
        let summary = self.read(key).and_then(|m| m.summary);
        self.write(key, summary)
    }

    /// Set `last_checked` to now and replace the summary (used on save).
    pub fn record(&self, key: &str, summary: Option<DatasetSummary>) -> Result<(), StoreError> {
        self.write(key, summary)
    }

    /// Remove the sidecar for `key`. Missing is fine.
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(format!("remove meta: {e}"))),
        }
    }

    fn write(&self, key: &str, summary: Option<DatasetSummary>) -> Result<(), StoreError> {
        let meta = DatasetMeta {
            last_checked: Local::now().naive_local(),
            summary,
        };
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| StoreError::Io(format!("meta serialization: {e}")))?;
        atomic_write(&self.path(key), json.as_bytes())
            .map_err(|e| StoreError::Io(format!("meta write: {e}")))
    }
}
