//! Loader capability — the single seam between the sync engine and source
//! adapters.
//!
//! Source adapters (price series, macro composites, anything date-indexed)
//! implement one trait with one method. The engine sits above this trait and
//! decides WHEN to call it; loaders only know HOW to fetch. Loaders must be
//! safe to call with a start date in the future and return an empty table.

use crate::table::Table;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use thiserror::Error;

/// Source-specific string parameters (ticker, series id, ...).
pub type FetchParams = BTreeMap<String, String>;

/// Inclusive date range for a fetch. `None` bounds defer to the loader's own
/// defaults (typically "as early as the source goes" and "today").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl FetchRange {
    pub fn starting(start: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }
}

/// Structured error types for fetch operations.
///
/// The engine treats every variant the same way (fall back to the cached
/// table); the split exists for the observer channel and for loader-internal
/// retry decisions.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("series not found: {series}")]
    SeriesNotFound { series: String },

    #[error("invalid fetch request: {0}")]
    InvalidRequest(String),

    #[error("fetch error: {0}")]
    Other(String),
}

/// Trait for source adapters.
///
/// Implementations handle the specifics of one upstream source. The sync
/// engine is the only caller; it never lets a `FetchError` reach consumers.
pub trait Loader: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch rows in the given range. An empty table is a successful fetch
    /// with nothing published yet, not an error.
    fn fetch(&self, range: FetchRange, params: &FetchParams) -> Result<Table, FetchError>;
}
