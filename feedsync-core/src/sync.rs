//! The sync engine: metadata-driven cache/refresh orchestration.
//!
//! On every access the engine decides whether the cached table is fresh
//! enough to serve as-is, whether an incremental tail fetch is due, or
//! whether the caller's requested history forces a full re-fetch, all while
//! keeping the remote mirror consistent and never failing the caller.
//!
//! The poll clock lives in the metadata sidecar, not in file modification
//! times: a "checked and found nothing new" cycle must still reset the
//! clock, and a full re-fetch must too. A single explicit timestamp
//! decouples "when did we last ask" from "did the content change".

use crate::archive::{Archive, MirrorClient};
use crate::loader::{FetchParams, FetchRange, Loader};
use crate::observer::{NullObserver, SyncEvent, SyncObserver};
use crate::store::{DatasetStore, DatasetSummary, MetaStore, StoreError};
use crate::table::Table;
use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Internal refresh failures. Callers of `sync` never see these; they reach
/// the observer channel instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] crate::loader::FetchError),
}

/// Per-call refresh policy. The engine is policy-free about cadence: the
/// cooldown and backfill tolerance are supplied by each dataset's consumer.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Minimum elapsed time between permitted refresh attempts.
    pub cooldown: Duration,
    /// Earliest history the consumer wants. `None` defers to the loader.
    pub start: Option<NaiveDate>,
    /// Source-specific parameters passed through to the loader.
    pub params: FetchParams,
    /// How many days earlier than the cached minimum a requested start must
    /// be before a full re-fetch is forced. Absorbs off-by-a-few-days
    /// differences in provider calendars.
    pub backfill_tolerance_days: i64,
}

impl SyncOptions {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            start: None,
            params: FetchParams::new(),
            backfill_tolerance_days: 5,
        }
    }

    pub fn starting(mut self, start: NaiveDate) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::new(Duration::zero())
    }
}

/// Cache state of one configured feed, for status reporting.
#[derive(Debug, Clone)]
pub struct FeedStatus {
    pub key: String,
    pub cached: bool,
    pub rows: Option<usize>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub last_checked: Option<NaiveDateTime>,
}

/// The cache/refresh orchestrator.
///
/// One instance owns a data directory and is shared across callers;
/// dependencies are injected at construction rather than reached through
/// process-wide state. `sync` is safe to call from multiple threads:
/// at most one refresh per key is in flight, and concurrent same-key
/// callers block on that refresh's result.
pub struct SyncEngine {
    datasets: DatasetStore,
    meta: MetaStore,
    mirror: MirrorClient,
    observer: Arc<dyn SyncObserver>,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SyncEngine {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            datasets: DatasetStore::new(&data_dir),
            meta: MetaStore::new(&data_dir),
            mirror: MirrorClient::disabled(&data_dir),
            observer: Arc::new(NullObserver),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_archive(mut self, archive: Arc<dyn Archive>) -> Self {
        self.mirror = MirrorClient::new(archive, self.datasets.data_dir());
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn data_dir(&self) -> &Path {
        self.datasets.data_dir()
    }

    /// Return an up-to-date table for `key`, fetching through `loader` only
    /// when the metadata says a check is due.
    ///
    /// Never fails: on any internal error the best locally-known table is
    /// returned (possibly empty), and the error goes to the observer. An
    /// empty result means "temporarily unavailable"; callers must not try
    /// to distinguish causes.
    pub fn sync(&self, key: &str, loader: &dyn Loader, opts: &SyncOptions) -> Table {
        let slot = self.key_lock(key);
        let _inflight = slot.lock().unwrap_or_else(PoisonError::into_inner);

        // Absent: try the mirror before going to the source.
        if !self.datasets.exists(key) {
            if self.mirror.recover(key) {
                self.observer.on_event(key, &SyncEvent::Recovered);
            } else {
                return self.full_fetch(key, loader, opts);
            }
        }

        let cached = match self.datasets.load(key) {
            Ok(table) => table,
            Err(e) => {
                self.observer.on_event(
                    key,
                    &SyncEvent::LoadFailed {
                        error: e.to_string(),
                    },
                );
                Table::default()
            }
        };
        // Present-but-empty (corrupt or placeholder) re-fetches from scratch.
        if cached.is_empty() {
            return self.full_fetch(key, loader, opts);
        }

        let now = Local::now().naive_local();
        if now - self.meta.last_checked(key) < opts.cooldown {
            self.observer
                .on_event(key, &SyncEvent::CacheHit { rows: cached.len() });
            return cached;
        }

        match self.refresh(key, loader, opts, &cached, now.date()) {
            Ok(table) => table,
            Err(e) => {
                // The poll clock is deliberately NOT touched here: recording
                // a failed attempt as "checked" could hide genuine new data
                // for a full cooldown period.
                self.observer.on_event(
                    key,
                    &SyncEvent::RefreshFailed {
                        error: e.to_string(),
                    },
                );
                cached
            }
        }
    }

    /// Delete both artifacts for `key` (explicit cache invalidation).
    pub fn invalidate(&self, key: &str) -> Result<(), StoreError> {
        self.datasets.remove(key)?;
        self.meta.remove(key)
    }

    /// Pull `key` from the mirror into local storage, overwriting what is
    /// there. Returns whether the dataset artifact was recovered.
    pub fn recover(&self, key: &str) -> bool {
        let slot = self.key_lock(key);
        let _inflight = slot.lock().unwrap_or_else(PoisonError::into_inner);
        self.mirror.recover(key)
    }

    /// Cache state for one key, read from the sidecar summary.
    pub fn status(&self, key: &str) -> FeedStatus {
        let meta = self.meta.read(key);
        let summary = meta.as_ref().and_then(|m| m.summary.as_ref());
        FeedStatus {
            key: key.to_string(),
            cached: self.datasets.exists(key),
            rows: summary.map(|s| s.rows),
            start_date: summary.map(|s| s.start_date),
            end_date: summary.map(|s| s.end_date),
            last_checked: meta.as_ref().map(|m| m.last_checked),
        }
    }

    // ── refresh decision procedure ──────────────────────────────────

    /// Cooldown has expired and a non-empty cache exists; decide between
    /// backfill, tail extension, and no-op.
    fn refresh(
        &self,
        key: &str,
        loader: &dyn Loader,
        opts: &SyncOptions,
        cached: &Table,
        today: NaiveDate,
    ) -> Result<Table, SyncError> {
        // Backfill: the caller wants earlier history than we hold.
        if let (Some(requested), Some(cached_min)) = (opts.start, cached.min_date()) {
            if cached_min - requested > Duration::days(opts.backfill_tolerance_days) {
                return self.refetch_history(key, loader, opts, today);
            }
        }

        let Some(cached_max) = cached.max_date() else {
            return Ok(cached.clone());
        };
        let next_day = cached_max + Duration::days(1);

        // Nothing can exist yet for dates after today; record the check and
        // stop rather than asking the source for the future.
        if next_day > today {
            self.meta.touch(key)?;
            self.observer.on_event(key, &SyncEvent::UpToDate);
            return Ok(cached.clone());
        }

        let fetched = loader.fetch(FetchRange::between(next_day, today), &opts.params)?;

        if fetched.is_empty() {
            // A check that found nothing is itself a cacheable fact; only
            // the sidecar crosses the network.
            self.meta.touch(key)?;
            self.publish_logged(key, false, true);
            self.observer.on_event(key, &SyncEvent::NoNewData);
            return Ok(cached.clone());
        }

        let merged = cached.merge(&fetched);
        self.datasets.save(key, &merged)?;
        self.meta.record(key, DatasetSummary::describe(&merged))?;
        self.publish_logged(key, true, true);
        self.observer.on_event(
            key,
            &SyncEvent::Extended {
                new_rows: fetched.len(),
                total: merged.len(),
            },
        );
        Ok(merged)
    }

    /// Fetch the full requested range and replace the cache wholesale.
    fn refetch_history(
        &self,
        key: &str,
        loader: &dyn Loader,
        opts: &SyncOptions,
        today: NaiveDate,
    ) -> Result<Table, SyncError> {
        let range = FetchRange {
            start: opts.start,
            end: Some(today),
        };
        let table = loader.fetch(range, &opts.params)?;

        if table.is_empty() {
            self.observer.on_event(key, &SyncEvent::FetchEmpty);
            return Ok(table);
        }

        self.datasets.save(key, &table)?;
        self.meta.record(key, DatasetSummary::describe(&table))?;
        self.publish_logged(key, true, true);
        self.observer
            .on_event(key, &SyncEvent::FullFetch { rows: table.len() });
        Ok(table)
    }

    /// Full fetch on the no-cache path, where there is nothing to fall back
    /// to: errors degrade to an empty table.
    fn full_fetch(&self, key: &str, loader: &dyn Loader, opts: &SyncOptions) -> Table {
        let today = Local::now().date_naive();
        match self.refetch_history(key, loader, opts, today) {
            Ok(table) => table,
            Err(e) => {
                self.observer.on_event(
                    key,
                    &SyncEvent::RefreshFailed {
                        error: e.to_string(),
                    },
                );
                Table::default()
            }
        }
    }

    fn publish_logged(&self, key: &str, dataset: bool, metadata: bool) {
        if let Err(e) = self.mirror.publish(key, dataset, metadata) {
            self.observer.on_event(
                key,
                &SyncEvent::MirrorPushFailed {
                    error: e.to_string(),
                },
            );
        }
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        inflight.entry(key.to_string()).or_default().clone()
    }
}
