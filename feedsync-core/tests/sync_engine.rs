//! Integration tests for the sync engine's decision procedure.
//!
//! These drive the engine against a scripted loader and a directory-backed
//! archive, covering the cooldown short-circuit, tail extension, backfill,
//! failure fallback, and mirror recovery paths end to end.

use chrono::{Duration, Local, NaiveDate};
use feedsync_core::{
    Archive, DatasetStore, FetchError, FetchParams, FetchRange, FsArchive, Loader, MetaStore, Row,
    SyncEngine, SyncOptions, Table,
};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_dir(tag: &str) -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir =
        std::env::temp_dir().join(format!("feedsync_sync_{tag}_{}_{id}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn table_of(dates: &[(&str, f64)]) -> Table {
    Table::from_rows(
        dates
            .iter()
            .map(|(date, close)| Row::new(d(date)).with("close", *close))
            .collect(),
    )
}

/// Write a sidecar with an arbitrary poll-clock value, bypassing the store's
/// "now" stamping.
fn write_meta(dir: &Path, key: &str, last_checked: &str) {
    fs::write(
        dir.join(format!("{key}.meta.json")),
        format!(r#"{{"last_checked":"{last_checked}"}}"#),
    )
    .unwrap();
}

fn days_ago(days: i64) -> String {
    (Local::now().naive_local() - Duration::days(days))
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

/// Loader that consumes a script of canned results and records every call.
struct ScriptedLoader {
    calls: AtomicUsize,
    ranges: Mutex<Vec<FetchRange>>,
    script: Mutex<VecDeque<Result<Table, FetchError>>>,
}

impl ScriptedLoader {
    fn returning(table: Table) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            ranges: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::from([Ok(table)])),
        }
    }

    fn empty() -> Self {
        Self::returning(Table::default())
    }

    fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            ranges: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::from([Err(FetchError::NetworkUnreachable(
                "connection refused".into(),
            ))])),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_range(&self) -> Option<FetchRange> {
        self.ranges.lock().unwrap().last().copied()
    }
}

impl Loader for ScriptedLoader {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch(&self, range: FetchRange, _params: &FetchParams) -> Result<Table, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.ranges.lock().unwrap().push(range);
        match self.script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(Table::default()),
        }
    }
}

// ── absent cache ────────────────────────────────────────────────────

#[test]
fn absent_cache_full_fetches_and_persists() {
    let dir = temp_dir("absent");
    let engine = SyncEngine::new(&dir);
    let fetched = table_of(&[("2024-01-02", 100.0), ("2024-01-03", 101.0)]);
    let loader = ScriptedLoader::returning(fetched.clone());

    let opts = SyncOptions::new(Duration::days(1)).starting(d("2024-01-01"));
    let result = engine.sync("spy", &loader, &opts);

    assert_eq!(result, fetched);
    assert_eq!(loader.calls(), 1);
    assert_eq!(loader.last_range().unwrap().start, Some(d("2024-01-01")));

    // Both artifacts landed on disk.
    let store = DatasetStore::new(&dir);
    assert_eq!(store.load("spy").unwrap(), fetched);
    let meta = MetaStore::new(&dir);
    assert_eq!(meta.read("spy").unwrap().summary.unwrap().rows, 2);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn absent_cache_loader_failure_returns_empty_without_touching_meta() {
    let dir = temp_dir("absent_fail");
    let engine = SyncEngine::new(&dir);
    let loader = ScriptedLoader::failing();

    let result = engine.sync("spy", &loader, &SyncOptions::new(Duration::days(1)));

    assert!(result.is_empty());
    assert!(!dir.join("spy.csv").exists());
    // No sidecar means the next call retries immediately.
    assert!(!dir.join("spy.meta.json").exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn empty_full_fetch_records_nothing() {
    let dir = temp_dir("absent_empty");
    let engine = SyncEngine::new(&dir);
    let loader = ScriptedLoader::empty();

    let result = engine.sync("spy", &loader, &SyncOptions::new(Duration::days(1)));

    assert!(result.is_empty());
    assert!(!dir.join("spy.csv").exists());
    assert!(!dir.join("spy.meta.json").exists());

    let _ = fs::remove_dir_all(&dir);
}

// ── cooldown short-circuit ──────────────────────────────────────────

#[test]
fn second_call_within_cooldown_issues_no_loader_call() {
    let dir = temp_dir("cooldown");
    let engine = SyncEngine::new(&dir);
    let loader = ScriptedLoader::returning(table_of(&[("2024-01-02", 100.0)]));

    let opts = SyncOptions::new(Duration::days(1));
    let first = engine.sync("spy", &loader, &opts);
    let second = engine.sync("spy", &loader, &opts);

    assert_eq!(first, second);
    assert_eq!(loader.calls(), 1);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn cooldown_takes_precedence_over_backfill() {
    let dir = temp_dir("cooldown_backfill");
    DatasetStore::new(&dir)
        .save("spy", &table_of(&[("2020-06-01", 1.0), ("2020-06-30", 2.0)]))
        .unwrap();
    write_meta(&dir, "spy", &days_ago(0));

    let engine = SyncEngine::new(&dir);
    let loader = ScriptedLoader::returning(table_of(&[("2019-01-02", 0.5)]));

    // Requested start is years earlier than the cached minimum, but the
    // cooldown has not expired: the short-circuit wins.
    let opts = SyncOptions::new(Duration::days(1)).starting(d("2019-01-01"));
    let result = engine.sync("spy", &loader, &opts);

    assert_eq!(result.min_date(), Some(d("2020-06-01")));
    assert_eq!(loader.calls(), 0);

    let _ = fs::remove_dir_all(&dir);
}

// ── tail extension ──────────────────────────────────────────────────

#[test]
fn expired_cooldown_extends_tail_and_resets_poll_clock() {
    let dir = temp_dir("extend");
    DatasetStore::new(&dir)
        .save(
            "spy",
            &table_of(&[("2020-01-01", 1.0), ("2020-06-30", 2.0)]),
        )
        .unwrap();
    write_meta(&dir, "spy", &days_ago(2));

    let engine = SyncEngine::new(&dir);
    let loader = ScriptedLoader::returning(table_of(&[
        ("2020-07-01", 3.0),
        ("2020-07-02", 4.0),
        ("2020-07-03", 5.0),
    ]));

    let result = engine.sync("spy", &loader, &SyncOptions::new(Duration::days(1)));

    assert_eq!(loader.calls(), 1);
    // Incremental fetch starts the day after the cached maximum.
    assert_eq!(loader.last_range().unwrap().start, Some(d("2020-07-01")));
    assert_eq!(result.max_date(), Some(d("2020-07-03")));
    assert_eq!(result.len(), 5);
    // Pre-refresh range survived (monotonic coverage).
    assert_eq!(result.min_date(), Some(d("2020-01-01")));

    let meta = MetaStore::new(&dir);
    assert!(Local::now().naive_local() - meta.last_checked("spy") < Duration::minutes(1));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn overlapping_dates_take_the_newly_fetched_value() {
    let dir = temp_dir("conflict");
    DatasetStore::new(&dir)
        .save(
            "spy",
            &table_of(&[("2020-01-01", 1.0), ("2020-06-30", 2.0)]),
        )
        .unwrap();
    write_meta(&dir, "spy", &days_ago(2));

    let engine = SyncEngine::new(&dir);
    // Source restates 2020-06-30 with a corrected value.
    let loader = ScriptedLoader::returning(table_of(&[
        ("2020-06-30", 2.5),
        ("2020-07-01", 3.0),
    ]));

    let result = engine.sync("spy", &loader, &SyncOptions::new(Duration::days(1)));

    assert_eq!(result.len(), 3);
    assert_eq!(result.row_at(d("2020-06-30")).unwrap().get("close"), Some(2.5));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn zero_new_rows_touches_meta_but_not_dataset() {
    let dir = temp_dir("nothing_new");
    let store = DatasetStore::new(&dir);
    store
        .save("spy", &table_of(&[("2020-01-01", 1.0), ("2020-06-30", 2.0)]))
        .unwrap();
    let artifact_before = fs::read(dir.join("spy.csv")).unwrap();
    write_meta(&dir, "spy", &days_ago(2));

    let engine = SyncEngine::new(&dir);
    let loader = ScriptedLoader::empty();

    let result = engine.sync("spy", &loader, &SyncOptions::new(Duration::days(1)));

    assert_eq!(loader.calls(), 1);
    assert_eq!(result.len(), 2);
    assert_eq!(fs::read(dir.join("spy.csv")).unwrap(), artifact_before);

    let meta = MetaStore::new(&dir);
    assert!(Local::now().naive_local() - meta.last_checked("spy") < Duration::minutes(1));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn failed_refresh_serves_cache_and_leaves_poll_clock_alone() {
    let dir = temp_dir("refresh_fail");
    DatasetStore::new(&dir)
        .save("spy", &table_of(&[("2020-01-01", 1.0), ("2020-06-30", 2.0)]))
        .unwrap();
    write_meta(&dir, "spy", "2021-03-01T09:00:00");

    let engine = SyncEngine::new(&dir);
    let loader = ScriptedLoader::failing();

    let result = engine.sync("spy", &loader, &SyncOptions::new(Duration::days(1)));

    assert_eq!(loader.calls(), 1);
    assert_eq!(result.len(), 2);
    // The failed attempt was not recorded as "checked": next call retries.
    let meta = MetaStore::new(&dir);
    assert_eq!(
        meta.last_checked("spy"),
        d("2021-03-01").and_hms_opt(9, 0, 0).unwrap()
    );

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn current_tail_touches_without_fetching() {
    let dir = temp_dir("current");
    let today = Local::now().date_naive();
    DatasetStore::new(&dir)
        .save(
            "spy",
            &Table::from_rows(vec![
                Row::new(today - Duration::days(1)).with("close", 1.0),
                Row::new(today).with("close", 2.0),
            ]),
        )
        .unwrap();
    write_meta(&dir, "spy", &days_ago(2));

    let engine = SyncEngine::new(&dir);
    let loader = ScriptedLoader::returning(table_of(&[("2030-01-01", 9.9)]));

    let result = engine.sync("spy", &loader, &SyncOptions::new(Duration::days(1)));

    // Nothing can exist past today, so the source was never asked.
    assert_eq!(loader.calls(), 0);
    assert_eq!(result.max_date(), Some(today));

    let meta = MetaStore::new(&dir);
    assert!(Local::now().naive_local() - meta.last_checked("spy") < Duration::minutes(1));

    let _ = fs::remove_dir_all(&dir);
}

// ── backfill ────────────────────────────────────────────────────────

#[test]
fn earlier_requested_start_forces_full_refetch() {
    let dir = temp_dir("backfill");
    DatasetStore::new(&dir)
        .save("spy", &table_of(&[("2020-06-01", 1.0), ("2020-06-30", 2.0)]))
        .unwrap();
    write_meta(&dir, "spy", &days_ago(2));

    let engine = SyncEngine::new(&dir);
    let full_history = table_of(&[
        ("2019-01-02", 0.5),
        ("2020-06-01", 1.1),
        ("2020-06-30", 2.1),
    ]);
    let loader = ScriptedLoader::returning(full_history.clone());

    let opts = SyncOptions::new(Duration::days(1)).starting(d("2019-01-01"));
    let result = engine.sync("spy", &loader, &opts);

    assert_eq!(loader.calls(), 1);
    assert_eq!(loader.last_range().unwrap().start, Some(d("2019-01-01")));
    assert_eq!(result, full_history);
    // Cache was overwritten wholesale.
    assert_eq!(DatasetStore::new(&dir).load("spy").unwrap(), full_history);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn requested_start_within_tolerance_does_not_refetch_history() {
    let dir = temp_dir("tolerance");
    let today = Local::now().date_naive();
    DatasetStore::new(&dir)
        .save(
            "spy",
            &Table::from_rows(vec![
                Row::new(d("2020-06-01")).with("close", 1.0),
                Row::new(today).with("close", 2.0),
            ]),
        )
        .unwrap();
    write_meta(&dir, "spy", &days_ago(2));

    let engine = SyncEngine::new(&dir);
    let loader = ScriptedLoader::returning(table_of(&[("2019-01-02", 0.5)]));

    // Three days earlier than the cached minimum: inside the 5-day tolerance.
    let opts = SyncOptions::new(Duration::days(1)).starting(d("2020-05-29"));
    let result = engine.sync("spy", &loader, &opts);

    assert_eq!(loader.calls(), 0);
    assert_eq!(result.min_date(), Some(d("2020-06-01")));

    let _ = fs::remove_dir_all(&dir);
}

// ── corrupt cache ───────────────────────────────────────────────────

#[test]
fn corrupt_artifact_degrades_to_full_fetch() {
    let dir = temp_dir("corrupt");
    fs::write(dir.join("spy.csv"), "date,close\ngarbage,1.0\n").unwrap();
    write_meta(&dir, "spy", &days_ago(0));

    let engine = SyncEngine::new(&dir);
    let fetched = table_of(&[("2024-01-02", 100.0)]);
    let loader = ScriptedLoader::returning(fetched.clone());

    // Even a fresh cooldown cannot save a corrupt artifact: there is no
    // usable table to serve, so the engine re-fetches.
    let result = engine.sync("spy", &loader, &SyncOptions::new(Duration::days(1)));

    assert_eq!(loader.calls(), 1);
    assert_eq!(result, fetched);
    assert_eq!(DatasetStore::new(&dir).load("spy").unwrap(), fetched);

    let _ = fs::remove_dir_all(&dir);
}

// ── mirror recovery and publication ─────────────────────────────────

#[test]
fn recovery_from_archive_avoids_the_loader() {
    let remote = temp_dir("remote");
    let local = temp_dir("local");

    // Seed the mirror with a dataset and a fresh sidecar.
    let archive = FsArchive::new(&remote);
    {
        let staging = temp_dir("staging");
        let store = DatasetStore::new(&staging);
        store
            .save("fx", &table_of(&[("2024-01-02", 1.0), ("2024-01-03", 1.1)]))
            .unwrap();
        archive
            .push("fx.csv", &fs::read(staging.join("fx.csv")).unwrap())
            .unwrap();
        archive
            .push(
                "fx.meta.json",
                format!(r#"{{"last_checked":"{}"}}"#, days_ago(0)).as_bytes(),
            )
            .unwrap();
        let _ = fs::remove_dir_all(&staging);
    }

    let engine = SyncEngine::new(&local).with_archive(Arc::new(FsArchive::new(&remote)));
    let loader = ScriptedLoader::returning(table_of(&[("2030-01-01", 9.9)]));

    let result = engine.sync("fx", &loader, &SyncOptions::new(Duration::days(1)));

    assert_eq!(loader.calls(), 0);
    assert_eq!(result.len(), 2);
    assert_eq!(result.max_date(), Some(d("2024-01-03")));

    let _ = fs::remove_dir_all(&remote);
    let _ = fs::remove_dir_all(&local);
}

#[test]
fn full_fetch_publishes_both_artifacts() {
    let remote = temp_dir("remote");
    let local = temp_dir("local");

    let engine = SyncEngine::new(&local).with_archive(Arc::new(FsArchive::new(&remote)));
    let loader = ScriptedLoader::returning(table_of(&[("2024-01-02", 100.0)]));

    engine.sync("spy", &loader, &SyncOptions::new(Duration::days(1)));

    assert!(remote.join("spy.csv").exists());
    assert!(remote.join("spy.meta.json").exists());

    let _ = fs::remove_dir_all(&remote);
    let _ = fs::remove_dir_all(&local);
}

#[test]
fn no_new_rows_publishes_metadata_only() {
    let remote = temp_dir("remote");
    let local = temp_dir("local");

    DatasetStore::new(&local)
        .save("spy", &table_of(&[("2020-01-01", 1.0), ("2020-06-30", 2.0)]))
        .unwrap();
    write_meta(&local, "spy", &days_ago(2));

    let engine = SyncEngine::new(&local).with_archive(Arc::new(FsArchive::new(&remote)));
    let loader = ScriptedLoader::empty();

    engine.sync("spy", &loader, &SyncOptions::new(Duration::days(1)));

    // Cheap sync: only the sidecar crossed the network.
    assert!(!remote.join("spy.csv").exists());
    assert!(remote.join("spy.meta.json").exists());

    let _ = fs::remove_dir_all(&remote);
    let _ = fs::remove_dir_all(&local);
}

// ── invalidation and status ─────────────────────────────────────────

#[test]
fn invalidate_removes_both_artifacts() {
    let dir = temp_dir("invalidate");
    DatasetStore::new(&dir)
        .save("spy", &table_of(&[("2024-01-02", 100.0)]))
        .unwrap();
    write_meta(&dir, "spy", &days_ago(0));

    let engine = SyncEngine::new(&dir);
    engine.invalidate("spy").unwrap();

    assert!(!dir.join("spy.csv").exists());
    assert!(!dir.join("spy.meta.json").exists());
    // Invalidating an already-absent key is fine.
    engine.invalidate("spy").unwrap();

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn status_reflects_sidecar_summary() {
    let dir = temp_dir("status");
    let engine = SyncEngine::new(&dir);

    let blank = engine.status("spy");
    assert!(!blank.cached);
    assert!(blank.last_checked.is_none());

    let loader = ScriptedLoader::returning(table_of(&[
        ("2024-01-02", 100.0),
        ("2024-01-03", 101.0),
    ]));
    engine.sync("spy", &loader, &SyncOptions::new(Duration::days(1)));

    let status = engine.status("spy");
    assert!(status.cached);
    assert_eq!(status.rows, Some(2));
    assert_eq!(status.start_date, Some(d("2024-01-02")));
    assert_eq!(status.end_date, Some(d("2024-01-03")));
    assert!(status.last_checked.is_some());

    let _ = fs::remove_dir_all(&dir);
}

// ── concurrency ─────────────────────────────────────────────────────

/// Loader that stalls long enough for other callers to pile up.
struct SlowLoader {
    calls: AtomicUsize,
    result: Table,
}

impl Loader for SlowLoader {
    fn name(&self) -> &str {
        "slow"
    }

    fn fetch(&self, _range: FetchRange, _params: &FetchParams) -> Result<Table, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(150));
        Ok(self.result.clone())
    }
}

#[test]
fn concurrent_same_key_callers_share_one_refresh() {
    let dir = temp_dir("singleflight");
    DatasetStore::new(&dir)
        .save("spy", &table_of(&[("2020-01-01", 1.0), ("2020-06-30", 2.0)]))
        .unwrap();
    write_meta(&dir, "spy", &days_ago(2));

    let engine = Arc::new(SyncEngine::new(&dir));
    let loader = Arc::new(SlowLoader {
        calls: AtomicUsize::new(0),
        result: table_of(&[("2020-07-01", 3.0)]),
    });

    let opts = SyncOptions::new(Duration::days(1));
    std::thread::scope(|scope| {
        for _ in 0..4 {
            let engine = Arc::clone(&engine);
            let loader = Arc::clone(&loader);
            let opts = opts.clone();
            scope.spawn(move || {
                let result = engine.sync("spy", loader.as_ref(), &opts);
                assert_eq!(result.max_date(), Some(d("2020-07-01")));
            });
        }
    });

    // One caller refreshed; the rest saw a fresh poll clock and served the
    // merged cache.
    assert_eq!(loader.calls.load(Ordering::SeqCst), 1);

    let _ = fs::remove_dir_all(&dir);
}
