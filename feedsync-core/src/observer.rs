//! Observability channel for sync outcomes.
//!
//! The engine never fails its caller, so everything a caller cannot see
//! (cache hits, recoveries, swallowed loader and mirror failures) is
//! reported here instead. Consumers of the returned table must not branch on
//! these events; they exist for logging and diagnosis only.

/// What happened during one `sync` call.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Cooldown not yet expired; cached table served unchanged.
    CacheHit { rows: usize },
    /// Local artifact was restored from the remote mirror.
    Recovered,
    /// Entire range re-fetched and saved.
    FullFetch { rows: usize },
    /// Tail extension merged into the cache.
    Extended { new_rows: usize, total: usize },
    /// Refresh was due but the cached tail already reaches today.
    UpToDate,
    /// Refresh ran, source had nothing new; poll clock updated.
    NoNewData,
    /// Full fetch succeeded but returned zero rows.
    FetchEmpty,
    /// Cached artifact failed to load; treated as absent.
    LoadFailed { error: String },
    /// Refresh attempt failed; cached table served, poll clock untouched.
    RefreshFailed { error: String },
    /// Best-effort mirror push failed; local state unaffected.
    MirrorPushFailed { error: String },
}

/// Callback sink for sync events.
pub trait SyncObserver: Send + Sync {
    fn on_event(&self, key: &str, event: &SyncEvent);
}

/// Discards all events.
pub struct NullObserver;

impl SyncObserver for NullObserver {
    fn on_event(&self, _key: &str, _event: &SyncEvent) {}
}

/// Prints events to stdout, failures to stderr.
pub struct StdoutObserver;

impl SyncObserver for StdoutObserver {
    fn on_event(&self, key: &str, event: &SyncEvent) {
        match event {
            SyncEvent::CacheHit { rows } => println!("[{key}] cache hit ({rows} rows)"),
            SyncEvent::Recovered => println!("[{key}] recovered from mirror"),
            SyncEvent::FullFetch { rows } => println!("[{key}] full fetch ({rows} rows)"),
            SyncEvent::Extended { new_rows, total } => {
                println!("[{key}] extended by {new_rows} rows ({total} total)")
            }
            SyncEvent::UpToDate => println!("[{key}] already current"),
            SyncEvent::NoNewData => println!("[{key}] checked, nothing new"),
            SyncEvent::FetchEmpty => println!("[{key}] fetch returned no rows"),
            SyncEvent::LoadFailed { error } => {
                eprintln!("WARNING: [{key}] cache load failed: {error}")
            }
            SyncEvent::RefreshFailed { error } => {
                eprintln!("WARNING: [{key}] refresh failed, serving cached data: {error}")
            }
            SyncEvent::MirrorPushFailed { error } => {
                eprintln!("WARNING: [{key}] mirror push failed: {error}")
            }
        }
    }
}
