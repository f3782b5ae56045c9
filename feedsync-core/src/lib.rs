//! FeedSync Core — metadata-driven cache/sync engine for external time series.
//!
//! This crate contains the heart of the synchronization layer:
//! - Date-indexed table model with field-agnostic last-writer-wins merge
//! - CSV dataset store and JSON metadata sidecar store (atomic writes,
//!   quarantine of corrupt artifacts)
//! - Archive capability with filesystem and HTTP backends, plus the
//!   best-effort mirror client used for recovery and durability
//! - Loader trait — the single seam to source adapters
//! - The sync engine: cooldown short-circuit, backfill, tail extension,
//!   remote-mirror fallback, never failing the caller
//! - Observer channel carrying the outcomes callers cannot see

pub mod archive;
pub mod loader;
pub mod observer;
pub mod store;
pub mod sync;
pub mod table;

pub use archive::{Archive, ArchiveError, FsArchive, HttpArchive, MirrorClient};
pub use loader::{FetchError, FetchParams, FetchRange, Loader};
pub use observer::{NullObserver, StdoutObserver, SyncEvent, SyncObserver};
pub use store::{DatasetMeta, DatasetStore, DatasetSummary, MetaStore, StoreError};
pub use sync::{FeedStatus, SyncEngine, SyncError, SyncOptions};
pub use table::{parse_day, Row, Table};
