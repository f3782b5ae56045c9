//! FeedSync Sources — concrete `Loader` adapters.
//!
//! Each adapter handles one upstream source and nothing else: no caching, no
//! cadence decisions. The sync engine in `feedsync-core` sits above and
//! decides when these get called.
//!
//! - `YahooPriceLoader` — daily security prices from Yahoo's v8 chart API
//! - `FredLoader` — macro series from the FRED observations API
//! - `SpliceLoader` — stitches two providers across a cutover date
//! - `SyntheticLoader` — deterministic random walk for offline use

pub mod fred;
pub mod splice;
pub mod synthetic;
pub mod yahoo;

pub use fred::FredLoader;
pub use splice::SpliceLoader;
pub use synthetic::SyntheticLoader;
pub use yahoo::YahooPriceLoader;
