//! FeedSync CLI — sync, status, recover, and invalidate commands.
//!
//! Commands:
//! - `sync` — refresh configured feeds through their loaders
//! - `status` — report cache state per configured feed
//! - `recover` — pull a feed's artifacts back from the remote mirror
//! - `invalidate` — drop a feed's local artifacts, forcing a re-fetch

mod config;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use config::{ArchiveConfig, FeedConfig, FeedsConfig, LoaderSpec};
use feedsync_core::{
    Archive, FetchError, FetchParams, FetchRange, FsArchive, HttpArchive, Loader, StdoutObserver,
    SyncEngine, SyncOptions, Table,
};
use feedsync_sources::{FredLoader, SpliceLoader, SyntheticLoader, YahooPriceLoader};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "feedsync",
    about = "FeedSync CLI — locally-materialized mirror of external time-series feeds"
)]
struct Cli {
    /// Path to the feeds manifest.
    #[arg(long, global = true, default_value = "feeds.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh feeds (all configured feeds, or just the listed keys).
    Sync {
        /// Feed keys to refresh. Empty means every configured feed.
        keys: Vec<String>,

        /// Ignore cooldowns and check every selected feed now.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Report cache state per configured feed.
    Status,
    /// Pull a feed's artifacts back from the remote mirror.
    Recover {
        /// Feed key to recover.
        key: String,
    },
    /// Drop a feed's local artifacts.
    Invalidate {
        /// Feed key to invalidate.
        key: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let manifest = FeedsConfig::from_file(&cli.config)
        .with_context(|| format!("load feeds manifest {}", cli.config.display()))?;
    let engine = build_engine(&manifest)?;

    match cli.command {
        Commands::Sync { keys, force } => cmd_sync(&engine, &manifest, &keys, force),
        Commands::Status => cmd_status(&engine, &manifest),
        Commands::Recover { key } => cmd_recover(&engine, &key),
        Commands::Invalidate { key } => cmd_invalidate(&engine, &key),
    }
}

fn build_engine(manifest: &FeedsConfig) -> Result<SyncEngine> {
    let engine = SyncEngine::new(&manifest.data_dir).with_observer(Arc::new(StdoutObserver));

    let Some(archive) = &manifest.archive else {
        return Ok(engine);
    };
    let archive: Arc<dyn Archive> = match archive {
        ArchiveConfig::Http {
            base_url,
            token_env,
        } => {
            let token = token_env.as_ref().and_then(|var| std::env::var(var).ok());
            Arc::new(HttpArchive::new(base_url.clone(), token)?)
        }
        ArchiveConfig::Fs { root } => Arc::new(FsArchive::new(root)),
    };
    Ok(engine.with_archive(archive))
}

/// Binds manifest params onto a loader, so the two sides of a spliced feed
/// can carry different series ids through one shared call.
struct BoundLoader {
    inner: Box<dyn Loader>,
    params: FetchParams,
}

impl Loader for BoundLoader {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn fetch(&self, range: FetchRange, params: &FetchParams) -> Result<Table, FetchError> {
        let mut merged = self.params.clone();
        merged.extend(params.clone());
        self.inner.fetch(range, &merged)
    }
}

fn build_loader(spec: &LoaderSpec) -> Result<Box<dyn Loader>> {
    match spec {
        LoaderSpec::Yahoo { ticker } => {
            let mut params = FetchParams::new();
            params.insert("ticker".into(), ticker.clone());
            Ok(Box::new(BoundLoader {
                inner: Box::new(YahooPriceLoader::new()?),
                params,
            }))
        }
        LoaderSpec::Fred {
            series_id,
            column,
            api_key_env,
        } => {
            let var = api_key_env.as_deref().unwrap_or("FRED_API_KEY");
            let api_key = std::env::var(var)
                .with_context(|| format!("FRED API key env var '{var}' not set"))?;
            let mut params = FetchParams::new();
            params.insert("series_id".into(), series_id.clone());
            if let Some(column) = column {
                params.insert("column".into(), column.clone());
            }
            Ok(Box::new(BoundLoader {
                inner: Box::new(FredLoader::new(api_key)?),
                params,
            }))
        }
        LoaderSpec::Synthetic { series } => {
            let mut params = FetchParams::new();
            if let Some(series) = series {
                params.insert("series".into(), series.clone());
            }
            Ok(Box::new(BoundLoader {
                inner: Box::new(SyntheticLoader),
                params,
            }))
        }
        LoaderSpec::Splice {
            cutover,
            early,
            late,
        } => Ok(Box::new(SpliceLoader::new(
            build_loader(early)?,
            build_loader(late)?,
            *cutover,
        ))),
    }
}

/// Convert a fractional number of days into a `chrono::Duration`, preserving
/// sub-second precision (intraday FX cooldowns are ≈30 s).
fn cooldown_duration(days: f64) -> Duration {
    Duration::nanoseconds((days * 86_400.0 * 1_000_000_000.0) as i64)
}

fn cmd_sync(
    engine: &SyncEngine,
    manifest: &FeedsConfig,
    keys: &[String],
    force: bool,
) -> Result<()> {
    let selected: Vec<&FeedConfig> = if keys.is_empty() {
        manifest.feeds.iter().collect()
    } else {
        keys.iter()
            .map(|key| {
                manifest
                    .find_feed(key)
                    .ok_or_else(|| anyhow!("no feed '{key}' in manifest"))
            })
            .collect::<Result<_>>()?
    };
    if selected.is_empty() {
        bail!("no feeds configured");
    }

    let mut unavailable = 0;
    for feed in selected {
        let loader = build_loader(&feed.loader)?;
        let cooldown = if force {
            Duration::zero()
        } else {
            cooldown_duration(feed.cooldown_days)
        };
        let mut opts = SyncOptions::new(cooldown);
        opts.start = feed.start;

        let table = engine.sync(&feed.key, loader.as_ref(), &opts);
        match (table.min_date(), table.max_date()) {
            (Some(min), Some(max)) => {
                println!("{}: {} rows ({min}..{max})", feed.key, table.len())
            }
            _ => {
                println!("{}: temporarily unavailable", feed.key);
                unavailable += 1;
            }
        }
    }

    if unavailable > 0 {
        eprintln!("WARNING: {unavailable} feed(s) unavailable this sync");
    }
    Ok(())
}

fn cmd_status(engine: &SyncEngine, manifest: &FeedsConfig) -> Result<()> {
    if manifest.feeds.is_empty() {
        bail!("no feeds configured");
    }

    println!(
        "{:<24} {:>8}  {:<24} {}",
        "FEED", "ROWS", "RANGE", "LAST CHECKED"
    );
    for feed in &manifest.feeds {
        let status = engine.status(&feed.key);
        if !status.cached {
            println!("{:<24} {:>8}  {:<24} -", feed.key, "-", "not cached");
            continue;
        }
        let rows = status
            .rows
            .map(|r| r.to_string())
            .unwrap_or_else(|| "?".into());
        let range = match (status.start_date, status.end_date) {
            (Some(start), Some(end)) => format!("{start}..{end}"),
            _ => "?".into(),
        };
        let checked = status
            .last_checked
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".into());
        println!("{:<24} {:>8}  {:<24} {checked}", feed.key, rows, range);
    }
    Ok(())
}

fn cmd_recover(engine: &SyncEngine, key: &str) -> Result<()> {
    if engine.recover(key) {
        println!("{key}: recovered from mirror");
    } else {
        println!("{key}: no mirror copy available");
    }
    Ok(())
}

fn cmd_invalidate(engine: &SyncEngine, key: &str) -> Result<()> {
    engine.invalidate(key)?;
    println!("{key}: local artifacts removed");
    Ok(())
}
