//! Feeds manifest — the TOML file that names every feed, its loader, and
//! its refresh policy.
//!
//! Cadence lives here, with the consumer, not in the engine: an intraday FX
//! feed can run a near-zero cooldown while a monthly macro composite runs a
//! week. Secrets never appear in the file; loaders and the archive name
//! the environment variable to read instead.

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file: {0}")]
    Read(String),

    #[error("parse config: {0}")]
    Parse(String),

    #[error("duplicate feed key '{0}'")]
    DuplicateKey(String),
}

/// The complete feeds manifest.
#[derive(Debug, Deserialize)]
pub struct FeedsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default)]
    pub archive: Option<ArchiveConfig>,

    #[serde(default, rename = "feed")]
    pub feeds: Vec<FeedConfig>,
}

/// Remote mirror backend.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArchiveConfig {
    Http {
        base_url: String,
        #[serde(default)]
        token_env: Option<String>,
    },
    Fs {
        root: String,
    },
}

/// One configured feed.
#[derive(Debug, Deserialize)]
pub struct FeedConfig {
    pub key: String,

    /// Minimum days between refresh attempts. Fractions are fine; the
    /// default is roughly thirty seconds, suitable for intraday data.
    #[serde(default = "default_cooldown_days")]
    pub cooldown_days: f64,

    /// Earliest history this feed's consumers want.
    #[serde(default)]
    pub start: Option<NaiveDate>,

    pub loader: LoaderSpec,
}

/// Loader selection, nested for spliced feeds.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoaderSpec {
    Yahoo {
        ticker: String,
    },
    Fred {
        series_id: String,
        #[serde(default)]
        column: Option<String>,
        #[serde(default)]
        api_key_env: Option<String>,
    },
    Synthetic {
        #[serde(default)]
        series: Option<String>,
    },
    Splice {
        cutover: NaiveDate,
        early: Box<LoaderSpec>,
        late: Box<LoaderSpec>,
    },
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_cooldown_days() -> f64 {
    0.00035
}

impl FeedsConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FeedsConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut seen = BTreeSet::new();
        for feed in &config.feeds {
            if !seen.insert(feed.key.as_str()) {
                return Err(ConfigError::DuplicateKey(feed.key.clone()));
            }
        }
        Ok(config)
    }

    pub fn find_feed(&self, key: &str) -> Option<&FeedConfig> {
        self.feeds.iter().find(|f| f.key == key)
    }
}
