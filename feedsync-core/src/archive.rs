//! Remote mirror of the local cache.
//!
//! The archive is a key-addressed blob store used two ways: disaster
//! recovery (pull a dataset that local storage lost) and best-effort
//! durability (push after every save). Neither direction is required for
//! correctness of a single process's view, so every failure here is
//! non-fatal and must never block the primary read path.
//!
//! Logical paths are `{key}.csv` and `{key}.meta.json`, matching the local
//! artifact names so a mirror is a byte-for-byte copy of the data dir.

use crate::store::{atomic_write, dataset_path, meta_path};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Structured error types for archive operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive unreachable: {0}")]
    Unreachable(String),

    #[error("archive rejected request: {0}")]
    Rejected(String),

    #[error("archive I/O error: {0}")]
    Io(String),
}

/// Key-addressed blob store capability.
///
/// `pull` distinguishes "not there" (`Ok(None)`) from a transport failure;
/// recovery treats both as "no mirror copy" but the observer channel wants
/// the difference.
pub trait Archive: Send + Sync {
    /// Human-readable name of this archive backend.
    fn name(&self) -> &str;

    fn pull(&self, path: &str) -> Result<Option<Vec<u8>>, ArchiveError>;

    fn push(&self, path: &str, bytes: &[u8]) -> Result<(), ArchiveError>;
}

// ── Filesystem archive ──────────────────────────────────────────────

/// Directory-backed archive: a mirror on another filesystem (or the test
/// double for the HTTP backend).
pub struct FsArchive {
    root: PathBuf,
}

impl FsArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Archive for FsArchive {
    fn name(&self) -> &str {
        "fs"
    }

    fn pull(&self, path: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        match fs::read(self.root.join(path)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ArchiveError::Io(format!("read {path}: {e}"))),
        }
    }

    fn push(&self, path: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        atomic_write(&self.root.join(path), bytes)
            .map_err(|e| ArchiveError::Io(format!("write {path}: {e}")))
    }
}

// ── HTTP archive ────────────────────────────────────────────────────

/// HTTP blob-store archive: GET/PUT against a base URL, optional bearer
/// token. Requests are timeout-bounded; a timeout surfaces as
/// `Unreachable` like any other transport failure.
pub struct HttpArchive {
    client: reqwest::blocking::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpArchive {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, ArchiveError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ArchiveError::Io(format!("build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn authorize(
        &self,
        req: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

impl Archive for HttpArchive {
    fn name(&self) -> &str {
        "http"
    }

    fn pull(&self, path: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        let resp = self
            .authorize(self.client.get(self.url(path)))
            .send()
            .map_err(|e| ArchiveError::Unreachable(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ArchiveError::Rejected(format!(
                "GET {path}: HTTP {}",
                resp.status()
            )));
        }

        let bytes = resp
            .bytes()
            .map_err(|e| ArchiveError::Unreachable(e.to_string()))?;
        Ok(Some(bytes.to_vec()))
    }

    fn push(&self, path: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        let resp = self
            .authorize(self.client.put(self.url(path)))
            .body(bytes.to_vec())
            .send()
            .map_err(|e| ArchiveError::Unreachable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ArchiveError::Rejected(format!(
                "PUT {path}: HTTP {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

// ── Mirror client ───────────────────────────────────────────────────

/// Best-effort bridge between the local data dir and an archive.
///
/// Constructed without an archive it is inert: `recover` reports nothing
/// recovered and `publish` succeeds trivially.
pub struct MirrorClient {
    archive: Option<Arc<dyn Archive>>,
    data_dir: PathBuf,
}

impl MirrorClient {
    pub fn new(archive: Arc<dyn Archive>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive: Some(archive),
            data_dir: data_dir.into(),
        }
    }

    pub fn disabled(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive: None,
            data_dir: data_dir.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.archive.is_some()
    }

    fn dataset_remote(key: &str) -> String {
        format!("{key}.csv")
    }

    fn meta_remote(key: &str) -> String {
        format!("{key}.meta.json")
    }

    /// Pull the dataset artifact (and, opportunistically, its sidecar) from
    /// the mirror into local storage. Returns whether the DATASET artifact
    /// was recovered. Sidecar failures are ignored: a missing sidecar just
    /// means the next check sees an expired cooldown.
    pub fn recover(&self, key: &str) -> bool {
        let Some(archive) = &self.archive else {
            return false;
        };

        let dataset = match archive.pull(&Self::dataset_remote(key)) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return false,
            Err(e) => {
                eprintln!("WARNING: [{key}] mirror pull failed: {e}");
                return false;
            }
        };
        if atomic_write(&dataset_path(&self.data_dir, key), &dataset).is_err() {
            return false;
        }

        if let Ok(Some(bytes)) = archive.pull(&Self::meta_remote(key)) {
            let _ = atomic_write(&meta_path(&self.data_dir, key), &bytes);
        }
        true
    }

    /// Push the selected local artifacts to the mirror. The caller decides
    /// what to do with the error; it must never reach a consumer.
    pub fn publish(&self, key: &str, dataset: bool, metadata: bool) -> Result<(), ArchiveError> {
        let Some(archive) = &self.archive else {
            return Ok(());
        };

        if dataset {
            let bytes = fs::read(dataset_path(&self.data_dir, key))
                .map_err(|e| ArchiveError::Io(format!("read local dataset: {e}")))?;
            archive.push(&Self::dataset_remote(key), &bytes)?;
        }
        if metadata {
            let bytes = fs::read(meta_path(&self.data_dir, key))
                .map_err(|e| ArchiveError::Io(format!("read local meta: {e}")))?;
            archive.push(&Self::meta_remote(key), &bytes)?;
        }
        Ok(())
    }
}
