//! Ephemeral, use-limited download entries.
//!
//! Handlers register an entry while executing a request (typically "prepare a
//! file, hand back its key"); the transport's `/download` endpoint later pulls
//! it by key. An entry dies once it has been pulled `limit` times or once
//! `lifetime` has elapsed since it was created, whichever comes first. A
//! periodic sweep drops dead entries.

use crate::config::ProtocolConfig;
use crate::{lock_unpoisoned, LerpcError, Result};
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Where an entry's bytes come from. Read lazily on every pull.
#[derive(Debug, Clone)]
pub enum DownloadSource {
    File(PathBuf),
    Bytes(Bytes),
}

impl DownloadSource {
    /// Read the full payload.
    pub async fn read(&self) -> Result<Bytes> {
        match self {
            DownloadSource::File(path) => tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(|e| LerpcError::io_with_path(e, path)),
            DownloadSource::Bytes(data) => Ok(data.clone()),
        }
    }
}

/// A registered download.
#[derive(Debug, Clone)]
pub struct DownloadEntry {
    key: String,
    lifetime: Duration,
    limit: u32,
    uses: u32,
    created: Instant,
    content_type: String,
    source: DownloadSource,
    delete_on_expire: bool,
}

impl DownloadEntry {
    /// Entry with the protocol default lifetime and use limit.
    pub fn new(key: impl Into<String>, content_type: impl Into<String>, source: DownloadSource) -> Self {
        Self {
            key: key.into(),
            lifetime: ProtocolConfig::DOWNLOAD_LIFETIME,
            limit: ProtocolConfig::DOWNLOAD_LIMIT,
            uses: 0,
            created: Instant::now(),
            content_type: content_type.into(),
            source,
            delete_on_expire: false,
        }
    }

    pub fn file(
        key: impl Into<String>,
        content_type: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self::new(key, content_type, DownloadSource::File(path.into()))
    }

    pub fn bytes(
        key: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self::new(key, content_type, DownloadSource::Bytes(data.into()))
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Remove the backing file when the sweep drops this entry.
    pub fn delete_on_expire(mut self, delete: bool) -> Self {
        self.delete_on_expire = delete;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn uses(&self) -> u32 {
        self.uses
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn source(&self) -> &DownloadSource {
        &self.source
    }

    /// Dead once `uses >= limit` or `lifetime` has elapsed.
    pub fn is_alive(&self) -> bool {
        self.uses < self.limit && self.created.elapsed() < self.lifetime
    }
}

/// Bytes returned by a successful pull.
#[derive(Debug, Clone)]
pub struct DownloadPayload {
    pub content_type: String,
    pub data: Bytes,
}

/// Registry of live download entries.
#[derive(Debug)]
pub struct DownloadRegistry {
    entries: Mutex<Vec<DownloadEntry>>,
    default_lifetime: Duration,
    default_limit: u32,
}

impl Default for DownloadRegistry {
    fn default() -> Self {
        Self::new(ProtocolConfig::DOWNLOAD_LIFETIME, ProtocolConfig::DOWNLOAD_LIMIT)
    }
}

impl DownloadRegistry {
    /// Registry whose [`register`](Self::register) uses the given defaults.
    pub fn new(default_lifetime: Duration, default_limit: u32) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            default_lifetime,
            default_limit,
        }
    }

    pub fn default_lifetime(&self) -> Duration {
        self.default_lifetime
    }

    pub fn default_limit(&self) -> u32 {
        self.default_limit
    }

    /// Add a fully configured entry.
    pub fn add(&self, entry: DownloadEntry) {
        debug!(
            "Registering download {} ({}, limit {}, lifetime {:?})",
            entry.key, entry.content_type, entry.limit, entry.lifetime
        );
        lock_unpoisoned(&self.entries).push(entry);
    }

    /// Add an entry using this registry's default lifetime and use limit.
    pub fn register(
        &self,
        key: impl Into<String>,
        content_type: impl Into<String>,
        source: DownloadSource,
    ) {
        self.add(
            DownloadEntry::new(key, content_type, source)
                .with_lifetime(self.default_lifetime)
                .with_limit(self.default_limit),
        );
    }

    /// Whether a live entry is registered under `key`.
    pub fn is_alive(&self, key: &str) -> bool {
        lock_unpoisoned(&self.entries)
            .iter()
            .any(|entry| entry.key == key && entry.is_alive())
    }

    /// Count one use of the first live entry for `key` and read its bytes.
    ///
    /// Returns `Ok(None)` when no live entry exists.
    pub async fn pull(&self, key: &str) -> Result<Option<DownloadPayload>> {
        let found = {
            let mut entries = lock_unpoisoned(&self.entries);
            entries
                .iter_mut()
                .find(|entry| entry.key == key && entry.is_alive())
                .map(|entry| {
                    entry.uses += 1;
                    (entry.content_type.clone(), entry.source.clone())
                })
        };

        let Some((content_type, source)) = found else {
            return Ok(None);
        };

        let data = source.read().await?;
        Ok(Some(DownloadPayload { content_type, data }))
    }

    /// Drop dead entries. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let expired: Vec<DownloadEntry> = {
            let mut entries = lock_unpoisoned(&self.entries);
            let (alive, dead): (Vec<_>, Vec<_>) =
                entries.drain(..).partition(|entry| entry.is_alive());
            *entries = alive;
            dead
        };

        for entry in &expired {
            if !entry.delete_on_expire {
                continue;
            }
            if let DownloadSource::File(path) = &entry.source {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!("Failed to remove expired download {}: {}", path.display(), e);
                }
            }
        }

        if !expired.is_empty() {
            debug!("Swept {} expired downloads", expired.len());
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
