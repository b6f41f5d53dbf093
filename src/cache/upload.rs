//! Source file → remote handle cache, anchored on content hashes.
//!
//! Resolution order for [`UploadCache::get_or_create_handle`]:
//!
//! 1. In-memory map, valid while the file hash is unchanged.
//! 2. Persisted record, valid iff the recomputed hash matches the stored
//!    hash **and** the remote handle still reports `active`.
//! 3. Upload, wait for the handle to leave `processing`, persist the record.
//!
//! Modification times are never consulted; sync tools rewrite them freely.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::hash_file;
use crate::config::ProviderConfig;
use crate::error::{ProviderError, Result, TriageError};
use crate::models::{HandleState, KnowledgeSource, RemoteHandle, SourceKind};
use crate::provider::FileStore;
use crate::registry::LazyRegistry;

/// The persisted record, one JSON file per source key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub source_key: String,
    pub content_hash: String,
    pub handle_id: String,
    pub display_name: String,
}

struct MemoryEntry {
    content_hash: String,
    handle: RemoteHandle,
}

pub struct UploadCache {
    registry: Arc<LazyRegistry>,
    file_store: Arc<dyn FileStore>,
    records_dir: PathBuf,
    memory: Mutex<HashMap<String, MemoryEntry>>,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

impl UploadCache {
    pub fn new(
        registry: Arc<LazyRegistry>,
        file_store: Arc<dyn FileStore>,
        records_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            file_store,
            records_dir: records_dir.into(),
            memory: Mutex::new(HashMap::new()),
            poll_interval: Duration::from_secs(2),
            max_poll_attempts: 30,
        }
    }

    /// Override how often and how long to wait for `processing` handles.
    pub fn with_polling(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.poll_interval = interval;
        self.max_poll_attempts = max_attempts.max(1);
        self
    }

    pub fn with_provider_config(self, config: &ProviderConfig) -> Self {
        self.with_polling(
            Duration::from_millis(config.poll_interval_ms),
            config.max_poll_attempts,
        )
    }

    fn memory(&self) -> MutexGuard<'_, HashMap<String, MemoryEntry>> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return an active handle for `source_key`, uploading only when the
    /// content changed or the previous handle is gone.
    ///
    /// # Errors
    ///
    /// - [`TriageError::SourceNotFound`] for an unknown key.
    /// - [`TriageError::UnsupportedSource`] for repository sources.
    /// - [`TriageError::FileMissing`] if the registered file vanished.
    /// - [`TriageError::Provider`] if the upload fails or never activates.
    pub async fn get_or_create_handle(&self, source_key: &str) -> Result<RemoteHandle> {
        let source = self
            .registry
            .get(source_key)
            .cloned()
            .ok_or_else(|| TriageError::SourceNotFound(source_key.to_string()))?;

        if source.kind == SourceKind::Repository {
            return Err(TriageError::UnsupportedSource(source_key.to_string()));
        }

        if !source.location.is_file() {
            return Err(TriageError::FileMissing {
                key: source_key.to_string(),
                path: source.location.clone(),
            });
        }

        let content_hash = hash_file_blocking(source.location.clone()).await?;

        let memory_hit = self
            .memory()
            .get(source_key)
            .filter(|entry| entry.content_hash == content_hash)
            .map(|entry| entry.handle.clone());
        if let Some(handle) = memory_hit {
            tracing::debug!(source_key, handle = %handle.id, "upload cache memory hit");
            return Ok(handle);
        }

        if let Some(handle) = self.persisted_handle(source_key, &content_hash).await {
            self.remember(source_key, &content_hash, &handle);
            return Ok(handle);
        }

        let handle = self.upload(&source).await?;
        self.remember(source_key, &content_hash, &handle);

        let record = UploadRecord {
            source_key: source_key.to_string(),
            content_hash,
            handle_id: handle.id.clone(),
            display_name: source.display_name.clone(),
        };
        if let Err(e) = self.write_record(&record) {
            tracing::warn!(source_key, error = %e, "failed to persist upload record");
        }

        Ok(handle)
    }

    /// Drop the in-memory entry and the persisted record for a source.
    pub fn invalidate(&self, source_key: &str) {
        self.memory().remove(source_key);
        let path = self.record_path(source_key);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(source_key, error = %e, "failed to remove upload record");
            }
        }
    }

    /// Read the persisted record for a source, treating corruption as absent.
    pub fn read_record(&self, source_key: &str) -> Option<UploadRecord> {
        let path = self.record_path(source_key);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<UploadRecord>(&content) {
            Ok(record) if record.source_key == source_key => Some(record),
            Ok(_) => {
                tracing::warn!(source_key, path = %path.display(), "upload record belongs to another source");
                None
            }
            Err(e) => {
                tracing::warn!(source_key, path = %path.display(), error = %e, "corrupt upload record");
                None
            }
        }
    }

    fn remember(&self, source_key: &str, content_hash: &str, handle: &RemoteHandle) {
        self.memory().insert(
            source_key.to_string(),
            MemoryEntry {
                content_hash: content_hash.to_string(),
                handle: handle.clone(),
            },
        );
    }

    async fn persisted_handle(&self, source_key: &str, content_hash: &str) -> Option<RemoteHandle> {
        let record = self.read_record(source_key)?;

        if record.content_hash != content_hash {
            tracing::info!(source_key, "source content changed, re-uploading");
            return None;
        }

        match self.file_store.get(&record.handle_id).await {
            Ok(handle) if handle.is_active() => {
                tracing::debug!(source_key, handle = %handle.id, "upload cache record hit");
                Some(handle)
            }
            Ok(handle) => {
                tracing::info!(source_key, handle = %handle.id, state = ?handle.state, "cached handle not active, re-uploading");
                None
            }
            Err(e) => {
                tracing::info!(source_key, error = %e, "cached handle liveness check failed, re-uploading");
                None
            }
        }
    }

    async fn upload(&self, source: &KnowledgeSource) -> Result<RemoteHandle> {
        tracing::info!(source_key = %source.key, path = %source.location.display(), "uploading source");
        let handle = self
            .file_store
            .upload(&source.location, &source.display_name)
            .await?;
        self.wait_until_ready(handle).await
    }

    async fn wait_until_ready(&self, mut handle: RemoteHandle) -> Result<RemoteHandle> {
        for _ in 0..self.max_poll_attempts {
            match handle.state {
                HandleState::Active => return Ok(handle),
                HandleState::Failed => {
                    return Err(ProviderError::Fatal(format!(
                        "remote processing failed for {}",
                        handle.id
                    ))
                    .into())
                }
                HandleState::Processing => {
                    tokio::time::sleep(self.poll_interval).await;
                    handle = self.file_store.get(&handle.id).await?;
                }
            }
        }

        if handle.is_active() {
            return Ok(handle);
        }
        Err(ProviderError::Transient(format!(
            "{} still processing after {} polls",
            handle.id, self.max_poll_attempts
        ))
        .into())
    }

    fn record_path(&self, source_key: &str) -> PathBuf {
        self.records_dir.join(format!("{}.json", sanitize_key(source_key)))
    }

    fn write_record(&self, record: &UploadRecord) -> Result<()> {
        std::fs::create_dir_all(&self.records_dir)?;
        let path = self.record_path(&record.source_key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(record)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// File-name-safe form of a source key (`guidelines/ada` → `guidelines__ada`).
fn sanitize_key(key: &str) -> String {
    key.replace(['/', '\\'], "__")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn hash_file_blocking(path: PathBuf) -> Result<String> {
    let hashed = tokio::task::spawn_blocking(move || hash_file(Path::new(&path)))
        .await
        .map_err(|e| TriageError::Io(std::io::Error::other(e)))?;
    Ok(hashed?)
}
