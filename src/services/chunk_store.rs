//! Filesystem staging area for chunked uploads.
//!
//! Layout: `{base}/{client_file_id}/{index}.chunk` plus `metadata.json`.
//! Every read-modify-write of a session's manifest happens under that session's
//! lock, so concurrent chunk arrivals cannot drop each other's indices.

use crate::{
    models::upload::{ChunkReceipt, UploadManifest},
    services::fsutil::{MAX_ID_LEN, is_safe_id, write_atomic},
};
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tokio::{
    fs,
    sync::{Mutex as AsyncMutex, OwnedMutexGuard},
};
use tracing::{debug, info};

pub const MANIFEST_FILE: &str = "metadata.json";

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("{0}")]
    Validation(String),
    #[error("chunk of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("upload session `{0}` not found")]
    SessionNotFound(String),
    #[error("manifest for `{session_id}` is corrupt: {source}")]
    CorruptManifest {
        session_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ChunkResult<T> = Result<T, ChunkError>;

/// Validate a client-supplied session ID as a single safe path segment.
pub fn ensure_session_id_safe(session_id: &str) -> ChunkResult<()> {
    if is_safe_id(session_id) {
        Ok(())
    } else {
        Err(ChunkError::Validation(format!(
            "invalid clientFileId `{}`: use 1-{} characters from [A-Za-z0-9_-]",
            session_id, MAX_ID_LEN
        )))
    }
}

#[derive(Clone)]
pub struct ChunkStore {
    base_path: PathBuf,
    max_chunk_bytes: usize,
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl ChunkStore {
    pub fn new(base_path: impl Into<PathBuf>, max_chunk_bytes: usize) -> Self {
        Self {
            base_path: base_path.into(),
            max_chunk_bytes,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn max_chunk_bytes(&self) -> usize {
        self.max_chunk_bytes
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.base_path.join(session_id)
    }

    pub fn chunk_path(&self, session_id: &str, index: u32) -> PathBuf {
        self.session_dir(session_id).join(format!("{}.chunk", index))
    }

    fn manifest_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(MANIFEST_FILE)
    }

    /// Acquire the exclusive lock for one upload session.
    pub async fn lock_session(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    fn forget_lock(&self, session_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        // Keep the entry while another task still holds or awaits it.
        if locks
            .get(session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(session_id);
        }
    }

    /// Store one chunk and record its index in the session manifest.
    pub async fn submit_chunk(
        &self,
        session_id: &str,
        index: u32,
        total_chunks: u32,
        original_name: &str,
        bytes: &[u8],
    ) -> ChunkResult<ChunkReceipt> {
        if bytes.len() > self.max_chunk_bytes {
            return Err(ChunkError::TooLarge {
                size: bytes.len(),
                limit: self.max_chunk_bytes,
            });
        }
        ensure_session_id_safe(session_id)?;
        if total_chunks == 0 {
            return Err(ChunkError::Validation("totalChunks must be at least 1".into()));
        }
        if index >= total_chunks {
            return Err(ChunkError::Validation(format!(
                "chunkIndex {} out of range for {} chunks",
                index, total_chunks
            )));
        }

        let _guard = self.lock_session(session_id).await;

        let mut manifest = match self.load_manifest(session_id).await {
            Ok(manifest) => manifest,
            Err(ChunkError::SessionNotFound(_)) => {
                UploadManifest::new(session_id, original_name, total_chunks)
            }
            Err(err) => return Err(err),
        };
        if manifest.total_chunks != total_chunks {
            return Err(ChunkError::Validation(format!(
                "totalChunks {} does not match the {} declared for this upload",
                total_chunks, manifest.total_chunks
            )));
        }

        write_atomic(&self.chunk_path(session_id, index), bytes).await?;

        manifest.received_chunks.insert(index);
        manifest.updated_at = Utc::now();
        let encoded = serde_json::to_vec_pretty(&manifest).map_err(io::Error::from)?;
        write_atomic(&self.manifest_path(session_id), &encoded).await?;

        debug!(
            session_id = %session_id,
            chunk_index = index,
            size_bytes = bytes.len(),
            received = manifest.received_chunks.len(),
            total = total_chunks,
            "chunk stored"
        );

        Ok(ChunkReceipt {
            success: true,
            chunk_index: index,
            received_chunks: manifest.received_chunks.len(),
            total_chunks,
            is_complete: manifest.is_complete(),
        })
    }

    /// Load the persisted manifest of a session.
    pub async fn read_manifest(&self, session_id: &str) -> ChunkResult<UploadManifest> {
        ensure_session_id_safe(session_id)?;
        self.load_manifest(session_id).await
    }

    async fn load_manifest(&self, session_id: &str) -> ChunkResult<UploadManifest> {
        let raw = match fs::read(self.manifest_path(session_id)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ChunkError::SessionNotFound(session_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&raw).map_err(|source| ChunkError::CorruptManifest {
            session_id: session_id.to_string(),
            source,
        })
    }

    /// Remove a session directory. Callers that already hold the session lock
    /// pass it in so removal happens under it.
    pub async fn discard(&self, session_id: &str) -> ChunkResult<()> {
        ensure_session_id_safe(session_id)?;
        let guard = self.lock_session(session_id).await;
        self.discard_locked(session_id, guard).await
    }

    pub async fn discard_locked(
        &self,
        session_id: &str,
        guard: OwnedMutexGuard<()>,
    ) -> ChunkResult<()> {
        let result = match fs::remove_dir_all(self.session_dir(session_id)).await {
            Ok(()) => {
                info!(session_id = %session_id, "upload session discarded");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        };
        drop(guard);
        self.forget_lock(session_id);
        result
    }

    /// Discard a session whose last activity is before `cutoff`.
    ///
    /// The manifest is read under the session lock, so a chunk that lands while
    /// the sweep waits for the lock keeps the session alive. Sessions without a
    /// readable manifest are judged by the directory mtime.
    pub async fn discard_if_stale(
        &self,
        session_id: &str,
        cutoff: DateTime<Utc>,
    ) -> ChunkResult<bool> {
        ensure_session_id_safe(session_id)?;
        let guard = self.lock_session(session_id).await;

        let last_activity = match self.load_manifest(session_id).await {
            Ok(manifest) => Some(manifest.updated_at),
            Err(err) => {
                debug!(session_id = %session_id, error = %err, "judging session by directory mtime");
                match fs::metadata(self.session_dir(session_id))
                    .await
                    .and_then(|meta| meta.modified())
                {
                    Ok(modified) => Some(DateTime::<Utc>::from(modified)),
                    Err(err) if err.kind() == ErrorKind::NotFound => None,
                    Err(err) => {
                        drop(guard);
                        self.forget_lock(session_id);
                        return Err(err.into());
                    }
                }
            }
        };

        match last_activity {
            Some(at) if at < cutoff => {
                self.discard_locked(session_id, guard).await?;
                Ok(true)
            }
            _ => {
                drop(guard);
                self.forget_lock(session_id);
                Ok(false)
            }
        }
    }

    /// IDs of every session directory currently staged.
    pub async fn session_ids(&self) -> ChunkResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut reader = match fs::read_dir(&self.base_path).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ids),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = reader.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if ensure_session_id_safe(name).is_ok() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
