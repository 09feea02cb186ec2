//! Object store access.
//!
//! `ObjectBackend` is the seam between the application and a concrete bucket:
//! [`r2::R2Backend`] talks to Cloudflare R2 (or any S3-compatible endpoint) and
//! [`local::LocalBackend`] keeps objects on disk when no bucket is configured.
//!
//! Callers go through [`ObjectStoreClient`], which never surfaces backend errors:
//! failures are logged and reported as `false` / `None` so uploads can fall back
//! to the local copy.

pub mod local;
pub mod r2;

use crate::models::object::{ObjectEntry, ObjectPage};
use async_trait::async_trait;
use bytes::Bytes;
use std::{collections::HashMap, io, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Key prefix of merged WAV files.
pub const WAV_PREFIX: &str = "wav/";
/// Key prefix of mirrored share records.
pub const SHARES_PREFIX: &str = "shares/";
/// Key prefix reserved for diagnostics.
pub const TEST_PREFIX: &str = "test/";

/// Largest page requested from a backend.
pub const MAX_LIST_KEYS: usize = 1000;

pub fn wav_key(file_id: &str) -> String {
    format!("{}{}.wav", WAV_PREFIX, file_id)
}

pub fn share_key(share_id: &str) -> String {
    format!("{}{}.json", SHARES_PREFIX, share_id)
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("operation not supported by the {0} backend")]
    Unsupported(&'static str),
    #[error("object store request failed: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> StorageResult<ObjectEntry>;

    /// Returns `StorageError::NotFound` for absent keys.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Returns `StorageError::NotFound` for absent keys.
    async fn head(&self, key: &str) -> StorageResult<ObjectEntry>;

    /// One page of keys under `prefix`, in ascending key order.
    async fn list(
        &self,
        prefix: &str,
        max_keys: usize,
        continuation_token: Option<&str>,
    ) -> StorageResult<ObjectPage>;

    /// Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn presign(&self, key: &str, expires_in: Duration) -> StorageResult<String>;
}

/// Infallible facade over an [`ObjectBackend`].
#[derive(Clone)]
pub struct ObjectStoreClient {
    backend: Arc<dyn ObjectBackend>,
    public_url: Option<String>,
    presign_ttl: Duration,
    page_size: usize,
}

impl ObjectStoreClient {
    pub fn new(
        backend: Arc<dyn ObjectBackend>,
        public_url: Option<String>,
        presign_ttl: Duration,
    ) -> Self {
        Self {
            backend,
            public_url,
            presign_ttl,
            page_size: MAX_LIST_KEYS,
        }
    }

    /// Page size used by [`ObjectStoreClient::list_all`].
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, MAX_LIST_KEYS);
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Store `data` under `key`. Returns whether the write landed.
    pub async fn put(
        &self,
        key: &str,
        data: Bytes,
        metadata: HashMap<String, String>,
        content_type: &str,
    ) -> bool {
        let size = data.len();
        let start = std::time::Instant::now();
        match self.backend.put(key, data, content_type, metadata).await {
            Ok(_) => {
                debug!(
                    backend = self.backend.name(),
                    key = %key,
                    size_bytes = size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "object stored"
                );
                true
            }
            Err(err) => {
                error!(
                    backend = self.backend.name(),
                    key = %key,
                    size_bytes = size,
                    error = %err,
                    "object upload failed"
                );
                false
            }
        }
    }

    /// Fetch an object's bytes. Absence and transport failure both yield `None`.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        match self.backend.get(key).await {
            Ok(bytes) => Some(bytes),
            Err(StorageError::NotFound(_)) => None,
            Err(err) => {
                error!(backend = self.backend.name(), key = %key, error = %err, "object download failed");
                None
            }
        }
    }

    pub async fn head(&self, key: &str) -> Option<ObjectEntry> {
        match self.backend.head(key).await {
            Ok(entry) => Some(entry),
            Err(StorageError::NotFound(_)) => None,
            Err(err) => {
                warn!(backend = self.backend.name(), key = %key, error = %err, "object head failed");
                None
            }
        }
    }

    /// Exact-key existence check.
    pub async fn exists(&self, key: &str) -> bool {
        self.head(key).await.is_some()
    }

    /// First page of up to `max_keys` entries under `prefix`.
    pub async fn list(&self, prefix: &str, max_keys: usize) -> Vec<ObjectEntry> {
        match self
            .backend
            .list(prefix, max_keys.clamp(1, MAX_LIST_KEYS), None)
            .await
        {
            Ok(page) => page.objects,
            Err(err) => {
                error!(backend = self.backend.name(), prefix = %prefix, error = %err, "object listing failed");
                Vec::new()
            }
        }
    }

    /// Every entry under `prefix`, following continuation tokens.
    ///
    /// Unlike the other methods this propagates failures, so a sweep can tell
    /// an empty bucket from an unreachable one.
    pub async fn list_all(&self, prefix: &str) -> StorageResult<Vec<ObjectEntry>> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .backend
                .list(prefix, self.page_size, token.as_deref())
                .await?;
            objects.extend(page.objects);
            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(objects)
    }

    /// Remove `key`. Returns whether the delete succeeded.
    pub async fn delete(&self, key: &str) -> bool {
        match self.backend.delete(key).await {
            Ok(()) => true,
            Err(err) => {
                error!(backend = self.backend.name(), key = %key, error = %err, "object delete failed");
                false
            }
        }
    }

    /// Time-limited access URL, or `None` when the backend cannot sign.
    pub async fn presign(&self, key: &str) -> Option<String> {
        match self.backend.presign(key, self.presign_ttl).await {
            Ok(url) => Some(url),
            Err(StorageError::Unsupported(_)) => None,
            Err(err) => {
                warn!(backend = self.backend.name(), key = %key, error = %err, "presign failed");
                None
            }
        }
    }

    /// Permanent URL under the configured public base, if any.
    pub fn public_url(&self, key: &str) -> Option<String> {
        self.public_url
            .as_ref()
            .map(|base| format!("{}/{}", base, key))
    }

    /// Best URL for downloading `key` straight from the bucket.
    pub async fn download_url(&self, key: &str) -> Option<String> {
        match self.public_url(key) {
            Some(url) => Some(url),
            None => self.presign(key).await,
        }
    }
}
