//! Share records: `shares/{share_id}.json` on disk, mirrored to the object store.
//!
//! A record's lifetime is always `created_at + ttl`. The stored `expires_at` is
//! informational and is recomputed every time a record is loaded.

use crate::{
    models::{
        object::object_metadata,
        share::{ResolvedShare, ShareOptions, ShareRecord},
    },
    services::{
        fsutil::{TMP_PREFIX, is_safe_id, remove_if_exists, write_atomic},
        merge_engine::{artifact_path, local_download_url},
        object_store::{ObjectStoreClient, SHARES_PREFIX, StorageError, share_key, wav_key},
    },
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind},
    path::PathBuf,
};
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("share `{0}` not found")]
    NotFound(String),
    #[error("share `{0}` has expired")]
    Expired(String),
    #[error("file `{0}` not found")]
    FileNotFound(String),
    #[error("invalid file id `{0}`")]
    InvalidFileId(String),
    #[error("share record `{share_id}` is corrupt: {source}")]
    Corrupt {
        share_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ShareResult<T> = Result<T, ShareError>;

/// 22 URL-safe characters from a random UUID.
fn generate_share_id() -> String {
    URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes())
}

#[derive(Clone)]
pub struct ShareRegistry {
    dir: PathBuf,
    local_files_dir: PathBuf,
    objects: ObjectStoreClient,
    ttl: Duration,
}

impl ShareRegistry {
    pub fn new(
        dir: impl Into<PathBuf>,
        local_files_dir: impl Into<PathBuf>,
        objects: ObjectStoreClient,
        ttl: Duration,
    ) -> Self {
        Self {
            dir: dir.into(),
            local_files_dir: local_files_dir.into(),
            objects,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn record_path(&self, share_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", share_id))
    }

    async fn has_local_file(&self, file_id: &str) -> io::Result<bool> {
        fs::try_exists(artifact_path(&self.local_files_dir, file_id)).await
    }

    pub async fn create(&self, file_id: &str, options: ShareOptions) -> ShareResult<ShareRecord> {
        self.create_at(file_id, options, Utc::now()).await
    }

    /// Register a share for `file_id`, stamped at `now`.
    ///
    /// The file must be reachable somewhere: on local disk, under its exact
    /// object key (unless `local_only`), or through a recorded direct URL.
    pub async fn create_at(
        &self,
        file_id: &str,
        options: ShareOptions,
        now: DateTime<Utc>,
    ) -> ShareResult<ShareRecord> {
        if !is_safe_id(file_id) {
            return Err(ShareError::InvalidFileId(file_id.to_string()));
        }
        let reachable = self.has_local_file(file_id).await?
            || (!options.local_only && self.objects.exists(&wav_key(file_id)).await)
            || options.direct_url.is_some();
        if !reachable {
            return Err(ShareError::FileNotFound(file_id.to_string()));
        }

        let share_id = generate_share_id();
        let record = ShareRecord {
            share_id: share_id.clone(),
            file_id: file_id.to_string(),
            file_name: options.file_name,
            created_at: now,
            expires_at: now,
            local_only: options.local_only,
            direct_url: options.direct_url,
        }
        .with_ttl(self.ttl);

        let encoded = serde_json::to_vec_pretty(&record).map_err(io::Error::from)?;
        write_atomic(&self.record_path(&share_id), &encoded).await?;

        let mirrored = self
            .objects
            .put(
                &share_key(&share_id),
                Bytes::from(encoded),
                object_metadata(&format!("{}.json", share_id), JSON_CONTENT_TYPE, now),
                JSON_CONTENT_TYPE,
            )
            .await;
        if !mirrored {
            warn!(share_id = %share_id, "share record kept locally only");
        }

        info!(share_id = %share_id, file_id = %file_id, expires_at = %record.expires_at, "share created");
        Ok(record)
    }

    /// Load a record from disk, falling back to the object store mirror.
    pub async fn load(&self, share_id: &str) -> ShareResult<Option<ShareRecord>> {
        if !is_safe_id(share_id) {
            return Ok(None);
        }
        let raw = match fs::read(self.record_path(share_id)).await {
            Ok(raw) => Bytes::from(raw),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                match self.objects.get(&share_key(share_id)).await {
                    Some(raw) => raw,
                    None => return Ok(None),
                }
            }
            Err(err) => return Err(err.into()),
        };
        let record: ShareRecord =
            serde_json::from_slice(&raw).map_err(|source| ShareError::Corrupt {
                share_id: share_id.to_string(),
                source,
            })?;
        Ok(Some(record.with_ttl(self.ttl)))
    }

    pub async fn resolve(&self, share_id: &str) -> ShareResult<ResolvedShare> {
        self.resolve_at(share_id, Utc::now()).await
    }

    /// Resolve a live share into its record and a download URL.
    pub async fn resolve_at(
        &self,
        share_id: &str,
        now: DateTime<Utc>,
    ) -> ShareResult<ResolvedShare> {
        let record = self
            .load(share_id)
            .await?
            .ok_or_else(|| ShareError::NotFound(share_id.to_string()))?;
        if record.is_expired_at(now) {
            return Err(ShareError::Expired(share_id.to_string()));
        }

        let download_url = if self.has_local_file(&record.file_id).await? {
            Some(local_download_url(&record.file_id))
        } else if !record.local_only && self.objects.exists(&wav_key(&record.file_id)).await {
            let remote = self.objects.download_url(&wav_key(&record.file_id)).await;
            Some(remote.unwrap_or_else(|| local_download_url(&record.file_id)))
        } else {
            record.direct_url.clone()
        };

        match download_url {
            Some(download_url) => Ok(ResolvedShare {
                record,
                download_url,
            }),
            None => Err(ShareError::FileNotFound(record.file_id)),
        }
    }

    /// Delete a share locally and remotely. Returns whether a local record existed.
    pub async fn remove(&self, share_id: &str) -> ShareResult<bool> {
        if !is_safe_id(share_id) {
            return Ok(false);
        }
        let existed = remove_if_exists(&self.record_path(share_id)).await?;
        if !self.objects.delete(&share_key(share_id)).await {
            warn!(share_id = %share_id, "failed to delete mirrored share record");
        }
        info!(share_id = %share_id, existed, "share removed");
        Ok(existed)
    }

    /// IDs of every persisted record, local or mirrored.
    pub async fn record_ids(&self) -> ShareResult<Vec<String>> {
        let mut ids = BTreeSet::new();

        match fs::read_dir(&self.dir).await {
            Ok(mut reader) => {
                while let Some(entry) = reader.next_entry().await? {
                    let name = entry.file_name();
                    let Some(name) = name.to_str() else { continue };
                    if name.starts_with(TMP_PREFIX) {
                        continue;
                    }
                    if let Some(id) = name.strip_suffix(".json") {
                        ids.insert(id.to_string());
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        for entry in self.objects.list_all(SHARES_PREFIX).await? {
            if let Some(id) = entry
                .key
                .strip_prefix(SHARES_PREFIX)
                .and_then(|rest| rest.strip_suffix(".json"))
            {
                ids.insert(id.to_string());
            }
        }

        Ok(ids.into_iter().filter(|id| is_safe_id(id)).collect())
    }
}
