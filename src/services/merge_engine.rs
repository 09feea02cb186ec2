//! Assembles a complete upload session into its final artifact.
//!
//! Chunks are appended strictly in index order into a temp file which is only
//! renamed into `local-files/{file_id}.wav` once fully written and synced. The
//! local copy is authoritative; the object store upload that follows is best
//! effort.

use crate::{
    models::{object::object_metadata, upload::MergeOutcome},
    services::{
        chunk_store::{ChunkError, ChunkStore, ensure_session_id_safe},
        fsutil::TMP_PREFIX,
        lookup_cache::LookupCache,
        object_store::{ObjectStoreClient, wav_key},
    },
};
use bytes::Bytes;
use chrono::Utc;
use std::{
    io,
    path::{Path, PathBuf},
    time::Instant,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncWriteExt, BufWriter},
};
use tracing::{info, warn};
use uuid::Uuid;

pub const WAV_CONTENT_TYPE: &str = "audio/wav";

#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error("totalChunks {requested} does not match the {declared} recorded for this upload")]
    TotalMismatch { requested: u32, declared: u32 },
    #[error("upload incomplete, missing chunks {missing:?}")]
    Incomplete { missing: Vec<u32> },
    #[error("manifest is complete but chunk files {missing:?} are missing on disk")]
    MissingChunkFiles { missing: Vec<u32> },
    #[error("failed to write merged file: {0}")]
    Io(#[from] io::Error),
}

/// Where the merged artifact of `file_id` lives on local disk.
pub fn artifact_path(local_files_dir: &Path, file_id: &str) -> PathBuf {
    local_files_dir.join(format!("{}.wav", file_id))
}

/// Download route serving the local artifact of `file_id`.
pub fn local_download_url(file_id: &str) -> String {
    format!("/download/{}", file_id)
}

#[derive(Clone)]
pub struct MergeEngine {
    chunks: ChunkStore,
    objects: ObjectStoreClient,
    cache: LookupCache,
    local_files_dir: PathBuf,
}

impl MergeEngine {
    pub fn new(
        chunks: ChunkStore,
        objects: ObjectStoreClient,
        cache: LookupCache,
        local_files_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            chunks,
            objects,
            cache,
            local_files_dir: local_files_dir.into(),
        }
    }

    pub async fn merge(
        &self,
        session_id: &str,
        total_chunks: u32,
        file_name: &str,
    ) -> Result<MergeOutcome, MergeError> {
        ensure_session_id_safe(session_id)?;
        let guard = self.chunks.lock_session(session_id).await;

        let manifest = self.chunks.read_manifest(session_id).await?;
        if manifest.total_chunks != total_chunks {
            return Err(MergeError::TotalMismatch {
                requested: total_chunks,
                declared: manifest.total_chunks,
            });
        }
        let missing = manifest.missing_chunks();
        if !missing.is_empty() {
            return Err(MergeError::Incomplete { missing });
        }

        let mut missing_files = Vec::new();
        for index in 0..total_chunks {
            if !fs::try_exists(self.chunks.chunk_path(session_id, index)).await? {
                missing_files.push(index);
            }
        }
        if !missing_files.is_empty() {
            return Err(MergeError::MissingChunkFiles {
                missing: missing_files,
            });
        }

        let start = Instant::now();
        let target = artifact_path(&self.local_files_dir, session_id);
        let (file_size, etag) = self.concatenate(session_id, total_chunks, &target).await?;
        info!(
            session_id = %session_id,
            chunks = total_chunks,
            size_bytes = file_size,
            etag = %etag,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "chunks merged"
        );

        let name = if file_name.trim().is_empty() {
            manifest.original_name.as_str()
        } else {
            file_name
        };
        let key = wav_key(session_id);
        let data = Bytes::from(fs::read(&target).await?);
        let r2_success = self
            .objects
            .put(
                &key,
                data,
                object_metadata(name, WAV_CONTENT_TYPE, Utc::now()),
                WAV_CONTENT_TYPE,
            )
            .await;
        if !r2_success {
            warn!(session_id = %session_id, key = %key, "object store upload failed, serving local copy only");
        }

        let remote_url = if r2_success {
            self.objects.download_url(&key).await
        } else {
            None
        };
        let download_url = remote_url.unwrap_or_else(|| local_download_url(session_id));
        self.cache.insert(session_id, download_url.clone());

        if let Err(err) = self.chunks.discard_locked(session_id, guard).await {
            warn!(session_id = %session_id, error = %err, "failed to remove staged chunks");
        }

        Ok(MergeOutcome {
            success: true,
            file_id: session_id.to_string(),
            r2_success,
            stored_locally: true,
            file_size,
            download_url,
            etag,
        })
    }

    /// Append chunks `0..total_chunks` into `target`, returning size and MD5.
    async fn concatenate(
        &self,
        session_id: &str,
        total_chunks: u32,
        target: &Path,
    ) -> io::Result<(u64, String)> {
        fs::create_dir_all(&self.local_files_dir).await?;
        let tmp_path = self
            .local_files_dir
            .join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));

        let result = async {
            let mut out = BufWriter::new(File::create(&tmp_path).await?);
            let mut digest = md5::Context::new();
            let mut size = 0u64;
            for index in 0..total_chunks {
                let bytes = fs::read(self.chunks.chunk_path(session_id, index)).await?;
                digest.consume(&bytes);
                size += bytes.len() as u64;
                out.write_all(&bytes).await?;
            }
            out.flush().await?;
            out.get_ref().sync_all().await?;
            fs::rename(&tmp_path, target).await?;
            Ok::<_, io::Error>((size, format!("{:x}", digest.compute())))
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        result
    }
}
