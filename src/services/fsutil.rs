//! Small filesystem helpers shared by the disk-backed stores.

use chrono::{DateTime, Utc};
use std::{
    io::{self, ErrorKind},
    path::Path,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use uuid::Uuid;

/// Prefix of in-flight temp files; listings skip these.
pub const TMP_PREFIX: &str = ".tmp-";

/// Longest identifier accepted as a single path segment.
pub const MAX_ID_LEN: usize = 128;

/// Whether `id` is usable as a single path segment and object key fragment.
pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Write `bytes` to a sibling temp file, fsync, then rename over `target`.
///
/// Creates the parent directory if needed. The temp file is removed on failure.
pub async fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| io::Error::new(ErrorKind::Other, "target path missing parent directory"))?;
    fs::create_dir_all(parent).await?;
    let tmp_path = parent.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));

    let result = async {
        let mut file = File::create(&tmp_path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        fs::rename(&tmp_path, target).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path).await;
    }
    result
}

/// Remove a file, treating absence as success. Returns whether it existed.
pub async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Creation time of a filesystem entry, falling back to modification time on
/// platforms that do not record birth times.
pub fn created_time(meta: &std::fs::Metadata) -> io::Result<DateTime<Utc>> {
    let time = meta.created().or_else(|_| meta.modified())?;
    Ok(DateTime::<Utc>::from(time))
}
