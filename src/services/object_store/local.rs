//! On-disk object backend.
//!
//! Payloads live at `base_path/{shard}/{shard}/{key}` with a JSON sidecar
//! `{key}.meta.json` holding the [`ObjectEntry`]. Shards are the first two bytes
//! of MD5(key), which keeps directory fan-out bounded.

use super::{ObjectBackend, StorageError, StorageResult};
use crate::{
    models::object::{ObjectEntry, ObjectPage},
    services::fsutil::{TMP_PREFIX, write_atomic},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::fs;
use tracing::debug;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const META_SUFFIX: &str = ".meta.json";

#[derive(Clone, Debug)]
pub struct LocalBackend {
    /// Base directory on disk where object payloads are stored.
    base_path: PathBuf,
}

impl LocalBackend {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Rejects empty or oversized keys, absolute paths, `..` segments, control
    /// characters and keys that would collide with metadata sidecars.
    fn ensure_key_safe(key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") || key.ends_with(META_SUFFIX) {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.split('/').any(|segment| segment.starts_with(TMP_PREFIX)) {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn meta_path(object_path: &Path) -> PathBuf {
        let mut name = object_path.as_os_str().to_owned();
        name.push(META_SUFFIX);
        PathBuf::from(name)
    }

    async fn read_entry(&self, key: &str) -> StorageResult<ObjectEntry> {
        let meta_path = Self::meta_path(&self.object_path(key));
        let raw = fs::read(&meta_path).await.map_err(|err| not_found_or(err, key))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Object key of a sidecar at `{base}/{shard}/{shard}/{key}.meta.json`.
    fn key_from_meta_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base_path).ok()?;
        let segments = relative
            .components()
            .skip(2)
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?;
        let joined = segments.join("/");
        joined.strip_suffix(META_SUFFIX).map(str::to_string)
    }

    /// Sidecars whose key matches `prefix` and sorts after `after`.
    ///
    /// Shards are hashed, so the whole tree is walked on every call, but only
    /// matching sidecars are read. Unreadable sidecars are skipped.
    async fn collect_entries(
        &self,
        prefix: &str,
        after: Option<&str>,
    ) -> StorageResult<Vec<ObjectEntry>> {
        let mut entries = Vec::new();
        let mut pending = vec![self.base_path.clone()];

        while let Some(dir) = pending.pop() {
            let mut reader = match fs::read_dir(&dir).await {
                Ok(reader) => reader,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(item) = reader.next_entry().await? {
                let path = item.path();
                if item.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Some(key) = self.key_from_meta_path(&path) else {
                    continue;
                };
                if !key.starts_with(prefix) || after.is_some_and(|token| key.as_str() <= token) {
                    continue;
                }
                match fs::read(&path).await.map(|raw| serde_json::from_slice::<ObjectEntry>(&raw)) {
                    Ok(Ok(entry)) => entries.push(entry),
                    Ok(Err(err)) => debug!("skipping corrupt sidecar {}: {}", path.display(), err),
                    Err(err) => debug!("skipping unreadable sidecar {}: {}", path.display(), err),
                }
            }
        }

        Ok(entries)
    }

    /// Remove empty directories between `start` and the base path.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> StorageResult<ObjectEntry> {
        Self::ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        write_atomic(&file_path, &data).await?;

        let entry = ObjectEntry {
            key: key.to_string(),
            size_bytes: data.len() as i64,
            content_type: Some(content_type.to_string()),
            etag: Some(format!("{:x}", md5::compute(&data))),
            last_modified: Utc::now(),
            metadata,
        };
        let sidecar = serde_json::to_vec(&entry)?;
        if let Err(err) = write_atomic(&Self::meta_path(&file_path), &sidecar).await {
            let _ = fs::remove_file(&file_path).await;
            return Err(err.into());
        }

        Ok(entry)
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        Self::ensure_key_safe(key)?;
        let bytes = fs::read(self.object_path(key))
            .await
            .map_err(|err| not_found_or(err, key))?;
        Ok(Bytes::from(bytes))
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectEntry> {
        Self::ensure_key_safe(key)?;
        self.read_entry(key).await
    }

    async fn list(
        &self,
        prefix: &str,
        max_keys: usize,
        continuation_token: Option<&str>,
    ) -> StorageResult<ObjectPage> {
        let max_keys = max_keys.max(1);
        let mut rows = self.collect_entries(prefix, continuation_token).await?;
        rows.sort_by(|a, b| a.key.cmp(&b.key));

        let mut next_continuation_token = None;
        if rows.len() > max_keys {
            rows.truncate(max_keys);
            next_continuation_token = rows.last().map(|last| last.key.clone());
        }

        Ok(ObjectPage {
            objects: rows,
            next_continuation_token,
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        Self::ensure_key_safe(key)?;
        let file_path = self.object_path(key);

        for path in [Self::meta_path(&file_path), file_path.clone()] {
            match fs::remove_file(&path).await {
                Ok(_) => debug!("removed {}", path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    async fn presign(&self, _key: &str, _expires_in: Duration) -> StorageResult<String> {
        Err(StorageError::Unsupported(self.name()))
    }
}

fn not_found_or(err: io::Error, key: &str) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_and_sidecar_keys() {
        for key in ["", "/abs", "a/../b", "x.meta.json", "a\\b", "wav/.tmp-1"] {
            assert!(LocalBackend::ensure_key_safe(key).is_err(), "{key:?} accepted");
        }
        assert!(LocalBackend::ensure_key_safe("wav/abc.wav").is_ok());
    }

    #[tokio::test]
    async fn head_reports_metadata_and_etag() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        let meta = HashMap::from([("original-name".to_string(), "a.wav".to_string())]);
        backend
            .put("wav/a.wav", Bytes::from_static(b"hello"), "audio/wav", meta)
            .await
            .unwrap();

        let entry = backend.head("wav/a.wav").await.unwrap();
        assert_eq!(entry.size_bytes, 5);
        assert_eq!(entry.etag.as_deref(), Some("5d41402abc4b2a76b9719d911017c592"));
        assert_eq!(entry.metadata["original-name"], "a.wav");
        assert!(matches!(
            backend.head("wav/missing.wav").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_prunes_shard_directories() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        backend
            .put("wav/a.wav", Bytes::from_static(b"x"), "audio/wav", HashMap::new())
            .await
            .unwrap();
        backend.delete("wav/a.wav").await.unwrap();

        let mut reader = fs::read_dir(dir.path()).await.unwrap();
        assert!(reader.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_only_returns_the_requested_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        for key in ["wav/a.wav", "shares/s.json", "test/readyz-1"] {
            backend
                .put(key, Bytes::from_static(b"x"), "application/octet-stream", HashMap::new())
                .await
                .unwrap();
        }
        let share_path = LocalBackend::meta_path(&backend.object_path("shares/s.json"));
        assert_eq!(backend.key_from_meta_path(&share_path).as_deref(), Some("shares/s.json"));
        assert_eq!(backend.key_from_meta_path(&backend.object_path("shares/s.json")), None);

        let page = backend.list("shares/", 10, None).await.unwrap();
        let keys: Vec<_> = page.objects.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["shares/s.json"]);
    }

    #[tokio::test]
    async fn list_paginates_with_continuation_token() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        for name in ["c", "a", "b"] {
            backend
                .put(&format!("wav/{name}.wav"), Bytes::from_static(b"x"), "audio/wav", HashMap::new())
                .await
                .unwrap();
        }

        let first = backend.list("wav/", 2, None).await.unwrap();
        let keys: Vec<_> = first.objects.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["wav/a.wav", "wav/b.wav"]);
        let token = first.next_continuation_token.expect("truncated");

        let second = backend.list("wav/", 2, Some(&token)).await.unwrap();
        assert_eq!(second.objects.len(), 1);
        assert_eq!(second.objects[0].key, "wav/c.wav");
        assert!(second.next_continuation_token.is_none());
    }
}
