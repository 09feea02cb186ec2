//! Expiry sweeper.
//!
//! Three independent passes reclaim anything older than the TTL: merged WAVs
//! in the object store, share records, and local files (merged artifacts, loose
//! temp audio and stale chunk sessions). A failure on one item is counted and
//! the pass moves on.

use crate::{
    models::{
        object::META_CREATED_AT,
        sweep::{PassSummary, SweepSummary},
    },
    services::{
        chunk_store::ChunkStore,
        fsutil::{TMP_PREFIX, created_time, remove_if_exists},
        lookup_cache::LookupCache,
        object_store::{ObjectStoreClient, WAV_PREFIX},
        share_registry::ShareRegistry,
    },
};
use chrono::{DateTime, Duration, Utc};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, info, warn};

/// File extensions the local pass is allowed to delete.
const SWEPT_EXTENSIONS: [&str; 2] = ["wav", "mp3"];

#[derive(Clone)]
pub struct Sweeper {
    objects: ObjectStoreClient,
    shares: ShareRegistry,
    chunks: ChunkStore,
    cache: LookupCache,
    local_dirs: Vec<PathBuf>,
    ttl: Duration,
}

impl Sweeper {
    /// `local_dirs` are scanned non-recursively for expired audio files and
    /// abandoned temp files.
    pub fn new(
        objects: ObjectStoreClient,
        shares: ShareRegistry,
        chunks: ChunkStore,
        cache: LookupCache,
        local_dirs: Vec<PathBuf>,
        ttl: Duration,
    ) -> Self {
        Self {
            objects,
            shares,
            chunks,
            cache,
            local_dirs,
            ttl,
        }
    }

    pub async fn sweep(&self) -> SweepSummary {
        self.sweep_at(Utc::now()).await
    }

    /// Run all passes as if the current time were `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepSummary {
        let cutoff = now - self.ttl;

        let objects = self.sweep_objects(cutoff).await;
        let shares = self.sweep_shares(now).await;
        let mut local_files = self.sweep_local_files(cutoff).await;
        self.sweep_chunk_sessions(cutoff, &mut local_files).await;
        let purged = self.cache.purge_expired();

        let summary = SweepSummary {
            started_at: now,
            cutoff,
            objects,
            shares,
            local_files,
        };
        info!(
            cutoff = %cutoff,
            objects_deleted = summary.objects.deleted,
            shares_deleted = summary.shares.deleted,
            local_deleted = summary.local_files.deleted,
            errors = summary.objects.errors + summary.shares.errors + summary.local_files.errors,
            cache_purged = purged,
            "sweep finished"
        );
        summary
    }

    async fn sweep_objects(&self, cutoff: DateTime<Utc>) -> PassSummary {
        let mut pass = PassSummary::default();
        let entries = match self.objects.list_all(WAV_PREFIX).await {
            Ok(entries) => entries,
            Err(err) => {
                pass.record_failure(format!("listing {}: {}", WAV_PREFIX, err));
                return pass;
            }
        };

        for entry in entries {
            pass.scanned += 1;
            // Listings from S3 carry no user metadata; fetch the stamp when missing.
            let created_at = if entry.metadata.contains_key(META_CREATED_AT) {
                entry.created_at()
            } else {
                match self.objects.head(&entry.key).await {
                    Some(full) => full.created_at(),
                    None => entry.last_modified,
                }
            };
            if created_at >= cutoff {
                continue;
            }
            if self.objects.delete(&entry.key).await {
                debug!(key = %entry.key, created_at = %created_at, "expired object deleted");
                pass.deleted += 1;
                if let Some(file_id) = file_id_from_key(&entry.key) {
                    self.cache.invalidate(file_id);
                }
            } else {
                pass.record_failure(format!("deleting {}", entry.key));
            }
        }
        pass
    }

    async fn sweep_shares(&self, now: DateTime<Utc>) -> PassSummary {
        let mut pass = PassSummary::default();
        let ids = match self.shares.record_ids().await {
            Ok(ids) => ids,
            Err(err) => {
                pass.record_failure(format!("listing share records: {}", err));
                return pass;
            }
        };

        for share_id in ids {
            pass.scanned += 1;
            let record = match self.shares.load(&share_id).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(err) => {
                    pass.record_failure(format!("{}: {}", share_id, err));
                    continue;
                }
            };
            if !record.is_expired_at(now) {
                continue;
            }
            match self.shares.remove(&share_id).await {
                Ok(_) => pass.deleted += 1,
                Err(err) => pass.record_failure(format!("{}: {}", share_id, err)),
            }
        }
        pass
    }

    async fn sweep_local_files(&self, cutoff: DateTime<Utc>) -> PassSummary {
        let mut pass = PassSummary::default();
        for dir in &self.local_dirs {
            if let Err(err) = self.sweep_dir(dir, cutoff, &mut pass).await {
                pass.record_failure(format!("{}: {}", dir.display(), err));
            }
        }
        pass
    }

    async fn sweep_dir(
        &self,
        dir: &Path,
        cutoff: DateTime<Utc>,
        pass: &mut PassSummary,
    ) -> std::io::Result<()> {
        let mut reader = match fs::read_dir(dir).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };

        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            if !is_sweepable(&path) {
                continue;
            }
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(err) => {
                    pass.record_failure(format!("{}: {}", path.display(), err));
                    continue;
                }
            };
            pass.scanned += 1;

            let created_at = match created_time(&meta) {
                Ok(created_at) => created_at,
                Err(err) => {
                    pass.record_failure(format!("{}: {}", path.display(), err));
                    continue;
                }
            };
            if created_at >= cutoff {
                continue;
            }
            match remove_if_exists(&path).await {
                Ok(_) => {
                    debug!(path = %path.display(), "expired local file deleted");
                    pass.deleted += 1;
                }
                Err(err) => pass.record_failure(format!("{}: {}", path.display(), err)),
            }
        }
        Ok(())
    }

    /// Staged uploads that stopped receiving chunks more than a TTL ago.
    async fn sweep_chunk_sessions(&self, cutoff: DateTime<Utc>, pass: &mut PassSummary) {
        let ids = match self.chunks.session_ids().await {
            Ok(ids) => ids,
            Err(err) => {
                pass.record_failure(format!("listing chunk sessions: {}", err));
                return;
            }
        };

        for session_id in ids {
            pass.scanned += 1;
            match self.chunks.discard_if_stale(&session_id, cutoff).await {
                Ok(true) => pass.deleted += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "failed to discard stale session");
                    pass.record_failure(format!("{}: {}", session_id, err));
                }
            }
        }
    }
}

/// Audio files, plus temp files left behind by an interrupted atomic write.
fn is_sweepable(path: &Path) -> bool {
    let is_temp = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(TMP_PREFIX));
    is_temp || has_swept_extension(path)
}

fn has_swept_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SWEPT_EXTENSIONS
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
}

/// `wav/{file_id}.wav` → `file_id`.
fn file_id_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(WAV_PREFIX)?.strip_suffix(".wav")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{object::object_metadata, share::ShareOptions},
        services::{
            fsutil::write_atomic, merge_engine::artifact_path, object_store::local::LocalBackend,
            object_store::wav_key,
        },
    };
    use bytes::Bytes;
    use std::{collections::HashMap, sync::Arc};

    struct Fixture {
        dir: tempfile::TempDir,
        objects: ObjectStoreClient,
        shares: ShareRegistry,
        chunks: ChunkStore,
        sweeper: Sweeper,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let objects = ObjectStoreClient::new(
            Arc::new(LocalBackend::new(root.join("objects"))),
            None,
            std::time::Duration::from_secs(60),
        );
        let ttl = Duration::hours(24);
        let shares = ShareRegistry::new(root.join("shares"), root.join("local-files"), objects.clone(), ttl);
        let chunks = ChunkStore::new(root.join("chunks"), 1024);
        let sweeper = Sweeper::new(
            objects.clone(),
            shares.clone(),
            chunks.clone(),
            LookupCache::new(16, std::time::Duration::from_secs(60)),
            vec![root.to_path_buf(), root.join("local-files"), root.join("shares")],
            ttl,
        );
        Fixture {
            dir,
            objects,
            shares,
            chunks,
            sweeper,
        }
    }

    async fn seed(fx: &Fixture) -> String {
        let root = fx.dir.path();
        write_atomic(&artifact_path(&root.join("local-files"), "song"), b"RIFF")
            .await
            .unwrap();
        write_atomic(&root.join("stray.mp3"), b"ID3").await.unwrap();
        write_atomic(&root.join("notes.txt"), b"keep").await.unwrap();
        fx.objects
            .put(
                &wav_key("song"),
                Bytes::from_static(b"RIFF"),
                object_metadata("song.wav", "audio/wav", Utc::now()),
                "audio/wav",
            )
            .await;
        fx.chunks.submit_chunk("pending", 0, 2, "p.wav", b"x").await.unwrap();
        fx.shares
            .create("song", ShareOptions::default())
            .await
            .unwrap()
            .share_id
    }

    #[tokio::test]
    async fn fresh_files_survive() {
        let fx = fixture();
        let share_id = seed(&fx).await;

        let summary = fx.sweeper.sweep().await;
        assert_eq!(summary.total_deleted(), 0);
        assert_eq!(summary.objects.scanned, 1);
        assert_eq!(summary.shares.scanned, 1);
        assert!(fx.shares.resolve(&share_id).await.is_ok());
    }

    #[tokio::test]
    async fn expired_entries_are_deleted_once() {
        let fx = fixture();
        let share_id = seed(&fx).await;
        let later = Utc::now() + Duration::hours(25);

        let first = fx.sweeper.sweep_at(later).await;
        assert_eq!(first.objects.deleted, 1);
        assert_eq!(first.shares.deleted, 1);
        // song.wav, stray.mp3 and the stale "pending" session.
        assert_eq!(first.local_files.deleted, 3);
        assert_eq!(first.objects.errors + first.shares.errors + first.local_files.errors, 0);

        assert!(!fx.objects.exists(&wav_key("song")).await);
        assert!(fx.shares.load(&share_id).await.unwrap().is_none());
        assert!(!fx.chunks.session_dir("pending").exists());
        assert!(fx.dir.path().join("notes.txt").exists());

        let second = fx.sweeper.sweep_at(later).await;
        assert_eq!(second.total_deleted(), 0);
    }

    #[tokio::test]
    async fn corrupt_share_record_does_not_abort_the_pass() {
        let fx = fixture();
        let share_id = seed(&fx).await;
        write_atomic(&fx.dir.path().join("shares/broken.json"), b"{not json")
            .await
            .unwrap();

        let summary = fx.sweeper.sweep_at(Utc::now() + Duration::hours(25)).await;
        assert_eq!(summary.shares.scanned, 2);
        assert_eq!(summary.shares.deleted, 1);
        assert_eq!(summary.shares.errors, 1);
        assert!(summary.shares.failures[0].starts_with("broken"));
        assert!(fx.shares.load(&share_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn object_age_comes_from_the_creation_stamp() {
        let fx = fixture();
        let old = Utc::now() - Duration::hours(48);
        fx.objects
            .put(
                &wav_key("old"),
                Bytes::from_static(b"RIFF"),
                object_metadata("old.wav", "audio/wav", old),
                "audio/wav",
            )
            .await;
        fx.objects
            .put(&wav_key("unstamped"), Bytes::from_static(b"RIFF"), HashMap::new(), "audio/wav")
            .await;

        let summary = fx.sweeper.sweep().await;
        assert_eq!(summary.objects.scanned, 2);
        assert_eq!(summary.objects.deleted, 1);
        assert!(!fx.objects.exists(&wav_key("old")).await);
        assert!(fx.objects.exists(&wav_key("unstamped")).await);
    }

    #[tokio::test]
    async fn abandoned_temp_files_are_reclaimed() {
        let fx = fixture();
        let root = fx.dir.path();
        let share_id = seed(&fx).await;
        for dir in ["local-files", "shares"] {
            fs::write(root.join(dir).join(".tmp-crashed"), b"partial").await.unwrap();
        }

        let fresh = fx.sweeper.sweep().await;
        assert_eq!(fresh.local_files.deleted, 0);
        assert!(root.join("shares/.tmp-crashed").exists());

        let later = fx.sweeper.sweep_at(Utc::now() + Duration::hours(25)).await;
        assert!(!root.join("local-files/.tmp-crashed").exists());
        assert!(!root.join("shares/.tmp-crashed").exists());
        // song.wav, stray.mp3, the stale session and both temp files.
        assert_eq!(later.local_files.deleted, 5);
        assert_eq!(later.shares.deleted, 1);
        assert!(fx.shares.load(&share_id).await.unwrap().is_none());
    }

    #[test]
    fn key_and_extension_helpers() {
        assert_eq!(file_id_from_key("wav/abc.wav"), Some("abc"));
        assert_eq!(file_id_from_key("shares/abc.json"), None);
        assert!(has_swept_extension(Path::new("/tmp/a.WAV")));
        assert!(has_swept_extension(Path::new("a.mp3")));
        assert!(!has_swept_extension(Path::new("a.json")));
        assert!(is_sweepable(Path::new("shares/.tmp-1234")));
        assert!(!is_sweepable(Path::new("shares/abc.json")));
    }
}
