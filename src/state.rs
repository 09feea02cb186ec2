//! Shared application state handed to every handler.

use crate::{
    config::AppConfig,
    services::{
        chunk_store::ChunkStore,
        lookup_cache::LookupCache,
        merge_engine::MergeEngine,
        object_store::{ObjectBackend, ObjectStoreClient, local::LocalBackend, r2::R2Backend},
        share_registry::ShareRegistry,
        sweeper::Sweeper,
    },
};
use std::{sync::Arc, time::Duration};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub objects: ObjectStoreClient,
    pub chunks: ChunkStore,
    pub merger: MergeEngine,
    pub shares: ShareRegistry,
    pub sweeper: Sweeper,
    pub cache: LookupCache,
}

impl AppState {
    /// Wire every service on top of `backend`.
    pub fn new(config: AppConfig, backend: Arc<dyn ObjectBackend>) -> Self {
        let objects = ObjectStoreClient::new(
            backend,
            config.public_url.clone(),
            Duration::from_secs(config.presign_ttl_secs),
        );
        let cache = LookupCache::new(
            config.cache_capacity,
            Duration::from_secs(config.cache_ttl_secs),
        );
        let chunks = ChunkStore::new(config.chunks_dir(), config.max_chunk_bytes);
        let merger = MergeEngine::new(
            chunks.clone(),
            objects.clone(),
            cache.clone(),
            config.local_files_dir(),
        );
        let shares = ShareRegistry::new(
            config.shares_dir(),
            config.local_files_dir(),
            objects.clone(),
            config.ttl(),
        );
        let sweeper = Sweeper::new(
            objects.clone(),
            shares.clone(),
            chunks.clone(),
            cache.clone(),
            vec![
                config.tmp_dir.clone(),
                config.local_files_dir(),
                config.shares_dir(),
            ],
            config.ttl(),
        );

        Self {
            config: Arc::new(config),
            objects,
            chunks,
            merger,
            shares,
            sweeper,
            cache,
        }
    }

    /// R2 when credentials are configured, otherwise the on-disk backend.
    pub async fn from_config(config: AppConfig) -> Self {
        let backend: Arc<dyn ObjectBackend> = match &config.r2 {
            Some(r2) => {
                tracing::info!(bucket = %r2.bucket, endpoint = %r2.endpoint(), "using R2 object store");
                Arc::new(R2Backend::new(r2).await)
            }
            None => {
                tracing::warn!(
                    path = %config.objects_dir().display(),
                    "R2 not configured, using local object store"
                );
                Arc::new(LocalBackend::new(config.objects_dir()))
            }
        };
        Self::new(config, backend)
    }
}
