//! Chunked upload sessions and merge results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Manifest of a chunked upload, persisted as `metadata.json` beside the chunks.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadManifest {
    /// Client-generated session identifier.
    pub client_file_id: String,

    /// Filename reported by the client.
    pub original_name: String,

    /// Declared number of chunks.
    pub total_chunks: u32,

    /// Indices received so far, unique and ordered.
    pub received_chunks: BTreeSet<u32>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadManifest {
    pub fn new(client_file_id: &str, original_name: &str, total_chunks: u32) -> Self {
        let now = Utc::now();
        Self {
            client_file_id: client_file_id.to_string(),
            original_name: original_name.to_string(),
            total_chunks,
            received_chunks: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.received_chunks.len() == self.total_chunks as usize
    }

    /// Indices in `[0, total_chunks)` not yet received, ascending.
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received_chunks.contains(i))
            .collect()
    }
}

/// Result of accepting one chunk.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceipt {
    pub success: bool,
    pub chunk_index: u32,
    pub received_chunks: usize,
    pub total_chunks: u32,
    pub is_complete: bool,
}

/// Result of assembling a session into its final artifact.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub success: bool,
    pub file_id: String,
    pub r2_success: bool,
    pub stored_locally: bool,
    pub file_size: u64,
    pub download_url: String,
    pub etag: String,
}
