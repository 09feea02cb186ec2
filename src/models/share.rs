//! Share links and their fixed lifetime.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A persisted share, stored as `shares/{share_id}.json`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShareRecord {
    pub share_id: String,
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Informational copy of `created_at + ttl`; recomputed on every load.
    pub expires_at: DateTime<Utc>,
    /// The file lives only on local disk, never in the object store.
    #[serde(default)]
    pub local_only: bool,
    /// Externally reachable URL recorded when the share was created.
    #[serde(default)]
    pub direct_url: Option<String>,
}

impl ShareRecord {
    /// Realign `expires_at` with `created_at`.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = self.created_at + ttl;
        self
    }

    /// Exactly at `expires_at` the share is still valid.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Options accepted when creating a share.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ShareOptions {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub local_only: bool,
    #[serde(default)]
    pub direct_url: Option<String>,
}

/// A live share together with where its file can be fetched.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedShare {
    #[serde(flatten)]
    pub record: ShareRecord,
    pub download_url: String,
}
