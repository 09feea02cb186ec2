//! Represents an object (blob) held by the object store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata key holding the original upload filename.
pub const META_ORIGINAL_NAME: &str = "original-name";
/// Metadata key holding the content type recorded at write time.
pub const META_CONTENT_TYPE: &str = "content-type";
/// Metadata key holding the RFC 3339 creation stamp.
///
/// This is the single clock used for expiry; `last_modified` is only consulted
/// for objects written without it.
pub const META_CREATED_AT: &str = "created-at";

/// A single object within the bucket.
///
/// Carries listing and metadata information, never the payload itself.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ObjectEntry {
    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Content type (MIME type), when known.
    pub content_type: Option<String>,

    /// MD5 checksum of the payload, when the backend reports one.
    pub etag: Option<String>,

    /// Timestamp when the object was last written.
    pub last_modified: DateTime<Utc>,

    /// User metadata attached at write time.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ObjectEntry {
    /// Timestamp the object's age is measured from.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.metadata
            .get(META_CREATED_AT)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(self.last_modified)
    }
}

/// One page of a listing.
#[derive(Debug, Default)]
pub struct ObjectPage {
    pub objects: Vec<ObjectEntry>,
    pub next_continuation_token: Option<String>,
}

/// Builds the standard metadata map stamped onto every stored object.
pub fn object_metadata(
    original_name: &str,
    content_type: &str,
    created_at: DateTime<Utc>,
) -> HashMap<String, String> {
    HashMap::from([
        (META_ORIGINAL_NAME.to_string(), original_name.to_string()),
        (META_CONTENT_TYPE.to_string(), content_type.to_string()),
        (META_CREATED_AT.to_string(), created_at.to_rfc3339()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn created_at_prefers_stamped_metadata() {
        let stamped = Utc::now() - Duration::hours(30);
        let entry = ObjectEntry {
            key: "wav/a.wav".into(),
            size_bytes: 4,
            content_type: None,
            etag: None,
            last_modified: Utc::now(),
            metadata: object_metadata("a.wav", "audio/wav", stamped),
        };
        assert_eq!(entry.created_at().timestamp(), stamped.timestamp());
    }

    #[test]
    fn created_at_falls_back_to_last_modified() {
        let modified = Utc::now();
        let entry = ObjectEntry {
            key: "wav/b.wav".into(),
            size_bytes: 4,
            content_type: None,
            etag: None,
            last_modified: modified,
            metadata: HashMap::from([(META_CREATED_AT.to_string(), "garbage".to_string())]),
        };
        assert_eq!(entry.created_at(), modified);
    }
}
