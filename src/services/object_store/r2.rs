//! Cloudflare R2 backend over the S3 API.

use super::{ObjectBackend, StorageError, StorageResult};
use crate::{
    config::R2Config,
    models::object::{ObjectEntry, ObjectPage},
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, retry::RetryConfig};
use aws_sdk_s3::{
    Client,
    config::Credentials,
    error::SdkError,
    operation::{get_object::GetObjectError, head_object::HeadObjectError},
    presigning::PresigningConfig,
    primitives::{ByteStream, DateTime as AwsDateTime},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, time::Duration};

/// R2 only accepts the pseudo-region `auto`.
const R2_REGION: &str = "auto";

#[derive(Clone)]
pub struct R2Backend {
    client: Client,
    bucket: String,
}

impl R2Backend {
    pub async fn new(cfg: &R2Config) -> Self {
        let credentials = Credentials::new(
            cfg.access_key_id.clone(),
            cfg.secret_access_key.clone(),
            None,
            None,
            "r2-static",
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(R2_REGION))
            .endpoint_url(cfg.endpoint())
            .credentials_provider(credentials)
            .retry_config(RetryConfig::standard().with_max_attempts(3))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: cfg.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectBackend for R2Backend {
    fn name(&self) -> &'static str {
        "r2"
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> StorageResult<ObjectEntry> {
        let size_bytes = data.len() as i64;
        let etag = format!("{:x}", md5::compute(&data));

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .set_metadata(Some(metadata.clone()))
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(ObjectEntry {
            key: key.to_string(),
            size_bytes,
            content_type: Some(content_type.to_string()),
            etag: Some(etag),
            last_modified: Utc::now(),
            metadata,
        })
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match &e {
                SdkError::ServiceError(service_err)
                    if matches!(service_err.err(), GetObjectError::NoSuchKey(_)) =>
                {
                    StorageError::NotFound(key.to_string())
                }
                _ => StorageError::Backend(e.to_string()),
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(data.into_bytes())
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectEntry> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match &e {
                SdkError::ServiceError(service_err)
                    if matches!(service_err.err(), HeadObjectError::NotFound(_)) =>
                {
                    StorageError::NotFound(key.to_string())
                }
                _ => StorageError::Backend(e.to_string()),
            })?;

        Ok(ObjectEntry {
            key: key.to_string(),
            size_bytes: response.content_length().unwrap_or(0),
            content_type: response.content_type().map(str::to_string),
            etag: response.e_tag().map(|t| t.trim_matches('"').to_string()),
            last_modified: to_chrono(response.last_modified()),
            metadata: response.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn list(
        &self,
        prefix: &str,
        max_keys: usize,
        continuation_token: Option<&str>,
    ) -> StorageResult<ObjectPage> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(max_keys as i32)
            .set_continuation_token(continuation_token.map(str::to_string))
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|obj| {
                Some(ObjectEntry {
                    key: obj.key()?.to_string(),
                    size_bytes: obj.size().unwrap_or(0),
                    content_type: None,
                    etag: obj.e_tag().map(|t| t.trim_matches('"').to_string()),
                    last_modified: to_chrono(obj.last_modified()),
                    metadata: HashMap::new(),
                })
            })
            .collect();

        let next_continuation_token = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ObjectPage {
            objects,
            next_continuation_token,
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn presign(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(request.uri().to_string())
    }
}

/// Listing timestamps are optional in the SDK; treat missing ones as "now" so
/// the object is never considered stale by accident.
fn to_chrono(value: Option<&AwsDateTime>) -> DateTime<Utc> {
    value
        .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
        .unwrap_or_else(Utc::now)
}
