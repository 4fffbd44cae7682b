//! Object storage seam used by the upload and clip pipelines.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;

/// A part accepted by the backend, ready to be stitched into the final object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPartInfo {
    pub part_number: u32,
    pub etag: String,
}

/// A multipart upload the backend still holds open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartUploadInfo {
    pub key: String,
    pub upload_id: String,
    pub initiated: Option<DateTime<Utc>>,
}

/// S3-compatible object storage.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Bucket all keys are resolved against.
    fn bucket(&self) -> &str;

    /// Presigned PUT bound to the given content type and length.
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        content_length: u64,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Presigned GET.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String>;

    /// Open a multipart upload and return its backend handle.
    async fn create_multipart_upload(&self, key: &str, content_type: &str) -> StorageResult<String>;

    /// Presigned PUT for one part of a multipart upload.
    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Assemble the listed parts into the final object.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartInfo],
    ) -> StorageResult<()>;

    /// Discard a multipart upload and its stored parts.
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StorageResult<()>;

    /// Multipart uploads still open under `prefix`.
    async fn list_multipart_uploads(&self, prefix: &str) -> StorageResult<Vec<MultipartUploadInfo>>;

    /// Upload a local file; returns its size in bytes.
    async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<u64>;
}
