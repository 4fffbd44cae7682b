//! In-process object storage for local development and tests.
//!
//! Presigned URLs use a `memory://` scheme and are not fetchable; stored
//! objects and open multipart uploads are kept in maps.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{StorageError, StorageResult};
use crate::object_storage::{CompletedPartInfo, MultipartUploadInfo, ObjectStorage};

/// An object held by [`MemoryStorage`].
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub content_type: String,
    pub size: u64,
    /// Parts the object was assembled from, empty for single uploads
    pub parts: Vec<CompletedPartInfo>,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<String, StoredObject>,
    uploads: HashMap<String, (MultipartUploadInfo, String)>,
}

/// Object storage backed by in-memory maps.
#[derive(Debug)]
pub struct MemoryStorage {
    bucket: String,
    state: RwLock<State>,
    next_upload: AtomicU64,
}

impl MemoryStorage {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            state: RwLock::new(State::default()),
            next_upload: AtomicU64::new(1),
        }
    }

    fn read(&self) -> StorageResult<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StorageError::AwsSdk("memory storage lock poisoned".to_string()))
    }

    fn write(&self) -> StorageResult<std::sync::RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StorageError::AwsSdk("memory storage lock poisoned".to_string()))
    }

    /// Stored object under `key`, if any.
    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.read().ok()?.objects.get(key).cloned()
    }

    /// Number of multipart uploads still open.
    pub fn open_upload_count(&self) -> usize {
        self.read().map(|s| s.uploads.len()).unwrap_or_default()
    }

    /// Register an upload opened at an arbitrary time (for reconciliation).
    pub fn insert_open_upload(&self, info: MultipartUploadInfo) -> StorageResult<()> {
        self.write()?
            .uploads
            .insert(info.upload_id.clone(), (info, "application/octet-stream".to_string()));
        Ok(())
    }

    fn url(&self, key: &str, query: &str) -> String {
        format!("memory://{}/{}?{}", self.bucket, key, query)
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        content_length: u64,
        expires_in: Duration,
    ) -> StorageResult<String> {
        Ok(self.url(
            key,
            &format!(
                "op=put&content-type={}&content-length={}&expires={}",
                content_type,
                content_length,
                expires_in.as_secs()
            ),
        ))
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        Ok(self.url(key, &format!("op=get&expires={}", expires_in.as_secs())))
    }

    async fn create_multipart_upload(&self, key: &str, content_type: &str) -> StorageResult<String> {
        let upload_id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::Relaxed));
        let info = MultipartUploadInfo {
            key: key.to_string(),
            upload_id: upload_id.clone(),
            initiated: Some(Utc::now()),
        };
        self.write()?
            .uploads
            .insert(upload_id.clone(), (info, content_type.to_string()));
        Ok(upload_id)
    }

    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires_in: Duration,
    ) -> StorageResult<String> {
        if !self.read()?.uploads.contains_key(upload_id) {
            return Err(StorageError::not_found(upload_id));
        }
        Ok(self.url(
            key,
            &format!(
                "op=upload-part&upload-id={}&part-number={}&expires={}",
                upload_id,
                part_number,
                expires_in.as_secs()
            ),
        ))
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartInfo],
    ) -> StorageResult<()> {
        let mut state = self.write()?;
        let (info, content_type) = state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| StorageError::not_found(upload_id))?;
        if info.key != key {
            state.uploads.insert(upload_id.to_string(), (info, content_type));
            return Err(StorageError::multipart_failed(upload_id, "key mismatch"));
        }
        state.objects.insert(
            key.to_string(),
            StoredObject {
                content_type,
                size: 0,
                parts: parts.to_vec(),
            },
        );
        Ok(())
    }

    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> StorageResult<()> {
        self.write()?
            .uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(upload_id))
    }

    async fn list_multipart_uploads(&self, prefix: &str) -> StorageResult<Vec<MultipartUploadInfo>> {
        let mut uploads: Vec<_> = self
            .read()?
            .uploads
            .values()
            .filter(|(info, _)| info.key.starts_with(prefix))
            .map(|(info, _)| info.clone())
            .collect();
        uploads.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(uploads)
    }

    async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<u64> {
        let size = tokio::fs::metadata(path).await?.len();
        self.write()?.objects.insert(
            key.to_string(),
            StoredObject {
                content_type: content_type.to_string(),
                size,
                parts: Vec::new(),
            },
        );
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_multipart_lifecycle() {
        let storage = MemoryStorage::new("media");
        let upload_id = storage
            .create_multipart_upload("uploads/u/videos/multipart/s.mp4", "video/mp4")
            .await
            .unwrap();
        assert_eq!(storage.open_upload_count(), 1);

        let url = storage
            .presign_upload_part("uploads/u/videos/multipart/s.mp4", &upload_id, 2, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.contains("part-number=2"));

        let parts = vec![CompletedPartInfo {
            part_number: 1,
            etag: "\"e1\"".to_string(),
        }];
        storage
            .complete_multipart_upload("uploads/u/videos/multipart/s.mp4", &upload_id, &parts)
            .await
            .unwrap();

        assert_eq!(storage.open_upload_count(), 0);
        let object = storage.object("uploads/u/videos/multipart/s.mp4").unwrap();
        assert_eq!(object.parts, parts);
        assert_eq!(object.content_type, "video/mp4");
    }

    #[tokio::test]
    async fn test_abort_unknown_upload() {
        let storage = MemoryStorage::new("media");
        let err = storage.abort_multipart_upload("k", "nope").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_upload_file_records_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        tokio::fs::write(&path, vec![0u8; 1234]).await.unwrap();

        let storage = MemoryStorage::new("media");
        let size = storage.upload_file(&path, "clips/p/c.mp4", "video/mp4").await.unwrap();
        assert_eq!(size, 1234);
        assert_eq!(storage.object("clips/p/c.mp4").unwrap().size, 1234);
    }
}
