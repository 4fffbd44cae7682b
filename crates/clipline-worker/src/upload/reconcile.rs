//! Reconciliation of remote multipart uploads against upload sessions.
//!
//! Issuing a chunked plan opens a multipart upload on the backend whether or
//! not the client ever uploads, and local aborts do not always reach the
//! backend. This sweep aborts every open upload no live session accounts for.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use clipline_models::{UploadSession, UploadStatus};
use clipline_sessions::StatusUpdate;
use clipline_storage::{session_id_from_multipart_key, MultipartUploadInfo, StorageError, UPLOADS_PREFIX};

use crate::error::PipelineResult;
use crate::metrics;
use crate::upload::manager::UploadSessionManager;

/// Uploads younger than this are left alone even without a session; the
/// issuer opens the remote upload before it stores the session.
pub const ORPHAN_GRACE_SECS: i64 = 300;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub inspected: usize,
    pub aborted: usize,
    pub failed: usize,
    pub kept: usize,
}

fn older_than(initiated: Option<DateTime<Utc>>, age: chrono::Duration, now: DateTime<Utc>) -> bool {
    initiated.is_some_and(|at| now - at > age)
}

impl UploadSessionManager {
    /// Abort open multipart uploads whose session is missing, terminal or
    /// expired.
    pub async fn reconcile_orphaned_uploads(&self) -> PipelineResult<ReconcileReport> {
        let uploads = self.storage().list_multipart_uploads(UPLOADS_PREFIX).await?;
        let now = Utc::now();
        let mut report = ReconcileReport::default();

        for upload in uploads {
            report.inspected += 1;

            let reason = match self.abort_reason(&upload, now).await {
                Ok(reason) => reason,
                Err(e) => {
                    warn!(key = %upload.key, upload_id = %upload.upload_id, "Failed to inspect multipart upload: {}", e);
                    report.failed += 1;
                    continue;
                }
            };

            let Some(reason) = reason else {
                report.kept += 1;
                continue;
            };

            match self
                .storage()
                .abort_multipart_upload(&upload.key, &upload.upload_id)
                .await
            {
                Ok(()) | Err(StorageError::NotFound(_)) => {
                    debug!(key = %upload.key, upload_id = %upload.upload_id, reason, "Aborted orphaned multipart upload");
                    metrics::record_multipart_aborted(reason);
                    report.aborted += 1;
                }
                Err(e) => {
                    warn!(key = %upload.key, upload_id = %upload.upload_id, "Failed to abort multipart upload: {}", e);
                    report.failed += 1;
                }
            }
        }

        if report.aborted > 0 || report.failed > 0 {
            info!(
                inspected = report.inspected,
                aborted = report.aborted,
                failed = report.failed,
                "Reconciled multipart uploads"
            );
        }
        Ok(report)
    }

    /// Why `upload` should be aborted, or `None` to keep it.
    async fn abort_reason(
        &self,
        upload: &MultipartUploadInfo,
        now: DateTime<Utc>,
    ) -> PipelineResult<Option<&'static str>> {
        let Some(session_id) = session_id_from_multipart_key(&upload.key) else {
            // Not ours to track; only clear it once it is well past a session lifetime
            return Ok(older_than(upload.initiated, self.ttl(), now).then_some("untracked"));
        };

        let Some(session) = self.store().get(&session_id).await? else {
            let grace = chrono::Duration::seconds(ORPHAN_GRACE_SECS);
            let young = upload.initiated.is_some_and(|at| now - at <= grace);
            return Ok((!young).then_some("missing_session"));
        };

        if session.backend_upload_id != upload.upload_id {
            return Ok(Some("superseded"));
        }

        self.session_reason(&session, now).await
    }

    async fn session_reason(
        &self,
        session: &UploadSession,
        now: DateTime<Utc>,
    ) -> PipelineResult<Option<&'static str>> {
        match session.status {
            // Completion may still be assembling the object
            UploadStatus::Completed => Ok(None),
            UploadStatus::Initializing | UploadStatus::Uploading => {
                if !session.is_expired_at(now) {
                    return Ok(None);
                }
                let update = StatusUpdate::new(
                    UploadStatus::Expired,
                    vec![UploadStatus::Initializing, UploadStatus::Uploading],
                    now,
                );
                self.store().transition(&session.session_id, update).await?;
                Ok(Some("expired"))
            }
            UploadStatus::Failed | UploadStatus::Aborted | UploadStatus::Expired => {
                Ok(Some("terminal"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use clipline_models::{FileCategory, NewUploadSession};
    use clipline_sessions::MemorySessionStore;
    use clipline_storage::{MemoryStorage, ObjectStorage};

    fn setup(ttl: Duration) -> (UploadSessionManager, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new("media"));
        let manager =
            UploadSessionManager::new(Arc::new(MemorySessionStore::new()), storage.clone(), ttl);
        (manager, storage)
    }

    async fn open_session(
        manager: &UploadSessionManager,
        storage: &MemoryStorage,
        name: &str,
    ) -> clipline_models::SessionId {
        let session_id = clipline_models::SessionId::new();
        let key = format!("uploads/user-1/videos/multipart/{}.mp4", session_id);
        let upload_id = storage.create_multipart_upload(&key, "video/mp4").await.unwrap();
        let data = NewUploadSession {
            owner_id: "user-1".to_string(),
            file_name: name.to_string(),
            file_size: 10,
            mime_type: "video/mp4".to_string(),
            file_category: FileCategory::Video,
            total_chunks: 1,
            chunk_size: 5 * 1024 * 1024,
            backend_upload_id: upload_id,
            bucket: "media".to_string(),
            key,
        };
        manager
            .create_session_with_id(session_id, data)
            .await
            .unwrap()
            .session_id
    }

    #[tokio::test]
    async fn test_live_session_is_kept() {
        let (manager, storage) = setup(Duration::from_secs(3600));
        open_session(&manager, &storage, "a.mp4").await;

        let report = manager.reconcile_orphaned_uploads().await.unwrap();
        assert_eq!(report, ReconcileReport { inspected: 1, aborted: 0, failed: 0, kept: 1 });
        assert_eq!(storage.open_upload_count(), 1);
    }

    #[tokio::test]
    async fn test_aborted_session_upload_is_cleared() {
        let (manager, storage) = setup(Duration::from_secs(3600));
        let id = open_session(&manager, &storage, "a.mp4").await;
        manager.abort(&id, "cancelled").await.unwrap();

        let report = manager.reconcile_orphaned_uploads().await.unwrap();
        assert_eq!(report.aborted, 1);
        assert_eq!(storage.open_upload_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_session_upload_is_cleared() {
        let (manager, storage) = setup(Duration::from_millis(20));
        let id = open_session(&manager, &storage, "a.mp4").await;

        tokio::time::sleep(Duration::from_millis(50)).await;

        let report = manager.reconcile_orphaned_uploads().await.unwrap();
        assert_eq!(report.aborted, 1);
        assert_eq!(manager.progress(&id).await.unwrap().status, UploadStatus::Expired);
    }

    #[tokio::test]
    async fn test_missing_session_respects_grace() {
        let (manager, storage) = setup(Duration::from_secs(3600));
        storage
            .insert_open_upload(MultipartUploadInfo {
                key: "uploads/user-1/videos/multipart/fresh.mp4".to_string(),
                upload_id: "fresh".to_string(),
                initiated: Some(Utc::now()),
            })
            .unwrap();
        storage
            .insert_open_upload(MultipartUploadInfo {
                key: "uploads/user-1/videos/multipart/stale.mp4".to_string(),
                upload_id: "stale".to_string(),
                initiated: Some(Utc::now() - chrono::Duration::hours(1)),
            })
            .unwrap();

        let report = manager.reconcile_orphaned_uploads().await.unwrap();
        assert_eq!(report.inspected, 2);
        assert_eq!(report.aborted, 1);
        assert_eq!(report.kept, 1);
        assert_eq!(storage.open_upload_count(), 1);
    }

    #[tokio::test]
    async fn test_untracked_key_needs_full_ttl() {
        let (manager, storage) = setup(Duration::from_secs(3600));
        storage
            .insert_open_upload(MultipartUploadInfo {
                key: "uploads/user-1/videos/legacy.mp4".to_string(),
                upload_id: "legacy".to_string(),
                initiated: Some(Utc::now() - chrono::Duration::minutes(30)),
            })
            .unwrap();

        assert_eq!(manager.reconcile_orphaned_uploads().await.unwrap().kept, 1);
    }
}
