//! Upload session lifecycle.
//!
//! The manager owns the lifecycle rules on top of an [`UploadSessionStore`]:
//! expiry is applied before any read or mutation, chunk reports never touch
//! terminal sessions, and completion requires every part.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use clipline_models::{
    ChunkInfo, NewUploadSession, SessionId, UploadProgress, UploadSession, UploadStatus,
};
use clipline_sessions::{ChunkWrite, StatusUpdate, Transition, UploadSessionStore};
use clipline_storage::{locator_for, CompletedPartInfo, ObjectStorage, StorageError};

use crate::error::{PipelineError, PipelineResult};
use crate::metrics;

/// Statuses that become EXPIRED once past `expires_at`, on read or by sweep.
const EXPIRABLE: [UploadStatus; 3] = [
    UploadStatus::Initializing,
    UploadStatus::Uploading,
    UploadStatus::Failed,
];

const ACTIVE: [UploadStatus; 2] = [UploadStatus::Initializing, UploadStatus::Uploading];

/// Manages resumable upload sessions.
pub struct UploadSessionManager {
    store: Arc<dyn UploadSessionStore>,
    storage: Arc<dyn ObjectStorage>,
    ttl: chrono::Duration,
}

impl UploadSessionManager {
    pub fn new(
        store: Arc<dyn UploadSessionStore>,
        storage: Arc<dyn ObjectStorage>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            storage,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(24)),
        }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    pub(crate) fn store(&self) -> &dyn UploadSessionStore {
        self.store.as_ref()
    }

    pub(crate) fn storage(&self) -> &dyn ObjectStorage {
        self.storage.as_ref()
    }

    /// Open a session with a fresh id.
    pub async fn create_session(&self, data: NewUploadSession) -> PipelineResult<UploadSession> {
        self.create_session_with_id(SessionId::new(), data).await
    }

    /// Open a session under a caller-chosen id (the id is embedded in the
    /// multipart object key, so the issuer picks it before the backend call).
    pub async fn create_session_with_id(
        &self,
        session_id: SessionId,
        data: NewUploadSession,
    ) -> PipelineResult<UploadSession> {
        if data.file_size == 0 {
            return Err(PipelineError::validation("file_size must be positive"));
        }
        if data.total_chunks == 0 {
            return Err(PipelineError::validation("total_chunks must be at least 1"));
        }

        let session = UploadSession::new(session_id, data, Utc::now(), self.ttl);
        self.store.insert(&session).await?;

        info!(
            session_id = %session.session_id,
            owner_id = %session.owner_id,
            total_chunks = session.total_chunks,
            chunk_size = session.chunk_size,
            expires_at = %session.expires_at,
            "Created upload session"
        );

        Ok(session)
    }

    /// Read a session, flipping it to EXPIRED when its window has passed.
    async fn load(&self, id: &SessionId) -> PipelineResult<UploadSession> {
        let mut session = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| PipelineError::not_found(id))?;

        let now = Utc::now();
        if !session.is_expired_at(now) || !session.status.is_expirable() {
            return Ok(session);
        }

        let update = StatusUpdate::new(UploadStatus::Expired, EXPIRABLE.to_vec(), now);
        match self.store.transition(id, update).await? {
            Transition::Applied { previous } => {
                info!(session_id = %id, previous = %previous, "Upload session expired on read");
                session.status = UploadStatus::Expired;
                session.updated_at = now;
                Ok(session)
            }
            Transition::Rejected { .. } | Transition::Incomplete { .. } => {
                // Raced with another writer; report whatever won
                self.store
                    .get(id)
                    .await?
                    .ok_or_else(|| PipelineError::not_found(id))
            }
            Transition::Missing => Err(PipelineError::not_found(id)),
        }
    }

    /// Fetch a live session.
    ///
    /// Fails with `ExpiredSession` once the session is expired, including
    /// when this read is what expires it. Completed and aborted sessions are
    /// returned unchanged.
    pub async fn get_session(&self, id: &SessionId) -> PipelineResult<UploadSession> {
        let session = self.load(id).await?;
        if session.status == UploadStatus::Expired {
            return Err(PipelineError::expired(id));
        }
        Ok(session)
    }

    /// Record one uploaded part.
    ///
    /// Reporting the same part twice overwrites the earlier entry. The first
    /// report moves the session to UPLOADING; the last one does not complete it.
    pub async fn report_chunk(
        &self,
        id: &SessionId,
        chunk_number: u32,
        checksum_tag: impl Into<String>,
        size: u64,
    ) -> PipelineResult<ChunkInfo> {
        let checksum_tag = checksum_tag.into();
        if checksum_tag.trim().is_empty() {
            return Err(PipelineError::validation("checksum tag must not be empty"));
        }

        let session = self.get_session(id).await?;
        if session.status.is_terminal() {
            return Err(PipelineError::validation(format!(
                "session {} is {}",
                id, session.status
            )));
        }
        if !session.contains_chunk(chunk_number) {
            return Err(PipelineError::validation(format!(
                "chunk {} out of range 1..={}",
                chunk_number, session.total_chunks
            )));
        }

        let now = Utc::now();
        let chunk = ChunkInfo {
            chunk_number,
            checksum_tag: Some(checksum_tag),
            size,
            uploaded_at: Some(now),
            is_completed: true,
        };

        match self.store.put_chunk(id, &chunk, now).await? {
            ChunkWrite::Written { status } => {
                if status == UploadStatus::Initializing {
                    let update = StatusUpdate::new(
                        UploadStatus::Uploading,
                        vec![UploadStatus::Initializing],
                        now,
                    );
                    // Another report may have moved it already
                    self.store.transition(id, update).await?;
                }
                debug!(session_id = %id, chunk_number, size, "Chunk reported");
                Ok(chunk)
            }
            ChunkWrite::Rejected { status } => Err(PipelineError::validation(format!(
                "session {} is {}",
                id, status
            ))),
            ChunkWrite::Missing => Err(PipelineError::not_found(id)),
        }
    }

    /// Mark the session COMPLETED with its final locator.
    ///
    /// Fails with `IncompleteUpload` (status unchanged) while any part is
    /// outstanding. Completing an already completed session is a no-op.
    pub async fn complete(
        &self,
        id: &SessionId,
        final_locator: impl Into<String>,
    ) -> PipelineResult<UploadSession> {
        let session = self.get_session(id).await?;
        match session.status {
            UploadStatus::Completed => return Ok(session),
            status if status.is_terminal() => {
                return Err(PipelineError::validation(format!(
                    "cannot complete a {} session",
                    status
                )))
            }
            _ => {}
        }

        let missing = session.missing_chunks();
        if !missing.is_empty() {
            return Err(PipelineError::IncompleteUpload {
                session_id: id.to_string(),
                missing,
            });
        }

        let update = StatusUpdate::new(UploadStatus::Completed, ACTIVE.to_vec(), Utc::now())
            .require_all_chunks()
            .with_final_locator(final_locator);

        match self.store.transition(id, update).await? {
            Transition::Applied { .. } => {
                metrics::record_session_completed();
                let session = self.get_session(id).await?;
                info!(
                    session_id = %id,
                    final_locator = session.final_locator.as_deref().unwrap_or_default(),
                    "Upload session completed"
                );
                Ok(session)
            }
            Transition::Incomplete { .. } => {
                let missing = self.load(id).await?.missing_chunks();
                Err(PipelineError::IncompleteUpload {
                    session_id: id.to_string(),
                    missing,
                })
            }
            Transition::Rejected { current } => Err(PipelineError::validation(format!(
                "cannot complete a {} session",
                current
            ))),
            Transition::Missing => Err(PipelineError::not_found(id)),
        }
    }

    /// Assemble the remote multipart upload from the reported parts, then
    /// mark the session COMPLETED.
    ///
    /// A backend failure leaves the session untouched.
    pub async fn finalize(&self, id: &SessionId) -> PipelineResult<UploadSession> {
        let session = self.get_session(id).await?;
        if session.status == UploadStatus::Completed {
            return Ok(session);
        }

        let missing = session.missing_chunks();
        if !missing.is_empty() {
            return Err(PipelineError::IncompleteUpload {
                session_id: id.to_string(),
                missing,
            });
        }

        let mut parts: Vec<CompletedPartInfo> = session
            .chunks
            .iter()
            .map(|c| CompletedPartInfo {
                part_number: c.chunk_number,
                etag: c.checksum_tag.clone().unwrap_or_default(),
            })
            .collect();
        parts.sort_by_key(|p| p.part_number);

        self.storage
            .complete_multipart_upload(&session.key, &session.backend_upload_id, &parts)
            .await?;

        let locator = locator_for(&session.bucket, &session.key);
        self.complete(id, locator).await
    }

    /// Mark the session ABORTED. Local only; the remote upload is untouched.
    pub async fn abort(&self, id: &SessionId, reason: &str) -> PipelineResult<UploadSession> {
        let session = self.get_session(id).await?;
        if session.status == UploadStatus::Aborted {
            return Ok(session);
        }

        let update = StatusUpdate::new(UploadStatus::Aborted, ACTIVE.to_vec(), Utc::now())
            .with_error_message(reason);

        match self.store.transition(id, update).await? {
            Transition::Applied { .. } => {
                info!(session_id = %id, reason, "Upload session aborted");
                self.load(id).await
            }
            Transition::Rejected { current } | Transition::Incomplete { current } => {
                Err(PipelineError::validation(format!(
                    "cannot abort a {} session",
                    current
                )))
            }
            Transition::Missing => Err(PipelineError::not_found(id)),
        }
    }

    /// Abort locally, then abort the remote multipart upload.
    ///
    /// A remote failure is returned but the session stays ABORTED; the
    /// reconciliation sweep retries the remote abort.
    pub async fn abort_with_backend(
        &self,
        id: &SessionId,
        reason: &str,
    ) -> PipelineResult<UploadSession> {
        let session = self.abort(id, reason).await?;

        match self
            .storage
            .abort_multipart_upload(&session.key, &session.backend_upload_id)
            .await
        {
            Ok(()) | Err(StorageError::NotFound(_)) => {
                metrics::record_multipart_aborted("caller");
                Ok(session)
            }
            Err(e) => {
                warn!(
                    session_id = %id,
                    upload_id = %session.backend_upload_id,
                    "Remote multipart abort failed, left for reconciliation: {}", e
                );
                Err(e.into())
            }
        }
    }

    /// Progress snapshot; expired sessions report status EXPIRED.
    pub async fn progress(&self, id: &SessionId) -> PipelineResult<UploadProgress> {
        Ok(self.load(id).await?.progress())
    }

    /// Sessions owned by `owner_id`, oldest first, with expiry applied to
    /// the returned copies.
    pub async fn sessions_for_owner(&self, owner_id: &str) -> PipelineResult<Vec<UploadSession>> {
        let now = Utc::now();
        let mut sessions = Vec::new();
        for id in self.store.list_by_owner(owner_id).await? {
            if let Some(mut session) = self.store.get(&id).await? {
                if session.is_expired_at(now) && session.status.is_expirable() {
                    session.status = UploadStatus::Expired;
                }
                sessions.push(session);
            }
        }
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    /// Mark every expirable session past its expiry EXPIRED.
    ///
    /// Each session is flipped with a conditional transition, so sessions
    /// completed or aborted concurrently are left alone.
    pub async fn sweep_expired(&self) -> PipelineResult<usize> {
        let now = Utc::now();
        let mut expired = 0;

        for id in self.store.list_expiring_before(now).await? {
            let update = StatusUpdate::new(UploadStatus::Expired, EXPIRABLE.to_vec(), now);
            match self.store.transition(&id, update).await {
                Ok(Transition::Applied { previous }) => {
                    debug!(session_id = %id, previous = %previous, "Session expired by sweep");
                    expired += 1;
                }
                Ok(_) => {}
                Err(e) => warn!(session_id = %id, "Failed to expire session: {}", e),
            }
        }

        if expired > 0 {
            info!(count = expired, "Expired upload sessions");
            metrics::record_sessions_expired(expired as u64);
        }
        Ok(expired)
    }

    /// Delete terminal sessions whose expiry is older than `retention`.
    pub async fn purge_retained(&self, retention: Duration) -> PipelineResult<usize> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|_| PipelineError::config("retention out of range"))?;
        let cutoff = Utc::now() - retention;
        let mut purged = 0;

        for id in self.store.list_expiring_before(cutoff).await? {
            let Some(session) = self.store.get(&id).await? else {
                continue;
            };
            if !session.status.is_terminal() {
                continue;
            }
            if self.store.delete(&id).await? {
                purged += 1;
            }
        }

        if purged > 0 {
            info!(count = purged, "Purged retained upload sessions");
        }
        Ok(purged)
    }
}
