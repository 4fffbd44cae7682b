//! In-process session store.
//!
//! Each session keeps its metadata behind an `RwLock` and every chunk behind
//! its own `Mutex`. Chunk writers share the metadata read lock, so reports
//! for different chunks proceed in parallel while status changes take the
//! write lock and see a stable chunk set.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use clipline_models::{ChunkInfo, SessionId, UploadSession, UploadStatus};

use crate::error::{SessionStoreError, SessionStoreResult};
use crate::store::{ChunkWrite, StatusUpdate, Transition, UploadSessionStore};

struct SessionEntry {
    /// Session without its chunk list
    meta: RwLock<UploadSession>,
    chunks: Vec<Mutex<ChunkInfo>>,
}

impl SessionEntry {
    async fn snapshot(&self) -> UploadSession {
        let meta = self.meta.read().await;
        let mut session = meta.clone();
        let mut chunks = Vec::with_capacity(self.chunks.len());
        for chunk in &self.chunks {
            chunks.push(chunk.lock().await.clone());
        }
        if let Some(latest) = chunks.iter().filter_map(|c| c.uploaded_at).max() {
            session.updated_at = session.updated_at.max(latest);
        }
        session.chunks = chunks;
        session
    }

    async fn all_chunks_completed(&self) -> bool {
        for chunk in &self.chunks {
            if !chunk.lock().await.is_completed {
                return false;
            }
        }
        !self.chunks.is_empty()
    }
}

/// Session store held in process memory.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<SessionEntry>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, id: &SessionId) -> Option<Arc<SessionEntry>> {
        self.sessions.read().await.get(id).cloned()
    }

    async fn ids_matching<F>(&self, mut predicate: F) -> Vec<SessionId>
    where
        F: FnMut(&UploadSession) -> bool,
    {
        let entries: Vec<_> = self.sessions.read().await.values().cloned().collect();
        let mut ids = Vec::new();
        for entry in entries {
            let meta = entry.meta.read().await;
            if predicate(&meta) {
                ids.push(meta.session_id.clone());
            }
        }
        ids
    }
}

#[async_trait]
impl UploadSessionStore for MemorySessionStore {
    async fn insert(&self, session: &UploadSession) -> SessionStoreResult<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.session_id) {
            return Err(SessionStoreError::AlreadyExists(session.session_id.to_string()));
        }

        let mut meta = session.clone();
        let chunks = std::mem::take(&mut meta.chunks)
            .into_iter()
            .map(Mutex::new)
            .collect();

        sessions.insert(
            session.session_id.clone(),
            Arc::new(SessionEntry {
                meta: RwLock::new(meta),
                chunks,
            }),
        );
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> SessionStoreResult<Option<UploadSession>> {
        match self.entry(id).await {
            Some(entry) => Ok(Some(entry.snapshot().await)),
            None => Ok(None),
        }
    }

    async fn put_chunk(
        &self,
        id: &SessionId,
        chunk: &ChunkInfo,
        _at: DateTime<Utc>,
    ) -> SessionStoreResult<ChunkWrite> {
        let Some(entry) = self.entry(id).await else {
            return Ok(ChunkWrite::Missing);
        };

        let meta = entry.meta.read().await;
        if meta.status.is_terminal() {
            return Ok(ChunkWrite::Rejected { status: meta.status });
        }

        let slot = chunk
            .chunk_number
            .checked_sub(1)
            .and_then(|i| entry.chunks.get(i as usize))
            .ok_or_else(|| SessionStoreError::ChunkOutOfRange {
                session_id: id.to_string(),
                chunk_number: chunk.chunk_number,
            })?;

        *slot.lock().await = chunk.clone();
        Ok(ChunkWrite::Written { status: meta.status })
    }

    async fn transition(&self, id: &SessionId, update: StatusUpdate) -> SessionStoreResult<Transition> {
        let Some(entry) = self.entry(id).await else {
            return Ok(Transition::Missing);
        };

        let mut meta = entry.meta.write().await;
        let current = meta.status;
        if !update.allows(current) {
            return Ok(Transition::Rejected { current });
        }
        if update.require_all_chunks && !entry.all_chunks_completed().await {
            return Ok(Transition::Incomplete { current });
        }

        meta.status = update.to;
        meta.updated_at = update.at;
        if let Some(locator) = update.final_locator {
            meta.final_locator = Some(locator);
        }
        if let Some(message) = update.error_message {
            meta.error_message = Some(message);
        }

        Ok(Transition::Applied { previous: current })
    }

    async fn list_expiring_before(&self, before: DateTime<Utc>) -> SessionStoreResult<Vec<SessionId>> {
        Ok(self.ids_matching(|s| s.expires_at < before).await)
    }

    async fn list_by_owner(&self, owner_id: &str) -> SessionStoreResult<Vec<SessionId>> {
        Ok(self.ids_matching(|s| s.owner_id == owner_id).await)
    }

    async fn list_by_status(&self, status: UploadStatus) -> SessionStoreResult<Vec<SessionId>> {
        Ok(self.ids_matching(|s| s.status == status).await)
    }

    async fn delete(&self, id: &SessionId) -> SessionStoreResult<bool> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use clipline_models::{FileCategory, NewUploadSession};

    fn session(id: &str, chunks: u32) -> UploadSession {
        UploadSession::new(
            SessionId::from(id),
            NewUploadSession {
                owner_id: "user-1".to_string(),
                file_name: "a.mp4".to_string(),
                file_size: chunks as u64 * 5 * 1024 * 1024,
                mime_type: "video/mp4".to_string(),
                file_category: FileCategory::Video,
                total_chunks: chunks,
                chunk_size: 5 * 1024 * 1024,
                backend_upload_id: "upload-1".to_string(),
                bucket: "media".to_string(),
                key: format!("uploads/user-1/videos/multipart/{}.mp4", id),
            },
            Utc::now(),
            Duration::hours(24),
        )
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemorySessionStore::new();
        store.insert(&session("s1", 3)).await.unwrap();

        let loaded = store.get(&SessionId::from("s1")).await.unwrap().unwrap();
        assert_eq!(loaded.chunks.len(), 3);
        assert!(store.get(&SessionId::from("nope")).await.unwrap().is_none());
        assert!(matches!(
            store.insert(&session("s1", 3)).await,
            Err(SessionStoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_put_chunk_rejected_on_terminal_session() {
        let store = MemorySessionStore::new();
        let id = SessionId::from("s1");
        store.insert(&session("s1", 2)).await.unwrap();

        let update = StatusUpdate::new(
            UploadStatus::Aborted,
            [UploadStatus::Initializing, UploadStatus::Uploading],
            Utc::now(),
        );
        assert!(store.transition(&id, update).await.unwrap().is_applied());

        let write = store
            .put_chunk(&id, &ChunkInfo::completed(1, "e1", 10), Utc::now())
            .await
            .unwrap();
        assert_eq!(write, ChunkWrite::Rejected { status: UploadStatus::Aborted });
    }

    #[tokio::test]
    async fn test_require_all_chunks() {
        let store = MemorySessionStore::new();
        let id = SessionId::from("s1");
        store.insert(&session("s1", 2)).await.unwrap();
        store
            .put_chunk(&id, &ChunkInfo::completed(1, "e1", 10), Utc::now())
            .await
            .unwrap();

        let complete = || {
            StatusUpdate::new(
                UploadStatus::Completed,
                [UploadStatus::Initializing, UploadStatus::Uploading],
                Utc::now(),
            )
            .require_all_chunks()
            .with_final_locator("s3://media/k")
        };

        assert_eq!(
            store.transition(&id, complete()).await.unwrap(),
            Transition::Incomplete { current: UploadStatus::Initializing }
        );

        store
            .put_chunk(&id, &ChunkInfo::completed(2, "e2", 10), Utc::now())
            .await
            .unwrap();
        assert!(store.transition(&id, complete()).await.unwrap().is_applied());

        let loaded = store.get(&id).await.unwrap().unwrap();
        assert_eq!(loaded.status, UploadStatus::Completed);
        assert_eq!(loaded.final_locator.as_deref(), Some("s3://media/k"));
    }

    #[tokio::test]
    async fn test_concurrent_chunk_reports_do_not_lose_writes() {
        let store = Arc::new(MemorySessionStore::new());
        let id = SessionId::from("s1");
        store.insert(&session("s1", 64)).await.unwrap();

        let mut handles = Vec::new();
        for n in 1..=64u32 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .put_chunk(&id, &ChunkInfo::completed(n, format!("e{}", n), n as u64), Utc::now())
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let loaded = store.get(&id).await.unwrap().unwrap();
        assert!(loaded.all_chunks_completed());
        assert_eq!(loaded.uploaded_bytes(), (1..=64u64).sum::<u64>());
    }

    #[tokio::test]
    async fn test_indexes_and_delete() {
        let store = MemorySessionStore::new();
        let mut old = session("old", 1);
        old.expires_at = Utc::now() - Duration::hours(1);
        store.insert(&old).await.unwrap();
        store.insert(&session("fresh", 1)).await.unwrap();

        let expiring = store.list_expiring_before(Utc::now()).await.unwrap();
        assert_eq!(expiring, vec![SessionId::from("old")]);
        assert_eq!(store.list_by_owner("user-1").await.unwrap().len(), 2);
        assert_eq!(
            store.list_by_status(UploadStatus::Initializing).await.unwrap().len(),
            2
        );

        assert!(store.delete(&SessionId::from("old")).await.unwrap());
        assert!(!store.delete(&SessionId::from("old")).await.unwrap());
    }
}
