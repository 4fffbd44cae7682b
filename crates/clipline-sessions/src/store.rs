//! Upload session store seam.
//!
//! Stores expose atomic primitives only. Lifecycle rules (expiry on read,
//! validation, which transitions a caller may request) live in the session
//! manager.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use clipline_models::{ChunkInfo, SessionId, UploadSession, UploadStatus};

use crate::error::SessionStoreResult;

/// Result of writing one chunk entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkWrite {
    /// Chunk stored; carries the session status observed during the write
    Written { status: UploadStatus },
    /// Session is terminal; nothing was written
    Rejected { status: UploadStatus },
    Missing,
}

/// Conditional status change.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub to: UploadStatus,
    /// Statuses the session must currently be in for the update to apply
    pub from: Vec<UploadStatus>,
    /// Apply only if every chunk is completed
    pub require_all_chunks: bool,
    pub final_locator: Option<String>,
    pub error_message: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(to: UploadStatus, from: impl Into<Vec<UploadStatus>>, at: DateTime<Utc>) -> Self {
        Self {
            to,
            from: from.into(),
            require_all_chunks: false,
            final_locator: None,
            error_message: None,
            at,
        }
    }

    pub fn require_all_chunks(mut self) -> Self {
        self.require_all_chunks = true;
        self
    }

    pub fn with_final_locator(mut self, locator: impl Into<String>) -> Self {
        self.final_locator = Some(locator.into());
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub(crate) fn allows(&self, current: UploadStatus) -> bool {
        self.from.contains(&current)
    }
}

/// Result of a conditional status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied { previous: UploadStatus },
    /// Current status was not in the allowed set
    Rejected { current: UploadStatus },
    /// `require_all_chunks` was set and some chunk is outstanding
    Incomplete { current: UploadStatus },
    Missing,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// Persistence for upload sessions.
///
/// Chunk writes for different chunk numbers of the same session must not
/// contend with each other; status changes are exclusive against chunk
/// writes so a chunk never lands on a terminal session.
#[async_trait]
pub trait UploadSessionStore: Send + Sync {
    /// Persist a new session with all of its chunk entries.
    async fn insert(&self, session: &UploadSession) -> SessionStoreResult<()>;

    async fn get(&self, id: &SessionId) -> SessionStoreResult<Option<UploadSession>>;

    /// Overwrite a single chunk entry unless the session is terminal.
    async fn put_chunk(
        &self,
        id: &SessionId,
        chunk: &ChunkInfo,
        at: DateTime<Utc>,
    ) -> SessionStoreResult<ChunkWrite>;

    async fn transition(&self, id: &SessionId, update: StatusUpdate) -> SessionStoreResult<Transition>;

    /// Sessions whose `expires_at` is strictly before `before`, any status.
    async fn list_expiring_before(&self, before: DateTime<Utc>) -> SessionStoreResult<Vec<SessionId>>;

    async fn list_by_owner(&self, owner_id: &str) -> SessionStoreResult<Vec<SessionId>>;

    async fn list_by_status(&self, status: UploadStatus) -> SessionStoreResult<Vec<SessionId>>;

    /// Remove a session and its index entries; `false` if it did not exist.
    async fn delete(&self, id: &SessionId) -> SessionStoreResult<bool>;
}
