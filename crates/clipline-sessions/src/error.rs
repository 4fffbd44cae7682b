//! Session store error types.

use thiserror::Error;

pub type SessionStoreResult<T> = Result<T, SessionStoreError>;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Session already exists: {0}")]
    AlreadyExists(String),

    #[error("Chunk {chunk_number} out of range for session {session_id}")]
    ChunkOutOfRange { session_id: String, chunk_number: u32 },

    #[error("Corrupt session record {session_id}: {reason}")]
    CorruptRecord { session_id: String, reason: String },

    #[error("Unexpected script reply: {0}")]
    UnexpectedReply(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SessionStoreError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn corrupt(session_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            session_id: session_id.into(),
            reason: reason.into(),
        }
    }
}
