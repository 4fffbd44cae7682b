//! Resumable upload session models.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::upload::FileCategory;

/// Unique identifier for an upload session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Upload session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Session created, no part reported yet
    #[default]
    Initializing,
    /// At least one part reported
    Uploading,
    /// Remote multipart upload finalized
    Completed,
    /// Upload failed
    Failed,
    /// Caller aborted the upload
    Aborted,
    /// Session passed its expiry before completing
    Expired,
}

impl UploadStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [UploadStatus; 6] = [
        UploadStatus::Initializing,
        UploadStatus::Uploading,
        UploadStatus::Completed,
        UploadStatus::Failed,
        UploadStatus::Aborted,
        UploadStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Initializing => "initializing",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
            UploadStatus::Aborted => "aborted",
            UploadStatus::Expired => "expired",
        }
    }

    /// Parse from the stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UploadStatus::Initializing | UploadStatus::Uploading)
    }

    /// Whether a read past `expires_at` reports this status as expired.
    ///
    /// Completed and aborted sessions keep their status; a failed session
    /// is reported expired once its window has passed.
    pub fn is_expirable(&self) -> bool {
        matches!(
            self,
            UploadStatus::Initializing | UploadStatus::Uploading | UploadStatus::Failed
        )
    }

    /// Whether `next` is a legal forward transition from this status.
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        match (self, next) {
            (Initializing, Uploading) => true,
            (Initializing | Uploading, Completed | Failed | Aborted | Expired) => true,
            (Failed, Expired) => true,
            _ => false,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bookkeeping for one part of a chunked upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChunkInfo {
    /// Part number, 1-based
    pub chunk_number: u32,
    /// Checksum tag (ETag) returned by the storage backend for this part
    pub checksum_tag: Option<String>,
    /// Bytes uploaded for this part
    pub size: u64,
    /// When the part was last reported
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Whether the part has been reported complete
    pub is_completed: bool,
}

impl ChunkInfo {
    /// Create an incomplete placeholder for a part.
    pub fn pending(chunk_number: u32) -> Self {
        Self {
            chunk_number,
            checksum_tag: None,
            size: 0,
            uploaded_at: None,
            is_completed: false,
        }
    }

    /// Create a completed entry for a reported part.
    pub fn completed(chunk_number: u32, checksum_tag: impl Into<String>, size: u64) -> Self {
        Self {
            chunk_number,
            checksum_tag: Some(checksum_tag.into()),
            size,
            uploaded_at: Some(Utc::now()),
            is_completed: true,
        }
    }
}

/// Data required to open a new upload session.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NewUploadSession {
    pub owner_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub file_category: FileCategory,
    pub total_chunks: u32,
    pub chunk_size: u64,
    pub backend_upload_id: String,
    pub bucket: String,
    pub key: String,
}

/// One resumable chunked upload attempt.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UploadSession {
    pub session_id: SessionId,
    pub owner_id: String,
    pub file_name: String,
    /// Total file size in bytes
    pub file_size: u64,
    pub mime_type: String,
    pub file_category: FileCategory,
    pub total_chunks: u32,
    /// Part size in bytes (the last part may be smaller)
    pub chunk_size: u64,
    /// Multipart upload handle issued by the storage backend
    pub backend_upload_id: String,
    pub bucket: String,
    pub key: String,
    /// One entry per part, ordered by part number
    pub chunks: Vec<ChunkInfo>,
    pub status: UploadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set only once the session is completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_locator: Option<String>,
    /// Set when the session failed or was aborted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl UploadSession {
    /// Build a fresh session with every part pre-populated as incomplete.
    pub fn new(session_id: SessionId, data: NewUploadSession, now: DateTime<Utc>, ttl: Duration) -> Self {
        let total_chunks = data.total_chunks.max(1);
        Self {
            session_id,
            owner_id: data.owner_id,
            file_name: data.file_name,
            file_size: data.file_size,
            mime_type: data.mime_type,
            file_category: data.file_category,
            total_chunks,
            chunk_size: data.chunk_size,
            backend_upload_id: data.backend_upload_id,
            bucket: data.bucket,
            key: data.key,
            chunks: (1..=total_chunks).map(ChunkInfo::pending).collect(),
            status: UploadStatus::Initializing,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
            final_locator: None,
            error_message: None,
        }
    }

    /// Whether `chunk_number` is a valid part number for this session.
    pub fn contains_chunk(&self, chunk_number: u32) -> bool {
        (1..=self.total_chunks).contains(&chunk_number)
    }

    /// Whether the session is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether every part has been reported.
    pub fn all_chunks_completed(&self) -> bool {
        !self.chunks.is_empty() && self.chunks.iter().all(|c| c.is_completed)
    }

    /// Number of parts reported so far.
    pub fn completed_chunks(&self) -> u32 {
        self.chunks.iter().filter(|c| c.is_completed).count() as u32
    }

    /// Part numbers still outstanding.
    pub fn missing_chunks(&self) -> Vec<u32> {
        self.chunks
            .iter()
            .filter(|c| !c.is_completed)
            .map(|c| c.chunk_number)
            .collect()
    }

    /// Sum of reported part sizes.
    pub fn uploaded_bytes(&self) -> u64 {
        self.chunks
            .iter()
            .filter(|c| c.is_completed)
            .map(|c| c.size)
            .sum()
    }

    /// Snapshot of upload progress.
    pub fn progress(&self) -> UploadProgress {
        let uploaded_bytes = self.uploaded_bytes();
        let progress_percent = if self.file_size == 0 {
            0.0
        } else {
            ((uploaded_bytes as f64 / self.file_size as f64) * 100.0).min(100.0)
        };

        UploadProgress {
            session_id: self.session_id.clone(),
            total_size: self.file_size,
            uploaded_size: uploaded_bytes,
            chunks_uploaded: self.completed_chunks(),
            total_chunks: self.total_chunks,
            progress_percent,
            status: self.status,
        }
    }
}

/// Progress view of an upload session.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UploadProgress {
    pub session_id: SessionId,
    pub total_size: u64,
    pub uploaded_size: u64,
    pub chunks_uploaded: u32,
    pub total_chunks: u32,
    /// 0-100
    pub progress_percent: f64,
    pub status: UploadStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(total_chunks: u32) -> UploadSession {
        UploadSession::new(
            SessionId::from("s-1"),
            NewUploadSession {
                owner_id: "user-1".to_string(),
                file_name: "talk.mp4".to_string(),
                file_size: 12 * 1024 * 1024,
                mime_type: "video/mp4".to_string(),
                file_category: FileCategory::Video,
                total_chunks,
                chunk_size: 5 * 1024 * 1024,
                backend_upload_id: "upload-1".to_string(),
                bucket: "media".to_string(),
                key: "uploads/user-1/videos/multipart/s-1.mp4".to_string(),
            },
            Utc::now(),
            Duration::hours(24),
        )
    }

    #[test]
    fn test_new_session_prepopulates_chunks() {
        let session = sample(3);
        assert_eq!(session.status, UploadStatus::Initializing);
        assert_eq!(session.chunks.len(), 3);
        assert_eq!(
            session.chunks.iter().map(|c| c.chunk_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(session.chunks.iter().all(|c| !c.is_completed));
        assert_eq!(session.missing_chunks(), vec![1, 2, 3]);
    }

    #[test]
    fn test_progress_counts_completed_parts() {
        let mut session = sample(3);
        session.chunks[0] = ChunkInfo::completed(1, "etag-1", 5 * 1024 * 1024);
        session.chunks[2] = ChunkInfo::completed(3, "etag-3", 2 * 1024 * 1024);

        let progress = session.progress();
        assert_eq!(progress.chunks_uploaded, 2);
        assert_eq!(progress.uploaded_size, 7 * 1024 * 1024);
        assert!(!session.all_chunks_completed());
        assert_eq!(session.missing_chunks(), vec![2]);
    }

    #[test]
    fn test_contains_chunk_bounds() {
        let session = sample(2);
        assert!(!session.contains_chunk(0));
        assert!(session.contains_chunk(1));
        assert!(session.contains_chunk(2));
        assert!(!session.contains_chunk(3));
    }

    #[test]
    fn test_status_transitions() {
        use UploadStatus::*;
        assert!(Initializing.can_transition_to(Uploading));
        assert!(Uploading.can_transition_to(Completed));
        assert!(Uploading.can_transition_to(Expired));
        assert!(!Uploading.can_transition_to(Initializing));
        assert!(!Completed.can_transition_to(Expired));
        assert!(Failed.can_transition_to(Expired));
        assert!(!Aborted.is_expirable());
        assert!(!Aborted.can_transition_to(Uploading));
        assert!(Expired.is_terminal());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in UploadStatus::ALL {
            assert_eq!(UploadStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(UploadStatus::parse("bogus"), None);
    }
}
