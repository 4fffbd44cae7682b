//! Pipeline error types.

use thiserror::Error;

use clipline_media::MediaError;
use clipline_sessions::SessionStoreError;
use clipline_storage::StorageError;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Upload session not found: {0}")]
    NotFound(String),

    #[error("Upload session expired: {0}")]
    ExpiredSession(String),

    #[error("Upload session {session_id} is missing chunks {missing:?}")]
    IncompleteUpload { session_id: String, missing: Vec<u32> },

    #[error("Storage backend error: {0}")]
    UpstreamStorage(#[from] StorageError),

    #[error("Encoding failed after {attempts} attempt(s): {source}")]
    Encoding {
        attempts: u32,
        #[source]
        source: MediaError,
    },

    #[error("Stitching failed: {0}")]
    Stitching(String),

    #[error("Session store error: {0}")]
    Store(#[from] SessionStoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(id: impl ToString) -> Self {
        Self::NotFound(id.to_string())
    }

    pub fn expired(id: impl ToString) -> Self {
        Self::ExpiredSession(id.to_string())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Object keys are built from caller input, so a rejected key is a
    /// validation failure rather than a backend one.
    pub fn from_key_error(err: StorageError) -> Self {
        match err {
            StorageError::InvalidKey(msg) => Self::Validation(msg),
            other => Self::UpstreamStorage(other),
        }
    }

    /// Wrap an encoder failure observed after `attempts` tries.
    ///
    /// Range errors are caller mistakes and concat failures belong to the
    /// stitching stage, so both are mapped to their own variants.
    pub fn encoding(source: MediaError, attempts: u32) -> Self {
        match source {
            MediaError::InvalidTimeRange { start, end } => Self::Validation(format!(
                "end time {:.3}s must be after start time {:.3}s",
                end, start
            )),
            MediaError::ConcatFailed { .. } | MediaError::NoSegments => {
                Self::Stitching(source.to_string())
            }
            source => Self::Encoding { attempts, source },
        }
    }

    /// Check if error is retryable by the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::UpstreamStorage(_) | PipelineError::Store(_) | PipelineError::Io(_) => true,
            PipelineError::Encoding { source, .. } => source.is_resource_exhaustion(),
            _ => false,
        }
    }

    /// Short machine-readable kind, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::ExpiredSession(_) => "expired_session",
            PipelineError::IncompleteUpload { .. } => "incomplete_upload",
            PipelineError::UpstreamStorage(_) => "upstream_storage",
            PipelineError::Encoding { .. } => "encoding",
            PipelineError::Stitching(_) => "stitching",
            PipelineError::Store(_) => "store",
            PipelineError::Io(_) => "io",
            PipelineError::Config(_) => "config",
            PipelineError::Internal(_) => "internal",
        }
    }
}

impl From<MediaError> for PipelineError {
    fn from(err: MediaError) -> Self {
        Self::encoding(err, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_error_mapping() {
        assert!(matches!(
            PipelineError::from(MediaError::invalid_time_range(5.0, 1.0)),
            PipelineError::Validation(_)
        ));
        assert!(matches!(
            PipelineError::from(MediaError::ConcatFailed {
                primary: "a".to_string(),
                fallback: "b".to_string()
            }),
            PipelineError::Stitching(_)
        ));
        assert!(matches!(
            PipelineError::encoding(MediaError::Timeout(1500), 3),
            PipelineError::Encoding { attempts: 3, .. }
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(PipelineError::encoding(MediaError::Timeout(10), 1).is_retryable());
        assert!(!PipelineError::encoding(
            MediaError::ffmpeg_failed("bad input", Some("moov atom not found".to_string()), Some(1)),
            1
        )
        .is_retryable());
        assert!(!PipelineError::validation("x").is_retryable());
        assert!(PipelineError::from(StorageError::upload_failed("503")).is_retryable());
    }
}
