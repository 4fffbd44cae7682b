//! Error types for media operations.

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Substrings in FFmpeg/OS error output that indicate resource pressure.
const RESOURCE_MARKERS: &[&str] = &[
    "out of memory",
    "cannot allocate memory",
    "resource temporarily unavailable",
    "oom-kill",
    "oom killer",
    "killed",
    "sigkill",
    "signal 9",
    "timed out",
    "timeout",
];

/// Exit code reported by shells/containers when a process is SIGKILLed (128 + 9).
const SIGKILL_EXIT_CODE: i32 = 137;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFmpeg killed by signal {signal}")]
    Killed {
        signal: i32,
        stderr: Option<String>,
    },

    #[error("Invalid time range: start {start:.3}s, end {end:.3}s")]
    InvalidTimeRange { start: f64, end: f64 },

    #[error("Concatenation failed: stream copy: {primary}; filter graph: {fallback}")]
    ConcatFailed { primary: String, fallback: String },

    #[error("No segments to concatenate")]
    NoSegments,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an invalid time range error.
    pub fn invalid_time_range(start: f64, end: f64) -> Self {
        Self::InvalidTimeRange { start, end }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the failure looks like resource exhaustion (OOM kill, signal,
    /// timeout, EAGAIN) and is worth retrying with cheaper settings.
    pub fn is_resource_exhaustion(&self) -> bool {
        match self {
            MediaError::Timeout(_) | MediaError::Killed { .. } => true,
            MediaError::FfmpegFailed {
                message,
                stderr,
                exit_code,
            } => {
                *exit_code == Some(SIGKILL_EXIT_CODE)
                    || contains_resource_marker(message)
                    || stderr.as_deref().is_some_and(contains_resource_marker)
            }
            MediaError::Io(e) => {
                e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::OutOfMemory
                    || matches!(e.raw_os_error(), Some(11) | Some(12))
            }
            _ => false,
        }
    }

    /// Captured encoder stderr, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            MediaError::FfmpegFailed { stderr, .. } | MediaError::Killed { stderr, .. } => {
                stderr.as_deref()
            }
            _ => None,
        }
    }
}

fn contains_resource_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    RESOURCE_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_classification() {
        assert!(MediaError::Timeout(1500).is_resource_exhaustion());
        assert!(MediaError::Killed { signal: 9, stderr: None }.is_resource_exhaustion());
        assert!(MediaError::ffmpeg_failed("exit", None, Some(137)).is_resource_exhaustion());
        assert!(MediaError::ffmpeg_failed(
            "exit",
            Some("av_malloc: Cannot allocate memory".to_string()),
            Some(1)
        )
        .is_resource_exhaustion());
        assert!(MediaError::ffmpeg_failed("Resource temporarily unavailable", None, Some(1))
            .is_resource_exhaustion());
        assert!(MediaError::Io(std::io::Error::from_raw_os_error(11)).is_resource_exhaustion());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(!MediaError::ffmpeg_failed(
            "exit",
            Some("moov atom not found\nInvalid data found when processing input".to_string()),
            Some(1)
        )
        .is_resource_exhaustion());
        assert!(!MediaError::invalid_time_range(5.0, 1.0).is_resource_exhaustion());
        assert!(!MediaError::FfmpegNotFound.is_resource_exhaustion());
        assert!(!MediaError::Cancelled.is_resource_exhaustion());
    }
}
