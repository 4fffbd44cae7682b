//! Structured clip logging utilities.
//!
//! Provides consistent, structured logging for clip pipeline runs with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};

use clipline_models::{ClipId, ProjectId};

/// Clip logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct ClipLogger {
    clip_id: String,
    project_id: String,
    operation: String,
}

impl ClipLogger {
    /// Create a new logger for a clip and operation (e.g. "extract", "stitch").
    pub fn new(clip_id: &ClipId, project_id: &ProjectId, operation: &str) -> Self {
        Self {
            clip_id: clip_id.to_string(),
            project_id: project_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            clip_id = %self.clip_id,
            project_id = %self.project_id,
            operation = %self.operation,
            "Clip started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            clip_id = %self.clip_id,
            project_id = %self.project_id,
            operation = %self.operation,
            "Clip progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            clip_id = %self.clip_id,
            project_id = %self.project_id,
            operation = %self.operation,
            "Clip warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            clip_id = %self.clip_id,
            project_id = %self.project_id,
            operation = %self.operation,
            "Clip error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            clip_id = %self.clip_id,
            project_id = %self.project_id,
            operation = %self.operation,
            "Clip completed: {}", message
        );
    }

    pub fn clip_id(&self) -> &str {
        &self.clip_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this clip.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "clip",
            clip_id = %self.clip_id,
            project_id = %self.project_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_logger_creation() {
        let logger = ClipLogger::new(&ClipId::from("clip-1"), &ProjectId::from("p-1"), "stitch");

        assert_eq!(logger.clip_id(), "clip-1");
        assert_eq!(logger.operation(), "stitch");
    }
}
