//! Prometheus metrics for the pipeline.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{PipelineError, PipelineResult};

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: &str) -> PipelineResult<()> {
    let addr: std::net::SocketAddr = addr
        .parse()
        .map_err(|_| PipelineError::config(format!("invalid metrics address '{}'", addr)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| PipelineError::config(format!("failed to install metrics exporter: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    // Upload metrics
    pub const UPLOAD_PLANS_ISSUED_TOTAL: &str = "clipline_upload_plans_issued_total";
    pub const UPLOAD_SESSIONS_EXPIRED_TOTAL: &str = "clipline_upload_sessions_expired_total";
    pub const UPLOAD_SESSIONS_COMPLETED_TOTAL: &str = "clipline_upload_sessions_completed_total";
    pub const MULTIPART_ABORTED_TOTAL: &str = "clipline_multipart_aborted_total";

    // Processing metrics
    pub const FFMPEG_DURATION_SECONDS: &str = "clipline_ffmpeg_duration_seconds";
    pub const EXTRACTION_RETRIES_TOTAL: &str = "clipline_extraction_retries_total";
    pub const CONCAT_TOTAL: &str = "clipline_concat_total";
    pub const CLIPS_COMPLETED_TOTAL: &str = "clipline_clips_completed_total";
    pub const CLIPS_FAILED_TOTAL: &str = "clipline_clips_failed_total";
}

/// Record an issued upload plan.
pub fn record_upload_plan(mode: &str) {
    let labels = [("mode", mode.to_string())];
    counter!(names::UPLOAD_PLANS_ISSUED_TOTAL, &labels).increment(1);
}

/// Record sessions marked expired.
pub fn record_sessions_expired(count: u64) {
    counter!(names::UPLOAD_SESSIONS_EXPIRED_TOTAL).increment(count);
}

/// Record a finalized upload session.
pub fn record_session_completed() {
    counter!(names::UPLOAD_SESSIONS_COMPLETED_TOTAL).increment(1);
}

/// Record a remote multipart abort.
pub fn record_multipart_aborted(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::MULTIPART_ABORTED_TOTAL, &labels).increment(1);
}

/// Record one encoder invocation.
pub fn record_ffmpeg_duration(operation: &str, quality: &str, duration_secs: f64) {
    let labels = [
        ("operation", operation.to_string()),
        ("quality", quality.to_string()),
    ];
    histogram!(names::FFMPEG_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record an extraction retry.
pub fn record_extraction_retry(attempt: u32) {
    let labels = [("attempt", attempt.to_string())];
    counter!(names::EXTRACTION_RETRIES_TOTAL, &labels).increment(1);
}

/// Record which concatenation strategy succeeded.
pub fn record_concat(strategy: &str) {
    let labels = [("strategy", strategy.to_string())];
    counter!(names::CONCAT_TOTAL, &labels).increment(1);
}

/// Record a completed clip.
pub fn record_clip_completed(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::CLIPS_COMPLETED_TOTAL, &labels).increment(1);
}

/// Record a failed clip.
pub fn record_clip_failed(error_kind: &str) {
    let labels = [("error", error_kind.to_string())];
    counter!(names::CLIPS_FAILED_TOTAL, &labels).increment(1);
}
