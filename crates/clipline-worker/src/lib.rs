//! Upload session management and clip extraction pipeline.
//!
//! This crate provides:
//! - Chunk sizing, pre-authorized URL issuance and upload session lifecycle
//! - Reconciliation of orphaned multipart uploads
//! - Single-range extraction with degrading retries
//! - Composite clip stitching with a filter-graph fallback
//! - Bounded clip job orchestration
//! - Periodic session maintenance

pub mod clip_pipeline;
pub mod config;
pub mod error;
pub mod logging;
pub mod maintenance;
pub mod metrics;
pub mod retry;
pub mod upload;

pub use clip_pipeline::{
    ClipPipelineOrchestrator, ClipStore, ExtractedClip, ExtractionRequest, MemoryClipStore,
    SegmentStitcher, StitchRequest, StitchedClip, VideoSegmentExtractor,
};
pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use logging::ClipLogger;
pub use maintenance::{run_maintenance_loop, run_maintenance_pass, MaintenanceReport, MaintenanceSchedule};
pub use retry::{settings_for_attempt, FailureTracker, RetryConfig};
pub use upload::{
    calculate_chunk_size, ReconcileReport, SignedUrlIssuer, UploadSessionManager, MAX_CHUNK_SIZE,
    MIN_CHUNK_SIZE, TARGET_CHUNK_COUNT,
};
