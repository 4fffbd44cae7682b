//! Shared data models for the clipline backend.
//!
//! This crate provides Serde-serializable types for:
//! - Resumable upload sessions and their chunk bookkeeping
//! - Upload configuration and issued upload plans
//! - Quality tiers and output formats for clip encoding
//! - Extraction jobs and persisted clip records
//! - Storage locators

pub mod clip;
pub mod encoding;
pub mod locator;
pub mod session;
pub mod upload;

// Re-export common types
pub use clip::{ClipId, ClipRecord, ClipStatus, ExtractionJob, ProjectId, SegmentSpec};
pub use encoding::{
    OutputFormat, Quality, QualityProfile, DEFAULT_AUDIO_BITRATE, DEFAULT_AUDIO_SAMPLE_RATE,
    DEFAULT_FADE_SECONDS, DEFAULT_PRESET,
};
pub use locator::{LocatorError, SourceLocator};
pub use session::{ChunkInfo, NewUploadSession, SessionId, UploadProgress, UploadSession, UploadStatus};
pub use upload::{ChunkPlan, FileCategory, PartUrl, UploadConfig, UploadPlan};
