//! Clip extraction pipeline.
//!
//! - [`VideoSegmentExtractor`] cuts one range and uploads it
//! - [`SegmentStitcher`] renders several ranges and joins them
//! - [`ClipPipelineOrchestrator`] validates jobs, dispatches them and
//!   records their outcome

pub mod clip_store;
pub mod extractor;
pub mod orchestrator;
pub mod stitcher;

pub use clip_store::{ClipStore, MemoryClipStore};
pub use extractor::{ExtractedClip, ExtractionRequest, RenderedSegment, VideoSegmentExtractor};
pub use orchestrator::ClipPipelineOrchestrator;
pub use stitcher::{SegmentStitcher, StitchRequest, StitchedClip};
