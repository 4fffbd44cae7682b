#![deny(unreachable_patterns)]
//! FFmpeg CLI wrapper for clip extraction.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with multiple inputs
//! - Progress parsing from `-progress pipe:2`
//! - Timeout, cancellation and forced kill via tokio
//! - Segment extraction commands with quality profiles and fades
//! - Concatenation via the concat demuxer with a filter-graph fallback
//! - Resource-exhaustion classification of encoder failures

pub mod command;
pub mod concat;
pub mod encoder;
pub mod error;
pub mod filters;
pub mod progress;
pub mod segment;

pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use concat::{
    build_demuxer_command, build_filter_graph_command, concat_with_fallback, manifest_contents,
    ConcatStrategy,
};
pub use encoder::{Encoder, FfmpegEncoder};
pub use error::{MediaError, MediaResult};
pub use progress::{FfmpegProgress, ProgressCallback};
pub use segment::{build_segment_command, SegmentSettings};
