//! Clip extraction jobs and clip records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::encoding::{OutputFormat, Quality};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a new random ID.
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

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Unique identifier for a clip.
    ClipId
);

string_id!(
    /// Identifier of the project owning a clip.
    ProjectId
);

/// One time range of the source video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SegmentSpec {
    /// Start time in seconds
    pub start_time: f64,
    /// End time in seconds
    pub end_time: f64,
    /// Free-form label (e.g. "hook", "payoff")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    /// Position of this segment in the stitched output
    #[serde(default)]
    pub sequence_order: u32,
}

impl SegmentSpec {
    pub fn new(start_time: f64, end_time: f64) -> Self {
        Self {
            start_time,
            end_time,
            purpose: None,
            sequence_order: 0,
        }
    }

    pub fn with_order(mut self, sequence_order: u32) -> Self {
        self.sequence_order = sequence_order;
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    /// Requested duration in seconds (may be non-positive for invalid ranges).
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Whether the range is finite, non-negative and non-empty.
    pub fn is_valid(&self) -> bool {
        self.start_time.is_finite()
            && self.end_time.is_finite()
            && self.start_time >= 0.0
            && self.end_time > self.start_time
    }
}

/// One request to produce a clip. Owned by a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractionJob {
    pub clip_id: ClipId,
    pub project_id: ProjectId,
    /// `s3://bucket/key`, an http(s) URL, or a local path
    pub source_locator: String,
    pub segments: Vec<SegmentSpec>,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub include_fades: bool,
}

impl ExtractionJob {
    /// Multi-range ("Franken-clip") job.
    pub fn is_composite(&self) -> bool {
        self.segments.len() > 1
    }

    /// Segments sorted by `sequence_order` (stable for equal orders).
    pub fn ordered_segments(&self) -> Vec<SegmentSpec> {
        let mut segments = self.segments.clone();
        segments.sort_by_key(|s| s.sequence_order);
        segments
    }

    /// Sum of requested segment durations.
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(SegmentSpec::duration).sum()
    }
}

/// Status of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClipStatus {
    /// Clip is being processed
    #[default]
    Processing,
    /// Clip completed successfully
    Completed,
    /// Clip processing failed
    Failed,
}

impl ClipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipStatus::Processing => "processing",
            ClipStatus::Completed => "completed",
            ClipStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ClipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted outcome of a clip pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClipRecord {
    pub clip_id: ClipId,
    pub project_id: ProjectId,
    pub status: ClipStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_locator: Option<String>,
    #[serde(default)]
    pub file_size_bytes: u64,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ClipRecord {
    /// New record in the processing state.
    pub fn processing(clip_id: ClipId, project_id: ProjectId) -> Self {
        let now = Utc::now();
        Self {
            clip_id,
            project_id,
            status: ClipStatus::Processing,
            output_locator: None,
            file_size_bytes: 0,
            duration_seconds: 0.0,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}
