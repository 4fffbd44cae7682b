//! Upload configuration and issued upload plans.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::session::SessionId;

const MB: u64 = 1024 * 1024;
const GB: u64 = 1024 * MB;

/// Broad category of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    #[default]
    Video,
    Audio,
    Image,
    Document,
    Other,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Video => "video",
            FileCategory::Audio => "audio",
            FileCategory::Image => "image",
            FileCategory::Document => "document",
            FileCategory::Other => "other",
        }
    }

    /// Default maximum file size for this category.
    pub fn max_file_size(&self) -> u64 {
        match self {
            FileCategory::Video => 10 * GB,
            FileCategory::Audio => 500 * MB,
            FileCategory::Image => 50 * MB,
            FileCategory::Document => 100 * MB,
            FileCategory::Other => GB,
        }
    }

    /// Default MIME allow-list. An empty list accepts any type.
    pub fn allowed_mime_types(&self) -> &'static [&'static str] {
        match self {
            FileCategory::Video => &[
                "video/mp4",
                "video/quicktime",
                "video/webm",
                "video/x-matroska",
                "video/x-msvideo",
                "video/mpeg",
            ],
            FileCategory::Audio => &[
                "audio/mpeg",
                "audio/mp4",
                "audio/aac",
                "audio/wav",
                "audio/x-wav",
                "audio/ogg",
                "audio/flac",
                "audio/webm",
            ],
            FileCategory::Image => &[
                "image/jpeg",
                "image/png",
                "image/webp",
                "image/gif",
                "image/heic",
            ],
            FileCategory::Document => &[
                "application/pdf",
                "text/plain",
                "application/msword",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            ],
            FileCategory::Other => &[],
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Caller request describing a file to upload.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UploadConfig {
    pub owner_id: String,
    pub file_name: String,
    /// Total file size in bytes
    pub file_size: u64,
    pub mime_type: String,
    pub file_category: FileCategory,
    /// Preferred part size; clamped to the backend limits
    #[serde(default)]
    pub requested_chunk_size: Option<u64>,
    /// Force (true) or forbid (false) a chunked upload; size threshold decides when unset
    #[serde(default)]
    pub chunked: Option<bool>,
}

impl UploadConfig {
    /// Lower-cased MIME type without parameters (`video/mp4; codecs=...` -> `video/mp4`).
    pub fn essence_mime_type(&self) -> String {
        self.mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase()
    }

    /// File extension including the leading dot, or empty when absent.
    pub fn extension(&self) -> String {
        match self.file_name.rsplit_once('.') {
            Some((stem, ext))
                if !stem.is_empty()
                    && !ext.is_empty()
                    && ext.len() <= 8
                    && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
            {
                format!(".{}", ext.to_lowercase())
            }
            _ => String::new(),
        }
    }
}

/// Part size and count for a chunked upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChunkPlan {
    pub chunk_size: u64,
    pub total_chunks: u32,
}

/// Pre-authorized URL for one part.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PartUrl {
    /// Part number, 1-based
    pub part_number: u32,
    pub url: String,
}

/// Plan returned to the client describing how to upload a file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum UploadPlan {
    /// One PUT against a pre-authorized URL.
    SingleShot {
        upload_url: String,
        read_url: String,
        key: String,
        /// Locator of the object once the PUT succeeds
        locator: String,
        expires_at: DateTime<Utc>,
    },
    /// Multipart upload with one pre-authorized URL per part.
    Chunked {
        session_id: SessionId,
        backend_upload_id: String,
        key: String,
        chunk_size: u64,
        total_chunks: u32,
        part_urls: Vec<PartUrl>,
        expires_at: DateTime<Utc>,
    },
}

impl UploadPlan {
    pub fn is_chunked(&self) -> bool {
        matches!(self, UploadPlan::Chunked { .. })
    }

    /// Destination object key.
    pub fn key(&self) -> &str {
        match self {
            UploadPlan::SingleShot { key, .. } | UploadPlan::Chunked { key, .. } => key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(file_name: &str, mime_type: &str) -> UploadConfig {
        UploadConfig {
            owner_id: "user-1".to_string(),
            file_name: file_name.to_string(),
            file_size: 1024,
            mime_type: mime_type.to_string(),
            file_category: FileCategory::Video,
            requested_chunk_size: None,
            chunked: None,
        }
    }

    #[test]
    fn test_essence_mime_type() {
        assert_eq!(
            config("a.mp4", "Video/MP4; codecs=avc1").essence_mime_type(),
            "video/mp4"
        );
    }

    #[test]
    fn test_extension() {
        assert_eq!(config("Talk.MP4", "video/mp4").extension(), ".mp4");
        assert_eq!(config("noext", "video/mp4").extension(), "");
        assert_eq!(config(".hidden", "video/mp4").extension(), "");
        assert_eq!(config("weird.m p4", "video/mp4").extension(), "");
    }

    #[test]
    fn test_other_category_accepts_any_mime() {
        assert!(FileCategory::Other.allowed_mime_types().is_empty());
        assert!(FileCategory::Video.allowed_mime_types().contains(&"video/mp4"));
    }

    #[test]
    fn test_plan_serializes_with_mode_tag() {
        let plan = UploadPlan::SingleShot {
            upload_url: "https://put".to_string(),
            read_url: "https://get".to_string(),
            key: "uploads/u/videos/1.mp4".to_string(),
            locator: "s3://media/uploads/u/videos/1.mp4".to_string(),
            expires_at: Utc::now(),
        };
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["mode"], "single_shot");
        assert!(!plan.is_chunked());
    }
}
