//! Quality tiers and output formats for clip encoding.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default encoding preset
pub const DEFAULT_PRESET: &str = "veryfast";
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";
/// Default audio sample rate
pub const DEFAULT_AUDIO_SAMPLE_RATE: u32 = 44_100;
/// Default fade length in seconds
pub const DEFAULT_FADE_SECONDS: f64 = 0.5;

/// Output quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
        }
    }

    /// Fixed bitrate/resolution/framerate bundle for this tier.
    pub fn profile(&self) -> QualityProfile {
        match self {
            Quality::Low => QualityProfile {
                width: 854,
                height: 480,
                video_bitrate_kbps: 1000,
                framerate: 24,
            },
            Quality::Medium => QualityProfile {
                width: 1280,
                height: 720,
                video_bitrate_kbps: 2500,
                framerate: 30,
            },
            Quality::High => QualityProfile {
                width: 1920,
                height: 1080,
                video_bitrate_kbps: 5000,
                framerate: 30,
            },
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Encoding profile for a quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QualityProfile {
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u32,
    pub framerate: u32,
}

impl QualityProfile {
    /// `-b:v` value, e.g. "2500k".
    pub fn video_bitrate(&self) -> String {
        format!("{}k", self.video_bitrate_kbps)
    }

    /// `-maxrate` value; capped at 1.5x the target bitrate.
    pub fn max_bitrate(&self) -> String {
        format!("{}k", self.video_bitrate_kbps * 3 / 2)
    }

    /// `-bufsize` value; two seconds of the target bitrate.
    pub fn buffer_size(&self) -> String {
        format!("{}k", self.video_bitrate_kbps * 2)
    }

    /// Scale into the frame keeping aspect ratio, then pad to the exact size.
    pub fn scale_filter(&self) -> String {
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps}",
            w = self.width,
            h = self.height,
            fps = self.framerate
        )
    }
}

/// Container/codec combination for an output clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Webm,
    Mov,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
            OutputFormat::Mov => "mov",
        }
    }

    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "video/mp4",
            OutputFormat::Webm => "video/webm",
            OutputFormat::Mov => "video/quicktime",
        }
    }

    pub fn video_codec(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 | OutputFormat::Mov => "libx264",
            OutputFormat::Webm => "libvpx-vp9",
        }
    }

    pub fn audio_codec(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 | OutputFormat::Mov => "aac",
            OutputFormat::Webm => "libopus",
        }
    }

    /// Whether the container benefits from moving the index to the front.
    pub fn supports_faststart(&self) -> bool {
        matches!(self, OutputFormat::Mp4 | OutputFormat::Mov)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_are_ordered() {
        let low = Quality::Low.profile();
        let medium = Quality::Medium.profile();
        let high = Quality::High.profile();
        assert!(low.video_bitrate_kbps < medium.video_bitrate_kbps);
        assert!(medium.video_bitrate_kbps < high.video_bitrate_kbps);
        assert!(low.height < medium.height && medium.height < high.height);
    }

    #[test]
    fn test_profile_args() {
        let profile = Quality::Medium.profile();
        assert_eq!(profile.video_bitrate(), "2500k");
        assert_eq!(profile.max_bitrate(), "3750k");
        assert_eq!(profile.buffer_size(), "5000k");
        assert!(profile.scale_filter().starts_with("scale=1280:720"));
        assert!(profile.scale_filter().ends_with("fps=30"));
    }

    #[test]
    fn test_format_codecs() {
        assert_eq!(OutputFormat::Mp4.video_codec(), "libx264");
        assert_eq!(OutputFormat::Webm.audio_codec(), "libopus");
        assert_eq!(OutputFormat::Mov.content_type(), "video/quicktime");
        assert!(!OutputFormat::Webm.supports_faststart());
    }
}
