//! Single-segment extraction command.

use std::path::Path;

use clipline_models::{
    OutputFormat, Quality, DEFAULT_AUDIO_BITRATE, DEFAULT_AUDIO_SAMPLE_RATE, DEFAULT_FADE_SECONDS,
    DEFAULT_PRESET,
};

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::filters::{audio_fade_filter, segment_video_filter, video_fade_filter};

/// Encoding settings applied to one extraction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSettings {
    pub quality: Quality,
    pub output_format: OutputFormat,
    pub include_fades: bool,
}

impl SegmentSettings {
    pub fn new(quality: Quality, output_format: OutputFormat, include_fades: bool) -> Self {
        Self {
            quality,
            output_format,
            include_fades,
        }
    }

    /// Cheapest settings for the same container: low tier, no fades.
    pub fn degraded(&self) -> Self {
        Self {
            quality: Quality::Low,
            output_format: self.output_format,
            include_fades: false,
        }
    }
}

/// Build the FFmpeg command cutting `[start, end)` from `source` into `output`.
///
/// `source` is a local path or a streamable URL. Seeking happens before the
/// input so only the requested range is decoded.
pub fn build_segment_command(
    source: &str,
    output: &Path,
    start: f64,
    end: f64,
    settings: &SegmentSettings,
) -> MediaResult<FfmpegCommand> {
    if !(start.is_finite() && end.is_finite() && start >= 0.0 && end > start) {
        return Err(MediaError::invalid_time_range(start, end));
    }

    let duration = end - start;
    let profile = settings.quality.profile();
    let format = settings.output_format;

    let (video_fade, audio_fade) = if settings.include_fades {
        (
            video_fade_filter(duration, DEFAULT_FADE_SECONDS),
            audio_fade_filter(duration, DEFAULT_FADE_SECONDS),
        )
    } else {
        (None, None)
    };

    let mut cmd = FfmpegCommand::new(source, output)
        .seek(start)
        .duration(duration)
        .video_filter(segment_video_filter(&profile, video_fade))
        .video_codec(format.video_codec())
        .video_bitrate(
            profile.video_bitrate(),
            profile.max_bitrate(),
            profile.buffer_size(),
        )
        .framerate(profile.framerate)
        .audio_codec(format.audio_codec())
        .audio_bitrate(DEFAULT_AUDIO_BITRATE)
        .audio_stereo(DEFAULT_AUDIO_SAMPLE_RATE);

    if let Some(fade) = audio_fade {
        cmd = cmd.audio_filter(fade);
    }

    cmd = match format {
        OutputFormat::Webm => cmd.output_args(["-deadline", "realtime", "-row-mt", "1"]),
        OutputFormat::Mp4 | OutputFormat::Mov => cmd
            .preset(DEFAULT_PRESET)
            .output_args(["-pix_fmt", "yuv420p"]),
    };

    if format.supports_faststart() {
        cmd = cmd.faststart();
    }

    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn arg_after(args: &[String], flag: &str) -> Option<String> {
        args.iter()
            .position(|a| a == flag)
            .map(|i| args[i + 1].clone())
    }

    #[test]
    fn test_medium_mp4_command() {
        let settings = SegmentSettings::new(Quality::Medium, OutputFormat::Mp4, false);
        let cmd = build_segment_command("/in.mp4", &PathBuf::from("/out.mp4"), 5.0, 12.5, &settings)
            .unwrap();
        let args = cmd.build_args();

        assert_eq!(arg_after(&args, "-ss").unwrap(), "5.000");
        assert_eq!(arg_after(&args, "-t").unwrap(), "7.500");
        assert_eq!(arg_after(&args, "-b:v").unwrap(), "2500k");
        assert_eq!(arg_after(&args, "-r").unwrap(), "30");
        assert_eq!(arg_after(&args, "-c:v").unwrap(), "libx264");
        assert_eq!(arg_after(&args, "-movflags").unwrap(), "+faststart");
        assert!(arg_after(&args, "-vf").unwrap().starts_with("scale=1280:720"));
        assert!(arg_after(&args, "-af").is_none());
    }

    #[test]
    fn test_fades_and_webm() {
        let settings = SegmentSettings::new(Quality::High, OutputFormat::Webm, true);
        let args = build_segment_command("https://x/in.mp4", &PathBuf::from("/o.webm"), 0.0, 8.0, &settings)
            .unwrap()
            .build_args();

        assert!(arg_after(&args, "-vf").unwrap().contains("fade=t=out:st=7.500"));
        assert!(arg_after(&args, "-af").unwrap().contains("afade=t=in"));
        assert_eq!(arg_after(&args, "-c:a").unwrap(), "libopus");
        assert!(!args.contains(&"-movflags".to_string()));
    }

    #[test]
    fn test_invalid_range_rejected() {
        let settings = SegmentSettings::new(Quality::Low, OutputFormat::Mp4, false);
        let out = PathBuf::from("/o.mp4");
        for (start, end) in [(10.0, 10.0), (10.0, 5.0), (-1.0, 3.0), (0.0, f64::INFINITY)] {
            assert!(matches!(
                build_segment_command("/in.mp4", &out, start, end, &settings),
                Err(MediaError::InvalidTimeRange { .. })
            ));
        }
    }

    #[test]
    fn test_degraded_settings() {
        let settings = SegmentSettings::new(Quality::High, OutputFormat::Mov, true).degraded();
        assert_eq!(settings.quality, Quality::Low);
        assert_eq!(settings.output_format, OutputFormat::Mov);
        assert!(!settings.include_fades);
    }
}
