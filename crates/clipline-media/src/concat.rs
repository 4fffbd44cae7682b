//! Segment concatenation.
//!
//! Two strategies are tried in order:
//! 1. Concat demuxer with stream copy. Fast, but only works when every
//!    segment shares codec parameters and timebases.
//! 2. `concat` filter graph with per-input normalisation and a full re-encode.

use std::fmt;
use std::path::{Path, PathBuf};

use clipline_models::{DEFAULT_AUDIO_BITRATE, DEFAULT_AUDIO_SAMPLE_RATE, DEFAULT_PRESET};
use tracing::{info, warn};

use crate::command::FfmpegCommand;
use crate::encoder::Encoder;
use crate::error::{MediaError, MediaResult};
use crate::filters::concat_filter_graph;
use crate::segment::SegmentSettings;

/// Which strategy produced the concatenated file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatStrategy {
    Demuxer,
    FilterGraph,
}

impl ConcatStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcatStrategy::Demuxer => "concat_demuxer",
            ConcatStrategy::FilterGraph => "filter_graph",
        }
    }
}

impl fmt::Display for ConcatStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Concat-demuxer manifest: one `file '<path>'` line per input.
pub fn manifest_contents(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| {
            // Single quotes are closed, escaped, and reopened
            let escaped = p.to_string_lossy().replace('\'', r"'\''");
            format!("file '{}'\n", escaped)
        })
        .collect()
}

/// Stream-copy concatenation reading `manifest`.
pub fn build_demuxer_command(manifest: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(manifest, output)
        .concat_demuxer()
        .codec_copy()
}

/// Re-encoding concatenation through a normalising filter graph.
pub fn build_filter_graph_command(
    inputs: &[PathBuf],
    output: &Path,
    settings: &SegmentSettings,
) -> FfmpegCommand {
    let profile = settings.quality.profile();
    let format = settings.output_format;

    let mut cmd = FfmpegCommand::with_inputs(inputs, output)
        .filter_complex(concat_filter_graph(inputs.len(), &profile))
        .map("[outv]")
        .map("[outa]")
        .video_codec(format.video_codec())
        .video_bitrate(
            profile.video_bitrate(),
            profile.max_bitrate(),
            profile.buffer_size(),
        )
        .audio_codec(format.audio_codec())
        .audio_bitrate(DEFAULT_AUDIO_BITRATE)
        .audio_stereo(DEFAULT_AUDIO_SAMPLE_RATE);

    if format.video_codec() == "libx264" {
        cmd = cmd.preset(DEFAULT_PRESET);
    }
    if format.supports_faststart() {
        cmd = cmd.faststart();
    }

    cmd
}

/// Concatenate `inputs` into `output`, falling back to the filter graph when
/// stream copy fails.
///
/// The manifest is written to `work_dir` and removed before returning. The
/// demuxer failure is logged and only surfaces, together with the fallback
/// failure, when both strategies fail.
pub async fn concat_with_fallback(
    encoder: &dyn Encoder,
    inputs: &[PathBuf],
    work_dir: &Path,
    output: &Path,
    settings: &SegmentSettings,
) -> MediaResult<ConcatStrategy> {
    if inputs.is_empty() {
        return Err(MediaError::NoSegments);
    }

    let manifest = work_dir.join("concat_list.txt");
    tokio::fs::write(&manifest, manifest_contents(inputs)).await?;

    let primary = encoder
        .run(&build_demuxer_command(&manifest, output), None)
        .await;

    if let Err(e) = tokio::fs::remove_file(&manifest).await {
        warn!(path = %manifest.display(), "Failed to remove concat manifest: {}", e);
    }

    let primary_err = match primary {
        Ok(()) => {
            info!(segments = inputs.len(), strategy = "concat_demuxer", "Segments concatenated");
            return Ok(ConcatStrategy::Demuxer);
        }
        Err(e) => e,
    };

    warn!(
        segments = inputs.len(),
        error = %primary_err,
        "Stream-copy concat failed, falling back to filter graph"
    );

    // Drop any partial output left by the demuxer
    let _ = tokio::fs::remove_file(output).await;

    match encoder
        .run(&build_filter_graph_command(inputs, output, settings), None)
        .await
    {
        Ok(()) => {
            info!(segments = inputs.len(), strategy = "filter_graph", "Segments concatenated");
            Ok(ConcatStrategy::FilterGraph)
        }
        Err(fallback_err) => Err(MediaError::ConcatFailed {
            primary: describe(&primary_err),
            fallback: describe(&fallback_err),
        }),
    }
}

fn describe(err: &MediaError) -> String {
    match err.stderr() {
        Some(stderr) => format!("{}: {}", err, stderr),
        None => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use clipline_models::{OutputFormat, Quality};
    use std::sync::Mutex;

    use crate::progress::ProgressCallback;

    /// Fails every command whose arguments contain `fail_on`.
    struct ScriptedEncoder {
        fail_on: Vec<&'static str>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedEncoder {
        fn new(fail_on: Vec<&'static str>) -> Self {
            Self {
                fail_on,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Encoder for ScriptedEncoder {
        async fn run(&self, cmd: &FfmpegCommand, _observer: Option<ProgressCallback>) -> MediaResult<()> {
            let args = cmd.build_args();
            self.calls.lock().unwrap().push(args.clone());
            if self.fail_on.iter().any(|f| args.iter().any(|a| a == f)) {
                return Err(MediaError::ffmpeg_failed(
                    "FFmpeg exited with non-zero status",
                    Some("Non-monotonous DTS".to_string()),
                    Some(1),
                ));
            }
            tokio::fs::write(cmd.output_path(), b"clip").await?;
            Ok(())
        }
    }

    fn settings() -> SegmentSettings {
        SegmentSettings::new(Quality::Medium, OutputFormat::Mp4, false)
    }

    #[test]
    fn test_manifest_escapes_quotes() {
        let manifest = manifest_contents(&[PathBuf::from("/tmp/a.mp4"), PathBuf::from("/tmp/it's.mp4")]);
        assert_eq!(manifest, "file '/tmp/a.mp4'\nfile '/tmp/it'\\''s.mp4'\n");
    }

    #[tokio::test]
    async fn test_demuxer_success() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = ScriptedEncoder::new(vec![]);
        let inputs = vec![dir.path().join("s0.mp4"), dir.path().join("s1.mp4")];
        let output = dir.path().join("out.mp4");

        let strategy = concat_with_fallback(&encoder, &inputs, dir.path(), &output, &settings())
            .await
            .unwrap();

        assert_eq!(strategy, ConcatStrategy::Demuxer);
        assert_eq!(encoder.calls.lock().unwrap().len(), 1);
        assert!(!dir.path().join("concat_list.txt").exists());
    }

    #[tokio::test]
    async fn test_falls_back_to_filter_graph() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = ScriptedEncoder::new(vec!["concat"]);
        let inputs = vec![dir.path().join("s0.mp4"), dir.path().join("s1.mp4")];
        let output = dir.path().join("out.mp4");

        let strategy = concat_with_fallback(&encoder, &inputs, dir.path(), &output, &settings())
            .await
            .unwrap();

        assert_eq!(strategy, ConcatStrategy::FilterGraph);
        let calls = encoder.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].contains(&"-filter_complex".to_string()));
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_double_failure_carries_both_messages() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = ScriptedEncoder::new(vec!["concat", "-filter_complex"]);
        let inputs = vec![dir.path().join("s0.mp4"), dir.path().join("s1.mp4")];

        let err = concat_with_fallback(&encoder, &inputs, dir.path(), &dir.path().join("o.mp4"), &settings())
            .await
            .unwrap_err();

        match err {
            MediaError::ConcatFailed { primary, fallback } => {
                assert!(primary.contains("Non-monotonous DTS"));
                assert!(fallback.contains("Non-monotonous DTS"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = ScriptedEncoder::new(vec![]);
        let err = concat_with_fallback(&encoder, &[], dir.path(), &dir.path().join("o.mp4"), &settings())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::NoSegments));
    }
}
