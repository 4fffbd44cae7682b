//! Single-range clip extraction with degrading retries.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use clipline_media::{build_segment_command, Encoder, ProgressCallback, SegmentSettings};
use clipline_models::{ClipId, ExtractionJob, ProjectId, SegmentSpec, SourceLocator};
use clipline_storage::{clip_key, locator_for, ObjectStorage};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::ClipLogger;
use crate::metrics;
use crate::retry::{settings_for_attempt, RetryConfig};

/// One range of one source, rendered into one clip.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub clip_id: ClipId,
    pub project_id: ProjectId,
    pub source_locator: String,
    pub start_time: f64,
    pub end_time: f64,
    pub settings: SegmentSettings,
}

impl ExtractionRequest {
    /// Request for `segment` of `job`.
    pub fn for_segment(job: &ExtractionJob, segment: &SegmentSpec) -> Self {
        Self {
            clip_id: job.clip_id.clone(),
            project_id: job.project_id.clone(),
            source_locator: job.source_locator.clone(),
            start_time: segment.start_time,
            end_time: segment.end_time,
            settings: SegmentSettings::new(job.quality, job.output_format, job.include_fades),
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// An extracted and uploaded clip.
#[derive(Debug, Clone)]
pub struct ExtractedClip {
    pub output_locator: String,
    pub file_size: u64,
    /// Requested duration in seconds
    pub duration: f64,
    /// Encoder invocations it took
    pub attempts: u32,
    /// Settings of the attempt that succeeded
    pub settings: SegmentSettings,
}

/// A segment rendered to a local file.
#[derive(Debug, Clone)]
pub struct RenderedSegment {
    pub path: PathBuf,
    pub attempts: u32,
    pub settings: SegmentSettings,
}

pub(crate) fn check_range(start: f64, end: f64) -> PipelineResult<()> {
    if start.is_finite() && end.is_finite() && start >= 0.0 && end > start {
        Ok(())
    } else {
        Err(PipelineError::validation(format!(
            "end time {:.3}s must be after start time {:.3}s",
            end, start
        )))
    }
}

/// Cuts ranges out of source videos and uploads the result.
pub struct VideoSegmentExtractor {
    encoder: Arc<dyn Encoder>,
    storage: Arc<dyn ObjectStorage>,
    work_dir: PathBuf,
    retry: RetryConfig,
    url_expiry: Duration,
    observer: Option<ProgressCallback>,
}

impl VideoSegmentExtractor {
    pub fn new(
        encoder: Arc<dyn Encoder>,
        storage: Arc<dyn ObjectStorage>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            encoder,
            storage,
            work_dir: work_dir.into(),
            retry: RetryConfig::default(),
            url_expiry: Duration::from_secs(3600),
            observer: None,
        }
    }

    pub fn from_config(
        encoder: Arc<dyn Encoder>,
        storage: Arc<dyn ObjectStorage>,
        config: &PipelineConfig,
    ) -> Self {
        let retry = RetryConfig::default()
            .with_max_retries(config.max_extraction_retries)
            .with_base_delay(config.retry_base_delay)
            .with_max_delay(config.retry_max_delay);

        Self::new(encoder, storage, config.work_dir.clone())
            .with_retry(retry)
            .with_url_expiry(config.url_expiry)
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_url_expiry(mut self, expiry: Duration) -> Self {
        self.url_expiry = expiry;
        self
    }

    /// Receive encoder progress. The observer never affects control flow.
    pub fn with_observer(mut self, observer: ProgressCallback) -> Self {
        self.observer = Some(observer);
        self
    }

    pub(crate) fn encoder(&self) -> &dyn Encoder {
        self.encoder.as_ref()
    }

    pub(crate) fn storage(&self) -> &dyn ObjectStorage {
        self.storage.as_ref()
    }

    /// Private scratch directory under the work dir, removed on drop.
    pub(crate) async fn workspace(&self, prefix: &str) -> PipelineResult<tempfile::TempDir> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        Ok(tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&self.work_dir)?)
    }

    /// Turn a locator into something the encoder can open.
    ///
    /// Stored objects become presigned GET URLs; URLs and local paths pass
    /// through.
    pub async fn resolve_source(&self, locator: &str) -> PipelineResult<String> {
        let parsed = SourceLocator::parse(locator)
            .map_err(|e| PipelineError::validation(format!("source locator: {}", e)))?;

        match parsed {
            SourceLocator::Stored { bucket, key } => {
                if bucket != self.storage.bucket() {
                    return Err(PipelineError::validation(format!(
                        "source bucket '{}' is not served by this pipeline",
                        bucket
                    )));
                }
                Ok(self.storage.presign_get(&key, self.url_expiry).await?)
            }
            SourceLocator::Remote(url) => Ok(url),
            SourceLocator::Local(path) => Ok(path.to_string_lossy().into_owned()),
        }
    }

    /// Render `[start, end)` of `source` to `output`, retrying resource
    /// failures with degraded settings.
    pub async fn render_segment(
        &self,
        source: &str,
        output: &Path,
        start: f64,
        end: f64,
        requested: &SegmentSettings,
        logger: &ClipLogger,
    ) -> PipelineResult<RenderedSegment> {
        check_range(start, end)?;

        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0;

        loop {
            let settings = settings_for_attempt(requested, attempt);
            let cmd = build_segment_command(source, output, start, end, &settings)
                .map_err(|e| PipelineError::encoding(e, attempt + 1))?;

            let started = Instant::now();
            let result = self.encoder.run(&cmd, self.observer.clone()).await;
            metrics::record_ffmpeg_duration(
                "extract",
                settings.quality.as_str(),
                started.elapsed().as_secs_f64(),
            );

            let err = match result {
                Ok(()) => {
                    return Ok(RenderedSegment {
                        path: output.to_path_buf(),
                        attempts: attempt + 1,
                        settings,
                    })
                }
                Err(e) => e,
            };

            let _ = tokio::fs::remove_file(output).await;
            attempt += 1;

            if !err.is_resource_exhaustion() || attempt >= max_attempts {
                logger.log_error(&format!(
                    "extraction of {:.3}s-{:.3}s failed after {} attempt(s): {}",
                    start, end, attempt, err
                ));
                return Err(PipelineError::encoding(err, attempt));
            }

            let delay = self.retry.delay_for_retry(attempt);
            warn!(
                clip_id = logger.clip_id(),
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Resource failure during extraction, retrying at low quality without fades"
            );
            metrics::record_extraction_retry(attempt);
            tokio::time::sleep(delay).await;
        }
    }

    /// Extract one range and upload it as the clip.
    pub async fn extract(&self, request: &ExtractionRequest) -> PipelineResult<ExtractedClip> {
        check_range(request.start_time, request.end_time)?;

        let format = request.settings.output_format;
        let key = clip_key(&request.project_id, &request.clip_id, format.extension())
            .map_err(PipelineError::from_key_error)?;

        let logger = ClipLogger::new(&request.clip_id, &request.project_id, "extract");
        logger.log_start(&format!(
            "{:.3}s-{:.3}s at {} quality",
            request.start_time, request.end_time, request.settings.quality
        ));

        let source = self.resolve_source(&request.source_locator).await?;
        let workspace = self.workspace("extract-").await?;
        let output = workspace
            .path()
            .join(format!("{}.{}", request.clip_id, format.extension()));

        let rendered = self
            .render_segment(
                &source,
                &output,
                request.start_time,
                request.end_time,
                &request.settings,
                &logger,
            )
            .await?;

        let file_size = self
            .storage
            .upload_file(&rendered.path, &key, format.content_type())
            .await?;
        let output_locator = locator_for(self.storage.bucket(), &key);

        if let Err(e) = workspace.close() {
            warn!(clip_id = %request.clip_id, "Failed to remove extraction workspace: {}", e);
        }

        info!(
            clip_id = %request.clip_id,
            attempts = rendered.attempts,
            quality = %rendered.settings.quality,
            file_size,
            "Extracted clip"
        );
        logger.log_completion(&output_locator);

        Ok(ExtractedClip {
            output_locator,
            file_size,
            duration: request.duration(),
            attempts: rendered.attempts,
            settings: rendered.settings,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use clipline_media::MediaError;
    use clipline_models::{OutputFormat, Quality};
    use clipline_storage::MemoryStorage;

    fn request(start: f64, end: f64) -> ExtractionRequest {
        ExtractionRequest {
            clip_id: ClipId::from("clip-1"),
            project_id: ProjectId::from("project-1"),
            source_locator: "s3://media/uploads/u/videos/src.mp4".to_string(),
            start_time: start,
            end_time: end,
            settings: SegmentSettings::new(Quality::High, OutputFormat::Mp4, true),
        }
    }

    fn extractor(
        encoder: Arc<FakeEncoder>,
        work_dir: &Path,
    ) -> (VideoSegmentExtractor, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new("media"));
        let retry = RetryConfig::default().with_base_delay(Duration::from_millis(1));
        let extractor =
            VideoSegmentExtractor::new(encoder, storage.clone(), work_dir).with_retry(retry);
        (extractor, storage)
    }

    fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[tokio::test]
    async fn test_extract_uploads_clip() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(FakeEncoder::new());
        let (extractor, storage) = extractor(encoder.clone(), dir.path());

        let clip = extractor.extract(&request(5.0, 15.0)).await.unwrap();

        assert_eq!(clip.output_locator, "s3://media/clips/project-1/clip-1.mp4");
        assert_eq!(clip.duration, 10.0);
        assert_eq!(clip.attempts, 1);
        assert_eq!(clip.file_size, 7);
        assert_eq!(storage.object("clips/project-1/clip-1.mp4").unwrap().content_type, "video/mp4");

        let args = encoder.call(0);
        assert_eq!(arg_after(&args, "-ss"), Some("5.000"));
        assert_eq!(arg_after(&args, "-t"), Some("10.000"));
        assert!(arg_after(&args, "-i").unwrap().starts_with("memory://media/uploads/u/videos/src.mp4"));

        // Workspace is gone
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_range_never_calls_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(FakeEncoder::new());
        let (extractor, _) = extractor(encoder.clone(), dir.path());

        for (start, end) in [(10.0, 10.0), (10.0, 5.0), (-1.0, 5.0)] {
            let err = extractor.extract(&request(start, end)).await.unwrap_err();
            assert!(matches!(err, PipelineError::Validation(_)));
        }
        assert_eq!(encoder.call_count(), 0);
    }

    #[tokio::test]
    async fn test_resource_failure_retries_once_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(FakeEncoder::failing_with(vec![oom()]));
        let (extractor, _) = extractor(encoder.clone(), dir.path());

        let clip = extractor.extract(&request(0.0, 10.0)).await.unwrap();

        assert_eq!(clip.attempts, 2);
        assert_eq!(encoder.call_count(), 2);
        assert_eq!(clip.settings.quality, Quality::Low);
        assert!(!clip.settings.include_fades);

        let first = encoder.call(0);
        let second = encoder.call(1);
        assert_eq!(arg_after(&first, "-b:v"), Some("5000k"));
        assert!(first.iter().any(|a| a.contains("fade=t=in")));
        assert_eq!(arg_after(&second, "-b:v"), Some("1000k"));
        assert!(!second.iter().any(|a| a.contains("fade=")));
        assert!(!second.iter().any(|a| a == "-af"));
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(FakeEncoder::failing_with(vec![corrupt_input()]));
        let (extractor, storage) = extractor(encoder.clone(), dir.path());

        let err = extractor.extract(&request(0.0, 10.0)).await.unwrap_err();

        assert!(matches!(err, PipelineError::Encoding { attempts: 1, .. }));
        assert_eq!(encoder.call_count(), 1);
        assert!(storage.object("clips/project-1/clip-1.mp4").is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(FakeEncoder::failing_with(vec![
            MediaError::Timeout(1500),
            MediaError::Killed { signal: 9, stderr: None },
            oom(),
            oom(),
        ]));
        let (extractor, _) = extractor(encoder.clone(), dir.path());

        let err = extractor.extract(&request(0.0, 10.0)).await.unwrap_err();

        assert!(matches!(err, PipelineError::Encoding { attempts: 3, .. }));
        assert_eq!(encoder.call_count(), 3);
    }

    #[tokio::test]
    async fn test_resolve_source_variants() {
        let dir = tempfile::tempdir().unwrap();
        let (extractor, _) = extractor(Arc::new(FakeEncoder::new()), dir.path());

        assert_eq!(
            extractor.resolve_source("https://cdn.example.com/a.mp4").await.unwrap(),
            "https://cdn.example.com/a.mp4"
        );
        assert_eq!(extractor.resolve_source("/data/in.mp4").await.unwrap(), "/data/in.mp4");
        assert!(matches!(
            extractor.resolve_source("s3://other-bucket/a.mp4").await.unwrap_err(),
            PipelineError::Validation(_)
        ));
        assert!(matches!(
            extractor.resolve_source("").await.unwrap_err(),
            PipelineError::Validation(_)
        ));
    }
}
