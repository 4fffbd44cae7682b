//! Composite clips: several ranges of one source joined into one output.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use clipline_media::{concat_with_fallback, ConcatStrategy, SegmentSettings};
use clipline_models::{ClipId, ExtractionJob, ProjectId, SegmentSpec};
use clipline_storage::{clip_key, locator_for};

use crate::clip_pipeline::extractor::{check_range, ExtractionRequest, VideoSegmentExtractor};
use crate::error::{PipelineError, PipelineResult};
use crate::logging::ClipLogger;
use crate::metrics;

/// Ranges to join, in any order; they are stitched by `sequence_order`.
#[derive(Debug, Clone)]
pub struct StitchRequest {
    pub clip_id: ClipId,
    pub project_id: ProjectId,
    pub source_locator: String,
    pub segments: Vec<SegmentSpec>,
    pub settings: SegmentSettings,
}

impl StitchRequest {
    pub fn from_job(job: &ExtractionJob) -> Self {
        Self {
            clip_id: job.clip_id.clone(),
            project_id: job.project_id.clone(),
            source_locator: job.source_locator.clone(),
            segments: job.segments.clone(),
            settings: SegmentSettings::new(job.quality, job.output_format, job.include_fades),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StitchedClip {
    pub output_locator: String,
    pub file_size: u64,
    /// Sum of the requested segment durations
    pub total_duration: f64,
    /// `None` when a single segment needed no concatenation
    pub strategy: Option<ConcatStrategy>,
}

pub struct SegmentStitcher {
    extractor: Arc<VideoSegmentExtractor>,
}

impl SegmentStitcher {
    pub fn new(extractor: Arc<VideoSegmentExtractor>) -> Self {
        Self { extractor }
    }

    pub fn extractor(&self) -> &VideoSegmentExtractor {
        &self.extractor
    }

    pub async fn stitch(&self, request: &StitchRequest) -> PipelineResult<StitchedClip> {
        if request.segments.is_empty() {
            return Err(PipelineError::validation("at least one segment is required"));
        }
        for (index, segment) in request.segments.iter().enumerate() {
            check_range(segment.start_time, segment.end_time)
                .map_err(|e| PipelineError::validation(format!("segment {}: {}", index, e)))?;
        }

        let mut ordered = request.segments.clone();
        ordered.sort_by_key(|s| s.sequence_order);
        let total_duration: f64 = ordered.iter().map(SegmentSpec::duration).sum();

        if let [only] = ordered.as_slice() {
            let clip = self
                .extractor
                .extract(&ExtractionRequest {
                    clip_id: request.clip_id.clone(),
                    project_id: request.project_id.clone(),
                    source_locator: request.source_locator.clone(),
                    start_time: only.start_time,
                    end_time: only.end_time,
                    settings: request.settings,
                })
                .await?;
            return Ok(StitchedClip {
                output_locator: clip.output_locator,
                file_size: clip.file_size,
                total_duration: clip.duration,
                strategy: None,
            });
        }

        let format = request.settings.output_format;
        let key = clip_key(&request.project_id, &request.clip_id, format.extension())
            .map_err(PipelineError::from_key_error)?;

        let logger = ClipLogger::new(&request.clip_id, &request.project_id, "stitch");
        logger.log_start(&format!(
            "{} segments, {:.3}s total",
            ordered.len(),
            total_duration
        ));

        let source = self.extractor.resolve_source(&request.source_locator).await?;
        let workspace = self.extractor.workspace("stitch-").await?;

        // Every segment shares one profile so the stream-copy concat stays valid
        let mut current = request.settings;
        let mut paths: Vec<PathBuf> = Vec::with_capacity(ordered.len());
        for (index, segment) in ordered.iter().enumerate() {
            let path = workspace
                .path()
                .join(format!("segment_{:03}.{}", index, format.extension()));
            let rendered = self
                .extractor
                .render_segment(
                    &source,
                    &path,
                    segment.start_time,
                    segment.end_time,
                    &current,
                    &logger,
                )
                .await?;
            if rendered.settings != current {
                current = rendered.settings;
                if index > 0 {
                    logger.log_warning(&format!(
                        "segment {} rendered at {} quality, re-rendering {} earlier segment(s)",
                        index, current.quality, index
                    ));
                }
                for (earlier, done) in ordered[..index].iter().enumerate() {
                    self.extractor
                        .render_segment(
                            &source,
                            &paths[earlier],
                            done.start_time,
                            done.end_time,
                            &current,
                            &logger,
                        )
                        .await?;
                }
            }
            logger.log_progress(&format!("segment {}/{} rendered", index + 1, ordered.len()));
            paths.push(rendered.path);
        }

        let output = workspace
            .path()
            .join(format!("{}.{}", request.clip_id, format.extension()));
        let strategy = concat_with_fallback(
            self.extractor.encoder(),
            &paths,
            workspace.path(),
            &output,
            &current,
        )
        .await
        .map_err(|e| PipelineError::Stitching(e.to_string()))?;
        metrics::record_concat(strategy.as_str());

        let file_size = self
            .extractor
            .storage()
            .upload_file(&output, &key, format.content_type())
            .await?;
        let output_locator = locator_for(self.extractor.storage().bucket(), &key);

        if let Err(e) = workspace.close() {
            warn!(clip_id = %request.clip_id, "Failed to remove stitch workspace: {}", e);
        }

        info!(
            clip_id = %request.clip_id,
            segments = paths.len(),
            strategy = %strategy,
            total_duration,
            file_size,
            "Stitched composite clip"
        );
        logger.log_completion(&output_locator);

        Ok(StitchedClip {
            output_locator,
            file_size,
            total_duration,
            strategy: Some(strategy),
        })
    }
}
