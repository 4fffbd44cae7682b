//! Clip job orchestration: validation, status bookkeeping and dispatch to
//! the extractor or stitcher under a concurrency bound.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{warn, Instrument};

use clipline_models::{ClipId, ClipRecord, ClipStatus, ExtractionJob};

use crate::clip_pipeline::clip_store::ClipStore;
use crate::clip_pipeline::extractor::{check_range, ExtractionRequest, VideoSegmentExtractor};
use crate::clip_pipeline::stitcher::{SegmentStitcher, StitchRequest};
use crate::error::{PipelineError, PipelineResult};
use crate::logging::ClipLogger;
use crate::metrics;

struct ClipOutput {
    output_locator: String,
    file_size: u64,
    duration: f64,
}

pub struct ClipPipelineOrchestrator {
    extractor: Arc<VideoSegmentExtractor>,
    stitcher: SegmentStitcher,
    clips: Arc<dyn ClipStore>,
    permits: Arc<Semaphore>,
}

impl ClipPipelineOrchestrator {
    pub fn new(
        extractor: Arc<VideoSegmentExtractor>,
        clips: Arc<dyn ClipStore>,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            stitcher: SegmentStitcher::new(extractor.clone()),
            extractor,
            clips,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }

    /// Reject jobs that cannot produce a clip.
    pub fn validate_job(job: &ExtractionJob) -> PipelineResult<()> {
        if job.segments.is_empty() {
            return Err(PipelineError::validation("job has no segments"));
        }
        if job.source_locator.trim().is_empty() {
            return Err(PipelineError::validation("job has no source locator"));
        }
        for (index, segment) in job.segments.iter().enumerate() {
            check_range(segment.start_time, segment.end_time)
                .map_err(|e| PipelineError::validation(format!("segment {}: {}", index, e)))?;
        }
        Ok(())
    }

    /// Run one job to completion and record its outcome.
    ///
    /// Invalid jobs are rejected without a clip record. Once the clip is
    /// marked PROCESSING, every failure is recorded as FAILED before the
    /// error is returned.
    pub async fn run(&self, job: ExtractionJob) -> PipelineResult<ClipRecord> {
        Self::validate_job(&job)?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| PipelineError::internal("clip pipeline is shut down"))?;

        let logger = ClipLogger::new(&job.clip_id, &job.project_id, "pipeline");
        let span = logger.create_span();
        self.run_job(job, logger).instrument(span).await
    }

    async fn run_job(&self, job: ExtractionJob, logger: ClipLogger) -> PipelineResult<ClipRecord> {
        let mut record = ClipRecord::processing(job.clip_id.clone(), job.project_id.clone());
        self.clips.upsert(&record).await?;
        logger.log_start(&format!(
            "{} segment(s) from {}",
            job.segments.len(),
            job.source_locator
        ));

        let kind = if job.is_composite() { "composite" } else { "simple" };
        match self.produce(&job).await {
            Ok(output) => {
                let now = Utc::now();
                record.status = ClipStatus::Completed;
                record.output_locator = Some(output.output_locator);
                record.file_size_bytes = output.file_size;
                record.duration_seconds = output.duration;
                record.updated_at = now;
                record.completed_at = Some(now);
                self.clips.upsert(&record).await?;

                metrics::record_clip_completed(kind);
                logger.log_completion(&format!(
                    "{:.3}s, {} bytes",
                    record.duration_seconds, record.file_size_bytes
                ));
                Ok(record)
            }
            Err(e) => {
                record.status = ClipStatus::Failed;
                record.error_message = Some(e.to_string());
                record.updated_at = Utc::now();
                if let Err(store_err) = self.clips.upsert(&record).await {
                    warn!(clip_id = %job.clip_id, "Failed to record clip failure: {}", store_err);
                }

                metrics::record_clip_failed(e.kind());
                logger.log_error(&e.to_string());
                Err(e)
            }
        }
    }

    async fn produce(&self, job: &ExtractionJob) -> PipelineResult<ClipOutput> {
        if job.is_composite() {
            let stitched = self.stitcher.stitch(&StitchRequest::from_job(job)).await?;
            Ok(ClipOutput {
                output_locator: stitched.output_locator,
                file_size: stitched.file_size,
                duration: stitched.total_duration,
            })
        } else {
            let segment = &job.segments[0];
            let clip = self
                .extractor
                .extract(&ExtractionRequest::for_segment(job, segment))
                .await?;
            Ok(ClipOutput {
                output_locator: clip.output_locator,
                file_size: clip.file_size,
                duration: clip.duration,
            })
        }
    }

    /// Run jobs concurrently, at most `max_concurrent_jobs` at a time.
    ///
    /// Results come back in completion order.
    pub async fn run_all(
        self: &Arc<Self>,
        jobs: Vec<ExtractionJob>,
    ) -> Vec<(ClipId, PipelineResult<ClipRecord>)> {
        let mut set = JoinSet::new();
        for job in jobs {
            let this = Arc::clone(self);
            set.spawn(async move {
                let clip_id = job.clip_id.clone();
                (clip_id, this.run(job).await)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!("Clip task did not finish: {}", e),
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use clipline_models::{OutputFormat, ProjectId, Quality, SegmentSpec};
    use clipline_storage::MemoryStorage;

    use crate::clip_pipeline::clip_store::MemoryClipStore;
    use crate::clip_pipeline::extractor::test_support::*;
    use crate::retry::RetryConfig;

    fn orchestrator(
        encoder: Arc<FakeEncoder>,
        work_dir: &std::path::Path,
    ) -> (Arc<ClipPipelineOrchestrator>, Arc<MemoryClipStore>) {
        let storage = Arc::new(MemoryStorage::new("media"));
        let extractor = VideoSegmentExtractor::new(encoder, storage, work_dir)
            .with_retry(RetryConfig::default().with_base_delay(Duration::from_millis(1)));
        let clips = Arc::new(MemoryClipStore::new());
        (
            Arc::new(ClipPipelineOrchestrator::new(Arc::new(extractor), clips.clone(), 2)),
            clips,
        )
    }

    fn job(clip_id: &str, segments: Vec<SegmentSpec>) -> ExtractionJob {
        ExtractionJob {
            clip_id: ClipId::from(clip_id),
            project_id: ProjectId::from("project-1"),
            source_locator: "/data/source.mp4".to_string(),
            segments,
            quality: Quality::Medium,
            output_format: OutputFormat::Mp4,
            include_fades: false,
        }
    }

    #[tokio::test]
    async fn test_simple_job_completes() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, clips) = orchestrator(Arc::new(FakeEncoder::new()), dir.path());

        let record = orchestrator
            .run(job("c1", vec![SegmentSpec::new(1.0, 4.0)]))
            .await
            .unwrap();

        assert_eq!(record.status, ClipStatus::Completed);
        assert_eq!(record.output_locator.as_deref(), Some("s3://media/clips/project-1/c1.mp4"));
        assert_eq!(record.duration_seconds, 3.0);
        assert!(record.completed_at.is_some());

        let stored = clips.get(&ClipId::from("c1")).await.unwrap().unwrap();
        assert_eq!(stored.status, ClipStatus::Completed);
    }

    #[tokio::test]
    async fn test_failure_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(FakeEncoder::failing_with(vec![corrupt_input()]));
        let (orchestrator, clips) = orchestrator(encoder, dir.path());

        let err = orchestrator
            .run(job("c2", vec![SegmentSpec::new(0.0, 5.0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Encoding { .. }));

        let stored = clips.get(&ClipId::from("c2")).await.unwrap().unwrap();
        assert_eq!(stored.status, ClipStatus::Failed);
        assert!(stored.error_message.unwrap().starts_with("Encoding failed after 1 attempt"));
        assert!(stored.output_locator.is_none());
    }

    #[tokio::test]
    async fn test_invalid_job_has_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(FakeEncoder::new());
        let (orchestrator, clips) = orchestrator(encoder.clone(), dir.path());

        let err = orchestrator.run(job("c3", vec![])).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        let err = orchestrator
            .run(job("c3", vec![SegmentSpec::new(5.0, 1.0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        assert!(clips.is_empty().await);
        assert_eq!(encoder.call_count(), 0);
    }

    #[tokio::test]
    async fn test_run_all_mixed_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, clips) = orchestrator(Arc::new(FakeEncoder::new()), dir.path());

        let results = orchestrator
            .run_all(vec![
                job("a", vec![SegmentSpec::new(0.0, 2.0)]),
                job("b", vec![SegmentSpec::new(0.0, 2.0), SegmentSpec::new(5.0, 6.0).with_order(1)]),
                job("c", vec![SegmentSpec::new(3.0, 3.0)]),
            ])
            .await;

        assert_eq!(results.len(), 3);
        for (clip_id, result) in &results {
            match clip_id.as_str() {
                "c" => assert!(result.is_err()),
                _ => assert!(result.is_ok()),
            }
        }
        let b = clips.get(&ClipId::from("b")).await.unwrap().unwrap();
        assert_eq!(b.duration_seconds, 3.0);
        assert_eq!(clips.len().await, 2);
    }
}
