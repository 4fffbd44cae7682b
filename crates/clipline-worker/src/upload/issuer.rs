//! Pre-authorized upload URL issuance.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use clipline_models::{
    NewUploadSession, PartUrl, SessionId, UploadConfig, UploadPlan, UploadSession,
};
use clipline_storage::{locator_for, multipart_key, upload_key, ObjectStorage};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics;
use crate::upload::chunking::{calculate_chunk_size, MIB};
use crate::upload::manager::UploadSessionManager;

/// Highest part number the S3 multipart API accepts.
pub const MAX_PARTS: u32 = 10_000;

/// Default size above which uploads are chunked.
pub const DEFAULT_CHUNKED_THRESHOLD: u64 = 100 * MIB;

/// Issues single-shot or chunked upload plans.
pub struct SignedUrlIssuer {
    storage: Arc<dyn ObjectStorage>,
    sessions: Arc<UploadSessionManager>,
    chunked_threshold: u64,
    url_expiry: Duration,
}

impl SignedUrlIssuer {
    pub fn new(storage: Arc<dyn ObjectStorage>, sessions: Arc<UploadSessionManager>) -> Self {
        Self {
            storage,
            sessions,
            chunked_threshold: DEFAULT_CHUNKED_THRESHOLD,
            url_expiry: Duration::from_secs(3600),
        }
    }

    pub fn from_config(
        storage: Arc<dyn ObjectStorage>,
        sessions: Arc<UploadSessionManager>,
        config: &PipelineConfig,
    ) -> Self {
        Self::new(storage, sessions)
            .with_chunked_threshold(config.chunked_threshold_bytes)
            .with_url_expiry(config.url_expiry)
    }

    pub fn with_chunked_threshold(mut self, bytes: u64) -> Self {
        self.chunked_threshold = bytes;
        self
    }

    pub fn with_url_expiry(mut self, expiry: Duration) -> Self {
        self.url_expiry = expiry;
        self
    }

    /// Check size and MIME type against the category limits.
    pub fn validate(config: &UploadConfig) -> PipelineResult<()> {
        if config.owner_id.trim().is_empty() {
            return Err(PipelineError::validation("owner_id must not be empty"));
        }
        if config.file_name.trim().is_empty() {
            return Err(PipelineError::validation("file_name must not be empty"));
        }
        if config.file_size == 0 {
            return Err(PipelineError::validation("file_size must be positive"));
        }

        let max = config.file_category.max_file_size();
        if config.file_size > max {
            return Err(PipelineError::validation(format!(
                "file size {} exceeds the {} limit of {} bytes",
                config.file_size, config.file_category, max
            )));
        }

        let allowed = config.file_category.allowed_mime_types();
        let mime = config.essence_mime_type();
        if !allowed.is_empty() && !allowed.contains(&mime.as_str()) {
            return Err(PipelineError::validation(format!(
                "MIME type '{}' is not allowed for {} uploads",
                mime, config.file_category
            )));
        }

        Ok(())
    }

    fn wants_chunked(&self, config: &UploadConfig) -> bool {
        config
            .chunked
            .unwrap_or(config.file_size > self.chunked_threshold)
    }

    /// Issue an upload plan for `config`.
    pub async fn issue(&self, config: &UploadConfig) -> PipelineResult<UploadPlan> {
        Self::validate(config)?;

        let plan = if self.wants_chunked(config) {
            self.issue_chunked(config).await?
        } else {
            self.issue_single_shot(config).await?
        };

        metrics::record_upload_plan(if plan.is_chunked() { "chunked" } else { "single_shot" });
        Ok(plan)
    }

    fn expires_at(&self) -> chrono::DateTime<Utc> {
        Utc::now() + chrono::Duration::from_std(self.url_expiry).unwrap_or(chrono::Duration::hours(1))
    }

    async fn issue_single_shot(&self, config: &UploadConfig) -> PipelineResult<UploadPlan> {
        let id = Uuid::new_v4().to_string();
        let key = upload_key(&config.owner_id, config.file_category, &id, &config.extension())
            .map_err(PipelineError::from_key_error)?;
        let mime = config.essence_mime_type();

        let upload_url = self
            .storage
            .presign_put(&key, &mime, config.file_size, self.url_expiry)
            .await?;
        let read_url = self.storage.presign_get(&key, self.url_expiry).await?;
        let locator = locator_for(self.storage.bucket(), &key);

        info!(
            owner_id = %config.owner_id,
            key = %key,
            file_size = config.file_size,
            "Issued single-shot upload"
        );

        Ok(UploadPlan::SingleShot {
            upload_url,
            read_url,
            key,
            locator,
            expires_at: self.expires_at(),
        })
    }

    async fn issue_chunked(&self, config: &UploadConfig) -> PipelineResult<UploadPlan> {
        let chunk_plan = calculate_chunk_size(config.file_size, config.requested_chunk_size);
        if chunk_plan.total_chunks > MAX_PARTS {
            return Err(PipelineError::validation(format!(
                "{} parts exceeds the multipart limit of {}",
                chunk_plan.total_chunks, MAX_PARTS
            )));
        }

        let session_id = SessionId::new();
        let key = multipart_key(
            &config.owner_id,
            config.file_category,
            &session_id,
            &config.extension(),
        )
        .map_err(PipelineError::from_key_error)?;
        let mime = config.essence_mime_type();

        let upload_id = self.storage.create_multipart_upload(&key, &mime).await?;

        let data = NewUploadSession {
            owner_id: config.owner_id.clone(),
            file_name: config.file_name.clone(),
            file_size: config.file_size,
            mime_type: mime,
            file_category: config.file_category,
            total_chunks: chunk_plan.total_chunks,
            chunk_size: chunk_plan.chunk_size,
            backend_upload_id: upload_id.clone(),
            bucket: self.storage.bucket().to_string(),
            key: key.clone(),
        };

        let opened = self.open_session(session_id, data).await;
        let (session, part_urls) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                // Do not leave the remote upload open when no session tracks it
                if let Err(abort_err) = self.storage.abort_multipart_upload(&key, &upload_id).await {
                    warn!(
                        key = %key,
                        upload_id = %upload_id,
                        "Failed to abort multipart upload after issue error: {}", abort_err
                    );
                }
                return Err(e);
            }
        };

        info!(
            session_id = %session.session_id,
            owner_id = %config.owner_id,
            total_chunks = chunk_plan.total_chunks,
            chunk_size = chunk_plan.chunk_size,
            "Issued chunked upload"
        );

        Ok(UploadPlan::Chunked {
            session_id: session.session_id,
            backend_upload_id: upload_id,
            key,
            chunk_size: chunk_plan.chunk_size,
            total_chunks: chunk_plan.total_chunks,
            part_urls,
            expires_at: self.expires_at(),
        })
    }

    async fn open_session(
        &self,
        session_id: SessionId,
        data: NewUploadSession,
    ) -> PipelineResult<(UploadSession, Vec<PartUrl>)> {
        let part_numbers: Vec<u32> = (1..=data.total_chunks).collect();
        let part_urls = self
            .presign_parts(&data.key, &data.backend_upload_id, &part_numbers)
            .await?;
        let session = self.sessions.create_session_with_id(session_id, data).await?;
        Ok((session, part_urls))
    }

    async fn presign_parts(
        &self,
        key: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> PipelineResult<Vec<PartUrl>> {
        let mut urls = Vec::with_capacity(part_numbers.len());
        for &part_number in part_numbers {
            let url = self
                .storage
                .presign_upload_part(key, upload_id, part_number, self.url_expiry)
                .await?;
            urls.push(PartUrl { part_number, url });
        }
        Ok(urls)
    }

    /// Fresh part URLs for a resumed upload.
    ///
    /// An empty `part_numbers` means every part not yet reported.
    pub async fn reissue_part_urls(
        &self,
        session_id: &SessionId,
        part_numbers: &[u32],
    ) -> PipelineResult<Vec<PartUrl>> {
        let session = self.sessions.get_session(session_id).await?;
        if session.status.is_terminal() {
            return Err(PipelineError::validation(format!(
                "session {} is {}",
                session_id, session.status
            )));
        }

        let wanted = if part_numbers.is_empty() {
            session.missing_chunks()
        } else {
            part_numbers.to_vec()
        };
        if let Some(bad) = wanted.iter().find(|n| !session.contains_chunk(**n)) {
            return Err(PipelineError::validation(format!(
                "part {} out of range 1..={}",
                bad, session.total_chunks
            )));
        }

        self.presign_parts(&session.key, &session.backend_upload_id, &wanted)
            .await
    }
}
