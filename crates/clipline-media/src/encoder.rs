//! Encoder seam over the FFmpeg runner.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::progress::ProgressCallback;

/// Something that can execute an FFmpeg command to completion.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn run(&self, cmd: &FfmpegCommand, observer: Option<ProgressCallback>) -> MediaResult<()>;
}

/// Encoder backed by the `ffmpeg` binary.
#[derive(Debug, Clone, Default)]
pub struct FfmpegEncoder {
    timeout_secs: Option<u64>,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill any invocation running longer than `secs`.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Kill running invocations once `cancel_rx` flips to `true`.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    fn runner(&self) -> FfmpegRunner {
        let mut runner = FfmpegRunner::new();
        if let Some(secs) = self.timeout_secs {
            runner = runner.with_timeout(secs);
        }
        if let Some(rx) = &self.cancel_rx {
            runner = runner.with_cancel(rx.clone());
        }
        runner
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn run(&self, cmd: &FfmpegCommand, observer: Option<ProgressCallback>) -> MediaResult<()> {
        self.runner().run_with_progress(cmd, observer).await
    }
}
