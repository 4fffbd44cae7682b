//! Pipeline configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};
use crate::upload::chunking::MIB;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Work directory for temporary files
    pub work_dir: PathBuf,
    /// Maximum concurrent clip jobs
    pub max_concurrent_jobs: usize,
    /// Hard wall-clock limit for one encoder invocation
    pub encoder_timeout: Duration,
    /// Retries after the first extraction attempt
    pub max_extraction_retries: u32,
    /// Base delay for exponential backoff between extraction attempts
    pub retry_base_delay: Duration,
    /// Maximum delay between extraction attempts
    pub retry_max_delay: Duration,
    /// Lifetime of an upload session
    pub session_ttl: Duration,
    /// How long terminal sessions are kept after expiry before purge
    pub session_retention: Duration,
    /// Interval between maintenance passes
    pub sweep_interval: Duration,
    /// Files larger than this use a chunked upload
    pub chunked_threshold_bytes: u64,
    /// Lifetime of presigned URLs
    pub url_expiry: Duration,
    /// Prometheus listener address, if metrics are exported
    pub metrics_addr: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/clipline"),
            max_concurrent_jobs: 2,
            encoder_timeout: Duration::from_secs(1500), // 25 minutes
            max_extraction_retries: 2,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(10),
            session_ttl: Duration::from_secs(86_400),
            session_retention: Duration::from_secs(7 * 86_400),
            sweep_interval: Duration::from_secs(300),
            chunked_threshold_bytes: 100 * MIB,
            url_expiry: Duration::from_secs(3600),
            metrics_addr: None,
        }
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> PipelineResult<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PipelineError::config(format!("{} has invalid value '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}

fn env_secs(name: &str, default: Duration) -> PipelineResult<Duration> {
    env_parse(name, default.as_secs()).map(Duration::from_secs)
}

fn env_millis(name: &str, default: Duration) -> PipelineResult<Duration> {
    env_parse(name, default.as_millis() as u64).map(Duration::from_millis)
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> PipelineResult<Self> {
        let defaults = Self::default();

        let config = Self {
            work_dir: std::env::var("CLIPLINE_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            max_concurrent_jobs: env_parse("CLIPLINE_MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs)?,
            encoder_timeout: env_secs("CLIPLINE_ENCODER_TIMEOUT_SECS", defaults.encoder_timeout)?,
            max_extraction_retries: env_parse(
                "CLIPLINE_MAX_EXTRACTION_RETRIES",
                defaults.max_extraction_retries,
            )?,
            retry_base_delay: env_millis("CLIPLINE_RETRY_BASE_DELAY_MS", defaults.retry_base_delay)?,
            retry_max_delay: env_millis("CLIPLINE_RETRY_MAX_DELAY_MS", defaults.retry_max_delay)?,
            session_ttl: env_secs("CLIPLINE_SESSION_TTL_SECS", defaults.session_ttl)?,
            session_retention: env_secs(
                "CLIPLINE_SESSION_RETENTION_SECS",
                defaults.session_retention,
            )?,
            sweep_interval: env_secs("CLIPLINE_SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            chunked_threshold_bytes: env_parse(
                "CLIPLINE_CHUNKED_THRESHOLD_BYTES",
                defaults.chunked_threshold_bytes,
            )?,
            url_expiry: env_secs("CLIPLINE_URL_EXPIRY_SECS", defaults.url_expiry)?,
            metrics_addr: std::env::var("CLIPLINE_METRICS_ADDR").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(PipelineError::config("max_concurrent_jobs must be at least 1"));
        }
        if self.encoder_timeout.is_zero() {
            return Err(PipelineError::config("encoder_timeout must be positive"));
        }
        if self.session_ttl.is_zero() {
            return Err(PipelineError::config("session_ttl must be positive"));
        }
        if self.sweep_interval.is_zero() {
            return Err(PipelineError::config("sweep_interval must be positive"));
        }
        // SigV4 presigned URLs cannot outlive seven days
        if self.url_expiry.is_zero() || self.url_expiry > Duration::from_secs(7 * 86_400) {
            return Err(PipelineError::config("url_expiry must be between 1s and 7 days"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.encoder_timeout, Duration::from_secs(1500));
        assert_eq!(config.max_extraction_retries, 2);
        assert_eq!(config.chunked_threshold_bytes, 100 * 1024 * 1024);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = PipelineConfig {
            max_concurrent_jobs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_env_parse_reports_bad_values() {
        std::env::set_var("CLIPLINE_TEST_BAD_NUMBER", "ten");
        let err = env_parse::<u32>("CLIPLINE_TEST_BAD_NUMBER", 1).unwrap_err();
        assert!(err.to_string().contains("CLIPLINE_TEST_BAD_NUMBER"));
        assert_eq!(env_parse::<u32>("CLIPLINE_TEST_UNSET_NUMBER", 7).unwrap(), 7);
    }
}
