//! Session store configuration.

/// Redis connection settings for the session store.
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix prepended to every key
    pub key_prefix: String,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "clipline:".to_string(),
        }
    }
}

impl SessionStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: std::env::var("SESSION_KEY_PREFIX").unwrap_or(defaults.key_prefix),
        }
    }
}
