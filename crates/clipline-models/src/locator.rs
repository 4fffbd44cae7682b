//! Source and object locators.
//!
//! Stored objects are addressed as `s3://{bucket}/{key}`. Anything with an
//! `http(s)` scheme is treated as a directly streamable URL, and everything
//! else as a local path.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use url::Url;

/// Scheme used for storage-backend locators.
pub const STORAGE_SCHEME: &str = "s3";

/// Errors produced while parsing a locator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    #[error("Locator is empty")]
    Empty,

    #[error("Malformed locator {locator}: {reason}")]
    Malformed { locator: String, reason: String },
}

/// Where a source video lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    /// Object in the storage backend
    Stored { bucket: String, key: String },
    /// Streamable http(s) URL
    Remote(String),
    /// File on the local filesystem
    Local(PathBuf),
}

impl SourceLocator {
    /// Build a storage locator.
    pub fn stored(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Stored {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse a locator string.
    pub fn parse(raw: &str) -> Result<Self, LocatorError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(LocatorError::Empty);
        }

        let malformed = |reason: &str| LocatorError::Malformed {
            locator: raw.to_string(),
            reason: reason.to_string(),
        };

        let Some((scheme, _)) = raw.split_once("://") else {
            return Ok(Self::Local(PathBuf::from(raw)));
        };

        match scheme.to_ascii_lowercase().as_str() {
            STORAGE_SCHEME => {
                // Keys are kept byte-for-byte; no URL decoding or query splitting
                let rest = &raw[scheme.len() + 3..];
                let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
                if bucket.is_empty() {
                    return Err(malformed("missing bucket"));
                }
                if key.is_empty() {
                    return Err(malformed("missing object key"));
                }
                Ok(Self::stored(bucket, key))
            }
            "http" | "https" => {
                Url::parse(raw).map_err(|e| malformed(&e.to_string()))?;
                Ok(Self::Remote(raw.to_string()))
            }
            "file" => {
                let url = Url::parse(raw).map_err(|e| malformed(&e.to_string()))?;
                url.to_file_path()
                    .map(Self::Local)
                    .map_err(|_| malformed("not a local file URL"))
            }
            other => Err(malformed(&format!("unsupported scheme '{}'", other))),
        }
    }

    pub fn is_stored(&self) -> bool {
        matches!(self, SourceLocator::Stored { .. })
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::Stored { bucket, key } => {
                write!(f, "{}://{}/{}", STORAGE_SCHEME, bucket, key)
            }
            SourceLocator::Remote(url) => write!(f, "{}", url),
            SourceLocator::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stored() {
        let locator = SourceLocator::parse("s3://media/uploads/u1/videos/a.mp4").unwrap();
        assert_eq!(locator, SourceLocator::stored("media", "uploads/u1/videos/a.mp4"));
        assert_eq!(locator.to_string(), "s3://media/uploads/u1/videos/a.mp4");
        assert!(locator.is_stored());
    }

    #[test]
    fn test_stored_keys_are_not_decoded() {
        for key in [
            "uploads/John Doe/videos/id1.mp4",
            "uploads/a?b/videos/id#2.mp4",
            "uploads/zoë/videos/%20already.mp4",
            "uploads/日本/videos/clip.mov",
        ] {
            let locator = SourceLocator::stored("media", key);
            assert_eq!(SourceLocator::parse(&locator.to_string()).unwrap(), locator);
        }
    }

    #[test]
    fn test_parse_remote_and_local() {
        assert_eq!(
            SourceLocator::parse("https://cdn.example.com/a.mp4").unwrap(),
            SourceLocator::Remote("https://cdn.example.com/a.mp4".to_string())
        );
        assert_eq!(
            SourceLocator::parse("/tmp/in.mp4").unwrap(),
            SourceLocator::Local(PathBuf::from("/tmp/in.mp4"))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(SourceLocator::parse("  "), Err(LocatorError::Empty));
        assert!(matches!(
            SourceLocator::parse("s3://media/"),
            Err(LocatorError::Malformed { .. })
        ));
        assert!(matches!(
            SourceLocator::parse("s3:///key.mp4"),
            Err(LocatorError::Malformed { .. })
        ));
        assert!(matches!(
            SourceLocator::parse("ftp://host/file"),
            Err(LocatorError::Malformed { .. })
        ));
    }
}
