//! Cloudflare R2 storage client.
//!
//! This crate provides:
//! - Single-shot PUT/GET presigning bound to content type and length
//! - Multipart upload initiation, per-part presigning, completion and abort
//! - Listing of open multipart uploads for reconciliation
//! - Clip upload and deletion
//! - Deterministic object keys and `s3://` locators
//! - An in-memory backend behind the same [`ObjectStorage`] trait

pub mod client;
pub mod error;
pub mod keys;
pub mod memory;
pub mod object_storage;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use keys::{
    clip_key, locator_for, multipart_key, session_id_from_multipart_key, upload_key, CLIPS_PREFIX,
    UPLOADS_PREFIX,
};
pub use memory::{MemoryStorage, StoredObject};
pub use object_storage::{CompletedPartInfo, MultipartUploadInfo, ObjectStorage};
