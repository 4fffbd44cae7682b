//! Resumable uploads: part sizing, URL issuance, session lifecycle and
//! reconciliation with the storage backend.

pub mod chunking;
pub mod issuer;
pub mod manager;
pub mod reconcile;

pub use chunking::{calculate_chunk_size, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, TARGET_CHUNK_COUNT};
pub use issuer::SignedUrlIssuer;
pub use manager::UploadSessionManager;
pub use reconcile::ReconcileReport;
