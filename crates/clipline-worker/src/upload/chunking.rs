//! Part sizing for chunked uploads.

use clipline_models::ChunkPlan;

pub const MIB: u64 = 1024 * 1024;

/// Smallest part the S3 multipart API accepts (except the last part).
pub const MIN_CHUNK_SIZE: u64 = 5 * MIB;
pub const MAX_CHUNK_SIZE: u64 = 100 * MIB;
/// Part count aimed for when the caller does not request a size.
pub const TARGET_CHUNK_COUNT: u64 = 100;

/// Pick a part size and count for `file_size` bytes.
///
/// Starts from `requested` (or `file_size / TARGET_CHUNK_COUNT`), clamps to
/// `[MIN_CHUNK_SIZE, MAX_CHUNK_SIZE]` and rounds up to a whole MiB. Both
/// bounds are whole MiB, so rounding never leaves the clamp.
pub fn calculate_chunk_size(file_size: u64, requested: Option<u64>) -> ChunkPlan {
    let base = requested.unwrap_or_else(|| file_size.div_ceil(TARGET_CHUNK_COUNT));
    let clamped = base.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
    let chunk_size = clamped.div_ceil(MIB) * MIB;

    let total_chunks = file_size.div_ceil(chunk_size).max(1);

    ChunkPlan {
        chunk_size,
        total_chunks: u32::try_from(total_chunks).unwrap_or(u32::MAX),
    }
}
