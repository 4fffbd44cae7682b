//! Upload session persistence.
//!
//! This crate provides:
//! - The `UploadSessionStore` trait with conditional status transitions
//! - An in-process store with per-chunk locking
//! - A Redis store with scripted transitions and expiry/owner/status indexes

pub mod config;
pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use config::SessionStoreConfig;
pub use error::{SessionStoreError, SessionStoreResult};
pub use memory::MemorySessionStore;
pub use redis_store::RedisSessionStore;
pub use store::{ChunkWrite, StatusUpdate, Transition, UploadSessionStore};
