//! Clip record persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use clipline_models::{ClipId, ClipRecord};

use crate::error::PipelineResult;

/// Where the orchestrator records clip outcomes.
#[async_trait]
pub trait ClipStore: Send + Sync {
    /// Insert or replace the record for `record.clip_id`.
    async fn upsert(&self, record: &ClipRecord) -> PipelineResult<()>;

    async fn get(&self, clip_id: &ClipId) -> PipelineResult<Option<ClipRecord>>;
}

/// In-process clip store.
#[derive(Debug, Default)]
pub struct MemoryClipStore {
    records: RwLock<HashMap<ClipId, ClipRecord>>,
}

impl MemoryClipStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ClipStore for MemoryClipStore {
    async fn upsert(&self, record: &ClipRecord) -> PipelineResult<()> {
        self.records
            .write()
            .await
            .insert(record.clip_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, clip_id: &ClipId) -> PipelineResult<Option<ClipRecord>> {
        Ok(self.records.read().await.get(clip_id).cloned())
    }
}
