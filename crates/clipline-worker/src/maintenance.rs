//! Periodic upload-session maintenance.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::retry::FailureTracker;
use crate::upload::{ReconcileReport, UploadSessionManager};

/// When and how far back maintenance reaches.
#[derive(Debug, Clone, Copy)]
pub struct MaintenanceSchedule {
    pub interval: Duration,
    pub retention: Duration,
}

impl From<&PipelineConfig> for MaintenanceSchedule {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            interval: config.sweep_interval,
            retention: config.session_retention,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub purged: usize,
    pub reconcile: ReconcileReport,
}

/// Expire stale sessions, purge old terminal ones, then abort orphaned
/// multipart uploads.
pub async fn run_maintenance_pass(
    manager: &UploadSessionManager,
    retention: Duration,
) -> PipelineResult<MaintenanceReport> {
    let expired = manager.sweep_expired().await?;
    let purged = manager.purge_retained(retention).await?;
    let reconcile = manager.reconcile_orphaned_uploads().await?;

    Ok(MaintenanceReport {
        expired,
        purged,
        reconcile,
    })
}

/// Run maintenance every `schedule.interval` until `shutdown` flips to true.
pub async fn run_maintenance_loop(
    manager: Arc<UploadSessionManager>,
    schedule: MaintenanceSchedule,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(schedule.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut failures = FailureTracker::new(3);

    info!(
        interval_secs = schedule.interval.as_secs(),
        retention_secs = schedule.retention.as_secs(),
        "Maintenance loop started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_maintenance_pass(&manager, schedule.retention).await {
                    Ok(report) => {
                        failures.record_success();
                        debug!(
                            expired = report.expired,
                            purged = report.purged,
                            aborted = report.reconcile.aborted,
                            "Maintenance pass finished"
                        );
                    }
                    Err(e) => {
                        if failures.record_failure() {
                            warn!(
                                consecutive_failures = failures.failure_count(),
                                "Maintenance pass failed: {}", e
                            );
                        }
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Maintenance loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipline_models::{FileCategory, NewUploadSession, UploadStatus};
    use clipline_sessions::MemorySessionStore;
    use clipline_storage::{MemoryStorage, ObjectStorage};

    #[tokio::test]
    async fn test_pass_expires_and_reconciles() {
        let storage = Arc::new(MemoryStorage::new("media"));
        let manager = UploadSessionManager::new(
            Arc::new(MemorySessionStore::new()),
            storage.clone(),
            Duration::from_millis(20),
        );
        let session_id = clipline_models::SessionId::new();
        let key = format!("uploads/user-1/videos/multipart/{}.mp4", session_id);
        let upload_id = storage.create_multipart_upload(&key, "video/mp4").await.unwrap();
        manager
            .create_session_with_id(
                session_id.clone(),
                NewUploadSession {
                    owner_id: "user-1".to_string(),
                    file_name: "a.mp4".to_string(),
                    file_size: 10,
                    mime_type: "video/mp4".to_string(),
                    file_category: FileCategory::Video,
                    total_chunks: 1,
                    chunk_size: 5 * 1024 * 1024,
                    backend_upload_id: upload_id,
                    bucket: "media".to_string(),
                    key,
                },
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let report = run_maintenance_pass(&manager, Duration::from_secs(3600)).await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.purged, 0);
        assert_eq!(report.reconcile.aborted, 1);
        assert_eq!(storage.open_upload_count(), 0);
        assert_eq!(manager.progress(&session_id).await.unwrap().status, UploadStatus::Expired);
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown() {
        let manager = Arc::new(UploadSessionManager::new(
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryStorage::new("media")),
            Duration::from_secs(60),
        ));
        let (tx, rx) = watch::channel(false);
        let schedule = MaintenanceSchedule {
            interval: Duration::from_millis(5),
            retention: Duration::from_secs(60),
        };

        let handle = tokio::spawn(run_maintenance_loop(manager, schedule, rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
