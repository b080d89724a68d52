//! Batch pipelines: CSV import, analytics export, Drive sync and micro-catalogs.

use std::sync::Arc;

use anyhow::{Context, Result};
use fedbd_core::PortalConfig;
use fedbd_storage::PortalStore;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

pub mod analytics;
pub mod catalog;
pub mod drive;
pub mod import;
pub mod ingest;

pub use analytics::{build_export, to_csv, to_json, write_parquet_snapshot, ExportFormat, ExportKind, ExportTable};
pub use catalog::{render_micro_catalog, write_micro_catalogs};
pub use drive::{DriveClient, DriveFile, DriveSync, DriveSyncOutcome, GoogleDriveClient};
pub use import::{CsvImporter, ImportError, ImportSummary, Upload};
pub use ingest::{ingest_solicitations, IngestError, IngestSummary};

pub const CRATE_NAME: &str = "fedbd-pipeline";

/// `sync_log.kind` for Drive folder syncs.
pub const DRIVE_SYNC_KIND: &str = "drive";

/// Cron-driven Drive sync. `None` when the scheduler is disabled or Drive is not configured.
pub async fn maybe_build_scheduler(
    config: &PortalConfig,
    store: PortalStore,
    client: Option<Arc<dyn DriveClient>>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }
    let (Some(client), Some(folder_id)) = (client, config.google_drive_folder_id.clone()) else {
        warn!("scheduler enabled but Drive sync is not configured; no jobs registered");
        return Ok(None);
    };

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cooldown_secs = config.drive_sync_cooldown_secs;
    let cron = config.drive_sync_cron.clone();
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let sync = DriveSync::new(store.clone(), Arc::clone(&client), folder_id.clone(), cooldown_secs);
        Box::pin(async move {
            match sync.run().await {
                Ok(outcome) => info!(?outcome, "scheduled drive sync"),
                Err(err) => {
                    let message = format!("{err:#}");
                    error!(error = %message, "scheduled drive sync failed");
                }
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> PortalConfig {
        let pairs = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<Vec<_>>();
        PortalConfig::from_lookup(|key| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    #[tokio::test]
    async fn scheduler_is_off_unless_enabled_and_configured() {
        let store = PortalStore::in_memory().await.unwrap();
        let disabled = maybe_build_scheduler(&config(&[]), store.clone(), None).await.unwrap();
        assert!(disabled.is_none());

        let unconfigured = maybe_build_scheduler(
            &config(&[("FEDBD_SCHEDULER_ENABLED", "true")]),
            store,
            None,
        )
        .await
        .unwrap();
        assert!(unconfigured.is_none());
    }
}
