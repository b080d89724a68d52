//! Google Drive folder sync into research docs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use fedbd_core::PortalConfig;
use fedbd_storage::{
    DocUpsertOutcome, DriveDocUpsert, HttpClientConfig, HttpFetcher, PortalStore, SyncLogEntry,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, Instrument};

use crate::DRIVE_SYNC_KIND;

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const PAGE_SIZE: &str = "100";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default)]
    pub web_view_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListPage {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[async_trait]
pub trait DriveClient: Send + Sync {
    async fn list_files(&self, folder_id: &str) -> Result<Vec<DriveFile>>;
}

/// Drive v3 `files.list` over `HttpFetcher`. The bearer token is obtained elsewhere.
#[derive(Debug)]
pub struct GoogleDriveClient {
    http: HttpFetcher,
    access_token: String,
    api_base: String,
}

impl GoogleDriveClient {
    pub fn new(http: HttpFetcher, access_token: impl Into<String>) -> Self {
        Self {
            http,
            access_token: access_token.into(),
            api_base: DRIVE_API_BASE.to_string(),
        }
    }

    /// `None` when no access token is configured.
    pub fn from_config(config: &PortalConfig) -> Result<Option<Self>> {
        let Some(token) = config.google_drive_access_token.clone() else {
            return Ok(None);
        };
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        Ok(Some(Self::new(http, token)))
    }
}

#[async_trait]
impl DriveClient for GoogleDriveClient {
    async fn list_files(&self, folder_id: &str) -> Result<Vec<DriveFile>> {
        let url = format!("{}/files", self.api_base.trim_end_matches('/'));
        let q = format!("'{}' in parents and trashed = false", folder_id.replace('\'', "\\'"));
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![
                ("q", q.as_str()),
                ("fields", "nextPageToken,files(id,name,mimeType,webViewLink)"),
                ("pageSize", PAGE_SIZE),
            ];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }
            let page: FileListPage = self
                .http
                .get_json(&url, &query, Some(&self.access_token))
                .await
                .context("listing drive folder")?;
            files.extend(page.files);
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        Ok(files)
    }
}

pub fn doc_type_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "application/vnd.google-apps.document" => "document",
        "application/vnd.google-apps.spreadsheet" => "spreadsheet",
        "application/vnd.google-apps.presentation" => "presentation",
        "application/pdf" => "pdf",
        m if m.starts_with("image/") => "image",
        _ => "file",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DriveSyncOutcome {
    Completed { created: usize, updated: usize },
    CoolingDown { retry_after_secs: i64 },
}

/// One sync attempt per cooldown window, measured from the last `sync_log` row.
pub struct DriveSync {
    store: PortalStore,
    client: Arc<dyn DriveClient>,
    folder_id: String,
    cooldown: chrono::Duration,
}

impl DriveSync {
    pub fn new(
        store: PortalStore,
        client: Arc<dyn DriveClient>,
        folder_id: impl Into<String>,
        cooldown_secs: i64,
    ) -> Self {
        Self {
            store,
            client,
            folder_id: folder_id.into(),
            cooldown: chrono::Duration::seconds(cooldown_secs.max(0)),
        }
    }

    pub async fn run(&self) -> Result<DriveSyncOutcome> {
        let span = info_span!("drive_sync", folder_id = %self.folder_id);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> Result<DriveSyncOutcome> {
        let now = Utc::now();
        if let Some(last) = self.store.last_sync(DRIVE_SYNC_KIND).await? {
            let elapsed = now - last.started_at;
            if elapsed < self.cooldown {
                let retry_after_secs = (self.cooldown - elapsed).num_seconds().max(1);
                info!(retry_after_secs, "drive sync skipped during cooldown");
                return Ok(DriveSyncOutcome::CoolingDown { retry_after_secs });
            }
        }

        let files = match self.client.list_files(&self.folder_id).await {
            Ok(files) => files,
            Err(err) => {
                let message = format!("{err:#}");
                error!(error = %message, "drive listing failed");
                self.record(now, "failed", 0, 0, Some(message)).await?;
                return Err(err);
            }
        };

        let mut created = 0usize;
        let mut updated = 0usize;
        for file in files.iter().filter(|f| f.mime_type != FOLDER_MIME) {
            let source_url = file
                .web_view_link
                .clone()
                .unwrap_or_else(|| format!("https://drive.google.com/file/d/{}/view", file.id));
            let outcome = self
                .store
                .upsert_drive_doc(&DriveDocUpsert {
                    drive_file_id: file.id.clone(),
                    title: file.name.clone(),
                    source_url,
                    doc_type: doc_type_for_mime(&file.mime_type).to_string(),
                })
                .await
                .with_context(|| format!("upserting drive file {}", file.id))?;
            match outcome {
                DocUpsertOutcome::Created => created += 1,
                DocUpsertOutcome::Updated => updated += 1,
            }
        }

        self.record(now, "success", created, updated, None).await?;
        info!(created, updated, "drive sync finished");
        Ok(DriveSyncOutcome::Completed { created, updated })
    }

    async fn record(
        &self,
        started_at: chrono::DateTime<Utc>,
        status: &str,
        created: usize,
        updated: usize,
        message: Option<String>,
    ) -> Result<()> {
        self.store
            .record_sync(&SyncLogEntry {
                kind: DRIVE_SYNC_KIND.to_string(),
                status: status.to_string(),
                created_count: created as i64,
                updated_count: updated as i64,
                message,
                started_at,
            })
            .await
            .context("recording drive sync")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FixedDrive(Vec<DriveFile>);

    #[async_trait]
    impl DriveClient for FixedDrive {
        async fn list_files(&self, _folder_id: &str) -> Result<Vec<DriveFile>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenDrive;

    #[async_trait]
    impl DriveClient for BrokenDrive {
        async fn list_files(&self, _folder_id: &str) -> Result<Vec<DriveFile>> {
            Err(anyhow!("401 from drive"))
        }
    }

    fn file(id: &str, name: &str, mime: &str) -> DriveFile {
        DriveFile {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: mime.to_string(),
            web_view_link: None,
        }
    }

    #[tokio::test]
    async fn sync_creates_then_updates_and_respects_cooldown() {
        let store = PortalStore::in_memory().await.unwrap();
        let client = Arc::new(FixedDrive(vec![
            file("f1", "Capture plan", "application/vnd.google-apps.document"),
            file("f2", "Pricing", "application/pdf"),
            file("d1", "Archive", FOLDER_MIME),
        ]));

        let sync = DriveSync::new(store.clone(), client.clone(), "folder", 0);
        assert_eq!(
            sync.run().await.unwrap(),
            DriveSyncOutcome::Completed { created: 2, updated: 0 }
        );
        assert_eq!(
            sync.run().await.unwrap(),
            DriveSyncOutcome::Completed { created: 0, updated: 2 }
        );

        let gated = DriveSync::new(store.clone(), client, "folder", 300);
        match gated.run().await.unwrap() {
            DriveSyncOutcome::CoolingDown { retry_after_secs } => {
                assert!(retry_after_secs > 0 && retry_after_secs <= 300);
            }
            other => panic!("expected cooldown, got {other:?}"),
        }

        let docs = store.research_docs(10).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().any(|d| d.doc_type == "pdf"));
        assert_eq!(store.count_sync_runs(DRIVE_SYNC_KIND, Some("success")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn failed_listing_is_logged_as_failed_run() {
        let store = PortalStore::in_memory().await.unwrap();
        let sync = DriveSync::new(store.clone(), Arc::new(BrokenDrive), "folder", 0);
        assert!(sync.run().await.is_err());

        let last = store.last_sync(DRIVE_SYNC_KIND).await.unwrap().unwrap();
        assert_eq!(last.status, "failed");
        assert!(last.message.unwrap_or_default().contains("401"));
    }

    #[test]
    fn drive_list_page_parses_camel_case() {
        let page: FileListPage = serde_json::from_str(
            r#"{"files":[{"id":"1","name":"Brief","mimeType":"application/pdf","webViewLink":"https://drive.google.com/x"}],"nextPageToken":"abc"}"#,
        )
        .unwrap();
        assert_eq!(page.files[0].mime_type, "application/pdf");
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));
        assert_eq!(doc_type_for_mime("image/png"), "image");
    }
}
