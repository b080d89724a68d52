//! Dashboard aggregates and their CSV / JSON / Parquet renderings.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{ArrayRef, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::Utc;
use fedbd_core::ProgramCode;
use fedbd_storage::{PortalStore, StoreError, UploadArchive};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use serde_json::json;

use crate::DRIVE_SYNC_KIND;

const RECENT_IMPORTS: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    Summary,
    Opportunities,
    Subscribers,
    Imports,
}

impl ExportKind {
    pub const ALL: [ExportKind; 4] = [
        ExportKind::Summary,
        ExportKind::Opportunities,
        ExportKind::Subscribers,
        ExportKind::Imports,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExportKind::Summary => "summary",
            ExportKind::Opportunities => "opportunities",
            ExportKind::Subscribers => "subscribers",
            ExportKind::Imports => "imports",
        }
    }
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "summary" => Ok(ExportKind::Summary),
            "opportunities" => Ok(ExportKind::Opportunities),
            "subscribers" => Ok(ExportKind::Subscribers),
            "imports" => Ok(ExportKind::Imports),
            other => Err(format!("unknown export type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    Parquet,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "parquet" => Ok(ExportFormat::Parquet),
            other => Err(format!("unknown export format: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportTable {
    pub kind: ExportKind,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ExportTable {
    fn new(kind: ExportKind, headers: &[&str]) -> Self {
        Self {
            kind,
            headers: headers.iter().map(ToString::to_string).collect(),
            rows: Vec::new(),
        }
    }

    fn push(&mut self, row: impl IntoIterator<Item = impl ToString>) {
        self.rows.push(row.into_iter().map(|cell| cell.to_string()).collect());
    }
}

fn program_label(code: &str) -> String {
    ProgramCode::parse_loose(code)
        .map(|c| c.display_name().to_string())
        .unwrap_or_else(|| "Unassigned".to_string())
}

/// Build an export table. `program` narrows the counts that carry a program dimension.
pub async fn build_export(
    store: &PortalStore,
    kind: ExportKind,
    program: Option<ProgramCode>,
) -> Result<ExportTable, StoreError> {
    match kind {
        ExportKind::Summary => summary(store, program).await,
        ExportKind::Opportunities => {
            let mut table = ExportTable::new(kind, &["program", "status", "count"]);
            for (code, status, count) in store.opportunity_status_counts(program).await? {
                table.push([program_label(&code), status, count.to_string()]);
            }
            Ok(table)
        }
        ExportKind::Subscribers => {
            let mut table = ExportTable::new(kind, &["program", "active", "verified"]);
            let codes = match program {
                Some(code) => vec![code],
                None => ProgramCode::ALL.to_vec(),
            };
            for code in codes {
                let active = store.count_subscribers(Some(code), false).await?;
                let verified = store.count_subscribers(Some(code), true).await?;
                table.push([code.display_name().to_string(), active.to_string(), verified.to_string()]);
            }
            Ok(table)
        }
        ExportKind::Imports => {
            let mut table = ExportTable::new(
                kind,
                &["created_at", "import_type", "imported", "total_rows", "error_count", "archive_hash"],
            );
            for run in store.recent_import_runs(RECENT_IMPORTS).await? {
                table.push([
                    run.created_at.to_rfc3339(),
                    run.import_type,
                    run.imported.to_string(),
                    run.total_rows.to_string(),
                    run.error_count.to_string(),
                    run.archive_hash.unwrap_or_default(),
                ]);
            }
            Ok(table)
        }
    }
}

async fn summary(store: &PortalStore, program: Option<ProgramCode>) -> Result<ExportTable, StoreError> {
    let mut table = ExportTable::new(ExportKind::Summary, &["category", "metric", "value"]);

    let active = store.count_subscribers(program, false).await?;
    let verified = store.count_subscribers(program, true).await?;
    table.push(["Engagement", "active_subscribers", active.to_string().as_str()]);
    table.push(["Engagement", "verified_subscribers", verified.to_string().as_str()]);

    let open = store.count_opportunities(program, Some("open")).await?;
    let total = store.count_opportunities(program, None).await?;
    let holders = store.count_holders(program).await?;
    table.push(["Conversion", "open_opportunities", open.to_string().as_str()]);
    table.push(["Conversion", "total_opportunities", total.to_string().as_str()]);
    table.push(["Conversion", "holders", holders.to_string().as_str()]);

    let docs = store.count_research_docs(false).await?;
    let drive_docs = store.count_research_docs(true).await?;
    table.push(["Content", "research_docs", docs.to_string().as_str()]);
    table.push(["Content", "drive_linked_docs", drive_docs.to_string().as_str()]);

    let synced = store.count_sync_runs(DRIVE_SYNC_KIND, Some("success")).await?;
    let failed = store.count_sync_runs(DRIVE_SYNC_KIND, Some("failed")).await?;
    let import_errors = store.import_error_total().await?;
    table.push(["Reliability", "drive_sync_success", synced.to_string().as_str()]);
    table.push(["Reliability", "drive_sync_failed", failed.to_string().as_str()]);
    table.push(["Reliability", "import_row_errors", import_errors.to_string().as_str()]);

    Ok(table)
}

fn should_neutralize(value: &str) -> bool {
    let trimmed = value.trim_start();
    matches!(trimmed.chars().next(), Some('=' | '+' | '-' | '@'))
}

/// Quote when needed and defuse spreadsheet formulas by prefixing a single quote.
pub fn csv_escape(value: &str) -> String {
    let safe = if should_neutralize(value) {
        format!("'{value}")
    } else {
        value.to_string()
    };
    if safe.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", safe.replace('"', "\"\""))
    } else {
        safe
    }
}

/// Header row first, one line per row.
pub fn to_csv(table: &ExportTable) -> String {
    let mut out = String::new();
    for line in std::iter::once(&table.headers).chain(table.rows.iter()) {
        let cells = line.iter().map(|c| csv_escape(c)).collect::<Vec<_>>();
        out.push_str(&cells.join(","));
        out.push_str("\r\n");
    }
    out
}

pub fn to_json(table: &ExportTable) -> serde_json::Value {
    json!({
        "type": table.kind,
        "headers": table.headers,
        "rows": table.rows,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotManifest {
    pub schema_version: u32,
    pub kind: ExportKind,
    pub generated_at: String,
    pub files: Vec<SnapshotFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
    pub rows: usize,
}

/// Write `<dir>/<kind>.parquet` plus a `manifest.json` carrying its sha256.
pub fn write_parquet_snapshot(table: &ExportTable, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let parquet_path = dir.join(format!("{}.parquet", table.kind));

    let schema = Arc::new(Schema::new(
        table
            .headers
            .iter()
            .map(|h| ArrowField::new(h, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ));
    let columns = (0..table.headers.len())
        .map(|idx| {
            let values = table
                .rows
                .iter()
                .map(|row| row.get(idx).map(String::as_str))
                .collect::<Vec<_>>();
            Arc::new(StringArray::from(values)) as ArrayRef
        })
        .collect::<Vec<_>>();
    let batch = RecordBatch::try_new(schema, columns)
        .with_context(|| format!("building {} record batch", table.kind))?;

    let file = File::create(&parquet_path).with_context(|| format!("creating {}", parquet_path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", parquet_path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", parquet_path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", parquet_path.display()))?;

    let bytes = std::fs::read(&parquet_path).with_context(|| format!("reading {}", parquet_path.display()))?;
    let manifest = SnapshotManifest {
        schema_version: 1,
        kind: table.kind,
        generated_at: Utc::now().to_rfc3339(),
        files: vec![SnapshotFile {
            name: table.kind.to_string(),
            path: parquet_path
                .strip_prefix(dir)
                .unwrap_or(&parquet_path)
                .display()
                .to_string(),
            sha256: UploadArchive::sha256_hex(&bytes),
            bytes: bytes.len() as u64,
            rows: table.rows.len(),
        }],
    };

    let manifest_path = dir.join("manifest.json");
    let body = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    std::fs::write(&manifest_path, body).with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}
