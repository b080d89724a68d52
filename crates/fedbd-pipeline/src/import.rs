//! CSV bulk import for holders, opportunities, research docs and subscribers.
//!
//! Limits are enforced on the whole upload before anything is written. After that every row
//! stands alone: bad rows are reported, good rows are inserted, nothing is rolled back.

use std::collections::BTreeMap;

use chrono::Utc;
use fedbd_adapters::{parse_close_date, AdapterError, ExtraField, ProgramRegistry};
use fedbd_core::{split_list, HolderMetadata, ImportType, ProgramCode};
use fedbd_storage::{
    InsertOutcome, NewHolder, NewOpportunity, NewResearchDoc, NewSubscriber, PortalStore,
    StoreError, UploadArchive,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_DATA_ROWS: usize = 1000;
pub const ACCEPTED_CONTENT_TYPES: [&str; 3] = ["text/csv", "text/plain", "application/csv"];

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("upload is {size} bytes; the limit is {max} bytes")]
    TooLarge { size: usize, max: usize },
    #[error("unsupported content type `{0}`; upload a CSV file")]
    UnsupportedType(String),
    #[error("upload is not a plain-text CSV file")]
    NotText,
    #[error("CSV file is empty or has no header row")]
    MissingHeader,
    #[error("CSV has more than {max} data rows")]
    TooManyRows { max: usize },
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("archiving upload: {0:#}")]
    Archive(anyhow::Error),
}

/// An uploaded file as received from a form or read from disk.
#[derive(Debug, Clone, Copy)]
pub struct Upload<'a> {
    pub content_type: Option<&'a str>,
    pub bytes: &'a [u8],
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub import_type: ImportType,
    pub imported: usize,
    pub total_rows: usize,
    pub errors: Vec<String>,
    pub archive_hash: Option<String>,
}

impl ImportSummary {
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}

pub fn required_fields(import_type: ImportType) -> &'static [&'static str] {
    match import_type {
        ImportType::Holders => &["name", "full_name", "program_code"],
        ImportType::Opportunities => &["opp_no", "title", "agency"],
        ImportType::ResearchDocs => &["title", "source_url"],
        ImportType::Subscribers => &["email"],
    }
}

pub fn template_headers(import_type: ImportType) -> Vec<&'static str> {
    match import_type {
        ImportType::Holders => {
            let mut headers = vec!["name", "full_name", "program_code", "capabilities"];
            headers.extend(ExtraField::ALL.iter().map(|f| f.column()));
            headers
        }
        ImportType::Opportunities => vec![
            "opp_no",
            "title",
            "agency",
            "status",
            "close_date",
            "url",
            "program_code",
        ],
        ImportType::ResearchDocs => vec!["title", "source_url", "doc_type", "tags", "drive_file_id"],
        ImportType::Subscribers => vec!["email", "name", "active", "verified", "programs"],
    }
}

fn template_example(import_type: ImportType) -> &'static [&'static str] {
    match import_type {
        ImportType::Holders => &[
            "ACME",
            "ACME Federal Solutions LLC",
            "oasis_plus",
            "Program management; Systems engineering",
            "47QRCA25DU001",
            "Unrestricted",
            "Management and Advisory; Technical and Engineering",
            "541611; 541330",
            "",
            "",
        ],
        ImportType::Opportunities => &[
            "SPE8EJ-26-R-0042",
            "Night vision sustainment",
            "DLA Troop Support",
            "open",
            "2026-03-15",
            "https://sam.gov/opp/SPE8EJ-26-R-0042",
            "tls",
        ],
        ImportType::ResearchDocs => &[
            "SEWP V ordering guide",
            "https://www.sewp.nasa.gov/ordering-guide.pdf",
            "pdf",
            "sewp; ordering",
            "",
        ],
        ImportType::Subscribers => &["analyst@example.com", "Pat Analyst", "1", "1", "tls; sewp"],
    }
}

/// Header row plus one example row.
pub fn template_csv(import_type: ImportType) -> String {
    format!(
        "{}\n{}\n",
        template_headers(import_type).join(","),
        template_example(import_type)
            .iter()
            .map(|cell| crate::analytics::csv_escape(cell))
            .collect::<Vec<_>>()
            .join(",")
    )
}

/// `" Full Name "` and `"full-name"` both become `full_name`.
pub fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// Size, declared type and content sniff. Runs before the CSV is parsed.
pub fn check_upload(upload: &Upload<'_>) -> Result<(), ImportError> {
    if upload.bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ImportError::TooLarge {
            size: upload.bytes.len(),
            max: MAX_UPLOAD_BYTES,
        });
    }
    if let Some(declared) = upload.content_type {
        let essence = declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !essence.is_empty() && !ACCEPTED_CONTENT_TYPES.contains(&essence.as_str()) {
            return Err(ImportError::UnsupportedType(essence));
        }
    }
    if upload.bytes.contains(&0) || std::str::from_utf8(upload.bytes).is_err() {
        return Err(ImportError::NotText);
    }
    Ok(())
}

#[derive(Debug)]
struct CsvRow {
    line: usize,
    cells: BTreeMap<String, String>,
}

impl CsvRow {
    fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .get(column)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn missing<'r>(&self, required: &[&'r str]) -> Vec<&'r str> {
        required
            .iter()
            .copied()
            .filter(|column| self.get(column).is_none())
            .collect()
    }
}

fn parse_rows(bytes: &[u8]) -> Result<Vec<CsvRow>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader
        .headers()?
        .iter()
        .map(normalize_header)
        .collect::<Vec<_>>();
    if headers.iter().all(String::is_empty) {
        return Err(ImportError::MissingHeader);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        // Blank lines and quoted newlines make record index and line number drift apart.
        let line = record
            .position()
            .and_then(|pos| usize::try_from(pos.line()).ok())
            .unwrap_or(rows.len() + 2);
        let cells = headers
            .iter()
            .zip(record.iter())
            .filter(|(h, _)| !h.is_empty())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();
        rows.push(CsvRow { line, cells });
        if rows.len() > MAX_DATA_ROWS {
            break;
        }
    }
    Ok(rows)
}

fn parse_flag(value: Option<&str>, default: bool) -> Option<bool> {
    match value.map(str::to_ascii_lowercase).as_deref() {
        None => Some(default),
        Some("1" | "true" | "yes" | "y" | "active" | "verified") => Some(true),
        Some("0" | "false" | "no" | "n" | "inactive") => Some(false),
        Some(_) => None,
    }
}

fn looks_like_url(value: &str) -> bool {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.is_empty() && !host.contains(char::is_whitespace))
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains('@')
        && !value.contains(char::is_whitespace)
}

/// What happened to one data row.
enum RowResult {
    Imported,
    Rejected(String),
}

pub struct CsvImporter<'a> {
    store: &'a PortalStore,
    registry: &'a ProgramRegistry,
    archive: Option<&'a UploadArchive>,
}

impl<'a> CsvImporter<'a> {
    pub fn new(store: &'a PortalStore, registry: &'a ProgramRegistry) -> Self {
        Self {
            store,
            registry,
            archive: None,
        }
    }

    pub fn with_archive(mut self, archive: &'a UploadArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub async fn run(&self, import_type: ImportType, upload: Upload<'_>) -> Result<ImportSummary, ImportError> {
        let span = info_span!("csv_import", import_type = %import_type, bytes = upload.bytes.len());
        self.run_inner(import_type, upload).instrument(span).await
    }

    async fn run_inner(&self, import_type: ImportType, upload: Upload<'_>) -> Result<ImportSummary, ImportError> {
        check_upload(&upload)?;
        let rows = parse_rows(upload.bytes)?;
        if rows.len() > MAX_DATA_ROWS {
            return Err(ImportError::TooManyRows { max: MAX_DATA_ROWS });
        }

        let archive_hash = match self.archive {
            Some(archive) => {
                let archived = archive
                    .store_upload(Utc::now(), import_type, upload.bytes)
                    .await
                    .map_err(ImportError::Archive)?;
                Some(archived.content_hash)
            }
            None => None,
        };

        let mut summary = ImportSummary {
            import_type,
            imported: 0,
            total_rows: rows.len(),
            errors: Vec::new(),
            archive_hash,
        };

        for row in &rows {
            let missing = row.missing(required_fields(import_type));
            if !missing.is_empty() {
                summary
                    .errors
                    .push(format!("Row {}: Missing required fields: {}", row.line, missing.join(", ")));
                continue;
            }

            let result = match import_type {
                ImportType::Holders => self.import_holder(row).await,
                ImportType::Opportunities => self.import_opportunity(row).await,
                ImportType::ResearchDocs => self.import_research_doc(row).await,
                ImportType::Subscribers => self.import_subscriber(row).await,
            };
            match result {
                Ok(RowResult::Imported) => summary.imported += 1,
                Ok(RowResult::Rejected(reason)) => {
                    summary.errors.push(format!("Row {}: {reason}", row.line));
                }
                Err(err) => {
                    error!(line = row.line, error = %err, "row insert failed");
                    summary.errors.push(format!("Row {}: could not be saved", row.line));
                }
            }
        }

        if let Err(err) = self
            .store
            .record_import_run(
                import_type,
                summary.imported,
                summary.total_rows,
                summary.error_count(),
                summary.archive_hash.as_deref(),
            )
            .await
        {
            warn!(error = %err, "failed to record import run");
        }

        info!(
            imported = summary.imported,
            total_rows = summary.total_rows,
            errors = summary.error_count(),
            "csv import finished"
        );
        Ok(summary)
    }

    fn program(&self, raw: &str) -> Result<ProgramCode, String> {
        self.registry.resolve(raw).map_err(|err| match err {
            AdapterError::UnknownProgram {
                input,
                suggestion: Some(code),
            } => format!("Unknown program code `{input}` (did you mean `{code}`?)"),
            AdapterError::UnknownProgram { input, .. } => format!("Unknown program code `{input}`"),
            other => other.to_string(),
        })
    }

    async fn import_holder(&self, row: &CsvRow) -> Result<RowResult, StoreError> {
        let name = row.get("name").unwrap_or_default();
        let program_code = match self.program(row.get("program_code").unwrap_or_default()) {
            Ok(code) => code,
            Err(reason) => return Ok(RowResult::Rejected(reason)),
        };

        let adapter = self.registry.adapter(program_code);
        if adapter.is_builtin_holder(name) {
            return Ok(RowResult::Rejected(format!(
                "Holder {name} already exists for {}",
                program_code.display_name()
            )));
        }
        let mut metadata = HolderMetadata::default();
        for field in adapter.extra_fields() {
            if let Some(cell) = row.get(field.column()) {
                field.apply(&mut metadata, cell);
            }
        }

        let outcome = self
            .store
            .insert_holder(&NewHolder {
                name: name.to_string(),
                full_name: row.get("full_name").unwrap_or_default().to_string(),
                program_code,
                capabilities: row.get("capabilities").map(split_list).unwrap_or_default(),
                metadata,
            })
            .await?;
        Ok(match outcome {
            InsertOutcome::Inserted(_) => RowResult::Imported,
            InsertOutcome::Duplicate => RowResult::Rejected(format!(
                "Holder {name} already exists for {}",
                program_code.display_name()
            )),
        })
    }

    async fn import_opportunity(&self, row: &CsvRow) -> Result<RowResult, StoreError> {
        let opp_no = row.get("opp_no").unwrap_or_default();

        let close_date = match row.get("close_date") {
            Some(raw) => match parse_close_date(raw) {
                Some(date) => Some(date),
                None => return Ok(RowResult::Rejected(format!("Invalid close_date '{raw}'"))),
            },
            None => None,
        };
        let url = row.get("url");
        if let Some(raw) = url.filter(|u| !looks_like_url(u)) {
            return Ok(RowResult::Rejected(format!("Invalid url '{raw}'")));
        }
        let program_code = match row.get("program_code") {
            Some(raw) => match self.program(raw) {
                Ok(code) => Some(code),
                Err(reason) => return Ok(RowResult::Rejected(reason)),
            },
            None => None,
        };

        let outcome = self
            .store
            .insert_opportunity(&NewOpportunity {
                opp_no: opp_no.to_string(),
                title: row.get("title").unwrap_or_default().to_string(),
                agency: row.get("agency").unwrap_or_default().to_string(),
                status: row.get("status").unwrap_or("open").to_ascii_lowercase(),
                close_date,
                url: url.map(ToString::to_string),
                program_code,
                meta: Default::default(),
            })
            .await?;
        Ok(match outcome {
            InsertOutcome::Inserted(_) => RowResult::Imported,
            InsertOutcome::Duplicate => RowResult::Rejected(format!("Opportunity {opp_no} already exists")),
        })
    }

    async fn import_research_doc(&self, row: &CsvRow) -> Result<RowResult, StoreError> {
        let source_url = row.get("source_url").unwrap_or_default();
        if !looks_like_url(source_url) {
            return Ok(RowResult::Rejected(format!("Invalid source_url '{source_url}'")));
        }

        let outcome = self
            .store
            .insert_research_doc(&NewResearchDoc {
                title: row.get("title").unwrap_or_default().to_string(),
                source_url: source_url.to_string(),
                doc_type: row.get("doc_type").unwrap_or("document").to_ascii_lowercase(),
                tags: row.get("tags").map(split_list).unwrap_or_default(),
                drive_file_id: row.get("drive_file_id").map(ToString::to_string),
            })
            .await?;
        Ok(match outcome {
            InsertOutcome::Inserted(_) => RowResult::Imported,
            InsertOutcome::Duplicate => {
                RowResult::Rejected(format!("Research doc {source_url} already exists"))
            }
        })
    }

    async fn import_subscriber(&self, row: &CsvRow) -> Result<RowResult, StoreError> {
        let email = row.get("email").unwrap_or_default().to_ascii_lowercase();
        if !looks_like_email(&email) {
            return Ok(RowResult::Rejected(format!("Invalid email '{email}'")));
        }
        let Some(active) = parse_flag(row.get("active"), true) else {
            return Ok(RowResult::Rejected("Invalid value for active".to_string()));
        };
        let Some(verified) = parse_flag(row.get("verified"), false) else {
            return Ok(RowResult::Rejected("Invalid value for verified".to_string()));
        };

        let mut subscribed_programs = Vec::new();
        for raw in row.get("programs").map(split_list).unwrap_or_default() {
            match self.program(&raw) {
                Ok(code) if !subscribed_programs.contains(&code) => subscribed_programs.push(code),
                Ok(_) => {}
                Err(reason) => return Ok(RowResult::Rejected(reason)),
            }
        }

        let outcome = self
            .store
            .insert_subscriber(&NewSubscriber {
                email: email.clone(),
                name: row.get("name").map(ToString::to_string),
                active,
                verified,
                subscribed_programs,
            })
            .await?;
        Ok(match outcome {
            InsertOutcome::Inserted(_) => RowResult::Imported,
            InsertOutcome::Duplicate => RowResult::Rejected(format!("Subscriber {email} already exists")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn csv_upload(text: &str) -> Upload<'_> {
        Upload {
            content_type: Some("text/csv"),
            bytes: text.as_bytes(),
        }
    }

    async fn setup() -> (PortalStore, ProgramRegistry) {
        (PortalStore::in_memory().await.unwrap(), ProgramRegistry::with_defaults())
    }

    #[tokio::test]
    async fn row_missing_full_name_is_skipped_and_reported() {
        let (store, registry) = setup().await;
        let csv = "name,full_name,program_code\n\
                   ACME,ACME Federal LLC,oasis_plus\n\
                   Beta,,oasis_plus\n\
                   Gamma,Gamma Systems Inc,sewp\n";

        let summary = CsvImporter::new(&store, &registry)
            .run(ImportType::Holders, csv_upload(csv))
            .await
            .unwrap();

        assert_eq!(summary.imported, 2);
        assert_eq!(summary.total_rows, 3);
        assert_eq!(summary.errors, vec!["Row 3: Missing required fields: full_name".to_string()]);
        assert_eq!(store.count_holders(None).await.unwrap(), 2);

        let runs = store.recent_import_runs(5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].error_count, 1);
    }

    #[tokio::test]
    async fn duplicate_opportunity_is_reported_without_touching_existing_row() {
        let (store, registry) = setup().await;
        let importer = CsvImporter::new(&store, &registry);
        importer
            .run(
                ImportType::Opportunities,
                csv_upload("opp_no,title,agency\nA-100,Original title,DLA\n"),
            )
            .await
            .unwrap();

        let summary = importer
            .run(
                ImportType::Opportunities,
                csv_upload("Opp No,Title,Agency,Close Date\nA-100,New title,GSA,2026-01-31\nA-101,Other,GSA,01/15/2026\n"),
            )
            .await
            .unwrap();

        assert_eq!(summary.imported, 1);
        assert_eq!(summary.errors, vec!["Row 2: Opportunity A-100 already exists".to_string()]);
        let existing = store.opportunity_by_no("A-100").await.unwrap().unwrap();
        assert_eq!(existing.title, "Original title");
        assert_eq!(existing.agency, "DLA");
        assert_eq!(existing.close_date, None);
    }

    #[tokio::test]
    async fn row_numbers_follow_spreadsheet_lines_past_blank_and_multiline_cells() {
        let (store, registry) = setup().await;
        let importer = CsvImporter::new(&store, &registry);

        let summary = importer
            .run(
                ImportType::Opportunities,
                csv_upload("opp_no,title,agency\nA-1,T,DLA\n\nA-2,,DLA\n"),
            )
            .await
            .unwrap();
        assert_eq!(summary.total_rows, 2);
        assert_eq!(summary.errors, vec!["Row 4: Missing required fields: title".to_string()]);

        let summary = importer
            .run(
                ImportType::Opportunities,
                csv_upload("opp_no,title,agency\nB-1,\"Two\nlines\",DLA\nB-2,,DLA\n"),
            )
            .await
            .unwrap();
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.errors, vec!["Row 4: Missing required fields: title".to_string()]);
    }

    #[tokio::test]
    async fn tls_rows_naming_a_builtin_prime_are_duplicates() {
        let (store, registry) = setup().await;
        let csv = "name,full_name,program_code\n\
                   ads,Atlantic Diving Supply Inc,tls\n\
                   Trident Supply,Trident Supply LLC,tls\n\
                   ADS,ADS Consulting,sewp\n";
        let summary = CsvImporter::new(&store, &registry)
            .run(ImportType::Holders, csv_upload(csv))
            .await
            .unwrap();

        assert_eq!(summary.imported, 2);
        assert_eq!(summary.errors, vec!["Row 2: Holder ads already exists for TLS".to_string()]);
        assert_eq!(store.holders_for_program(ProgramCode::Tls).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn holder_metadata_keeps_only_columns_the_program_declares() {
        let (store, registry) = setup().await;
        let csv = "name,full_name,program_code,pool,oem_authorizations,naics_codes\n\
                   ACME,ACME Federal LLC,OASIS+,Unrestricted,Dell,541611\n\
                   Gamma,Gamma Systems Inc,SEWP V,Unrestricted,Dell|HP,541519\n";
        let summary = CsvImporter::new(&store, &registry)
            .run(ImportType::Holders, csv_upload(csv))
            .await
            .unwrap();
        assert_eq!(summary.imported, 2);

        let oasis = store.holders_for_program(ProgramCode::OasisPlus).await.unwrap();
        assert_eq!(oasis[0].metadata.pool.as_deref(), Some("Unrestricted"));
        assert!(oasis[0].metadata.oem_authorizations.is_empty());

        let sewp = store.holders_for_program(ProgramCode::Sewp).await.unwrap();
        assert_eq!(sewp[0].metadata.pool, None);
        assert_eq!(sewp[0].metadata.oem_authorizations, vec!["Dell".to_string(), "HP".to_string()]);
    }

    #[tokio::test]
    async fn invalid_cells_become_row_errors() {
        let (store, registry) = setup().await;
        let summary = CsvImporter::new(&store, &registry)
            .run(
                ImportType::Subscribers,
                csv_upload("email,programs,verified\nnot-an-email,tls,1\nok@example.com,gsa,1\ngood@example.com,tls;sewp,yes\n"),
            )
            .await
            .unwrap();
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.errors.len(), 2);
        assert!(summary.errors[0].starts_with("Row 2: Invalid email"));
        assert!(summary.errors[1].starts_with("Row 3: Unknown program code `gsa`"));
        assert_eq!(store.reachable_subscribers(Some(ProgramCode::Sewp)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn oversized_and_binary_uploads_are_rejected_before_any_insert() {
        let (store, registry) = setup().await;
        let importer = CsvImporter::new(&store, &registry);

        let mut rows = String::from("email\n");
        for i in 0..=MAX_DATA_ROWS {
            rows.push_str(&format!("user{i}@example.com\n"));
        }
        let err = importer.run(ImportType::Subscribers, csv_upload(&rows)).await.unwrap_err();
        assert!(matches!(err, ImportError::TooManyRows { .. }));
        assert_eq!(store.count_subscribers(None, false).await.unwrap(), 0);

        let err = importer
            .run(
                ImportType::Subscribers,
                Upload {
                    content_type: Some("application/pdf"),
                    bytes: b"email\na@example.com\n",
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::UnsupportedType(_)));

        let err = importer
            .run(
                ImportType::Subscribers,
                Upload {
                    content_type: None,
                    bytes: b"email\n\x00\xff\n",
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::NotText));
        assert!(store.recent_import_runs(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn uploads_are_archived_by_content_hash() {
        let (store, registry) = setup().await;
        let dir = tempdir().unwrap();
        let archive = UploadArchive::new(dir.path());
        let csv = "title,source_url\nMarket scan,https://docs.example.gov/scan\n";
        let summary = CsvImporter::new(&store, &registry)
            .with_archive(&archive)
            .run(ImportType::ResearchDocs, csv_upload(csv))
            .await
            .unwrap();
        assert_eq!(summary.archive_hash.as_deref(), Some(UploadArchive::sha256_hex(csv.as_bytes()).as_str()));
        assert_eq!(summary.imported, 1);
    }

    #[test]
    fn headers_are_normalized() {
        assert_eq!(normalize_header("\u{feff} Full Name "), "full_name");
        assert_eq!(normalize_header("close-date"), "close_date");
    }

    #[test]
    fn templates_start_with_required_columns() {
        for import_type in ImportType::ALL {
            let headers = template_headers(import_type);
            for required in required_fields(import_type) {
                assert!(headers.contains(required), "{import_type} template lacks {required}");
            }
            let csv = template_csv(import_type);
            assert_eq!(csv.lines().count(), 2);
        }
    }
}
