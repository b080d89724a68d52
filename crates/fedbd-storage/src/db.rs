//! SQLite-backed store for programs, imported entities, users and operational logs.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use fedbd_core::{
    Holder, HolderMetadata, ImportType, Opportunity, ProgramCode, ResearchDoc, Role, Subscriber,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::schema::SQLITE_INIT;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("corrupt {column} column: {source}")]
    Json {
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown {kind} stored in database: {value}")]
    UnknownValue { kind: &'static str, value: String },
}

/// Result of an insert guarded by a UNIQUE constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocUpsertOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone)]
pub struct NewHolder {
    pub name: String,
    pub full_name: String,
    pub program_code: ProgramCode,
    pub capabilities: Vec<String>,
    pub metadata: HolderMetadata,
}

#[derive(Debug, Clone)]
pub struct NewOpportunity {
    pub opp_no: String,
    pub title: String,
    pub agency: String,
    pub status: String,
    pub close_date: Option<NaiveDate>,
    pub url: Option<String>,
    pub program_code: Option<ProgramCode>,
    pub meta: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct NewResearchDoc {
    pub title: String,
    pub source_url: String,
    pub doc_type: String,
    pub tags: Vec<String>,
    pub drive_file_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DriveDocUpsert {
    pub drive_file_id: String,
    pub title: String,
    pub source_url: String,
    pub doc_type: String,
}

#[derive(Debug, Clone)]
pub struct NewSubscriber {
    pub email: String,
    pub name: Option<String>,
    pub active: bool,
    pub verified: bool,
    pub subscribed_programs: Vec<ProgramCode>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub password_salt: String,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub password_salt: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutreachRecord {
    pub subject: String,
    pub program_code: Option<ProgramCode>,
    pub recipients: i64,
    pub sent_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportRunRecord {
    pub id: i64,
    pub import_type: String,
    pub imported: i64,
    pub total_rows: i64,
    pub error_count: i64,
    pub archive_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncLogEntry {
    pub kind: String,
    pub status: String,
    pub created_count: i64,
    pub updated_count: i64,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CalendarEvent {
    pub title: String,
    pub event_date: NaiveDate,
    pub event_time: Option<String>,
    pub opp_no: Option<String>,
    pub notes: Option<String>,
    pub created_by: String,
}

const PROGRAM_SETTING_PREFIX: &str = "program.";
const PROGRAM_SETTING_SUFFIX: &str = ".enabled";

#[derive(Debug, Clone)]
pub struct PortalStore {
    pool: SqlitePool,
}

impl PortalStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory database with the schema applied.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the schema and make sure every known program has a row.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SQLITE_INIT).execute(&self.pool).await?;
        let now = Utc::now();
        for code in ProgramCode::ALL {
            sqlx::query(
                r#"
                INSERT INTO programs (code, display_name, created_at)
                VALUES (?, ?, ?)
                ON CONFLICT(code) DO NOTHING
                "#,
            )
            .bind(code.as_str())
            .bind(code.display_name())
            .bind(now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn update_program_catalog(
        &self,
        code: ProgramCode,
        display_name: &str,
        keywords: &[String],
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE programs SET display_name = ?, keywords_json = ? WHERE code = ?")
            .bind(display_name)
            .bind(to_json("keywords_json", keywords)?)
            .bind(code.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persisted enable flags; programs never toggled are absent.
    pub async fn program_toggles(&self) -> Result<BTreeMap<ProgramCode, bool>, StoreError> {
        let rows = sqlx::query("SELECT key, value FROM settings WHERE key LIKE 'program.%.enabled'")
            .fetch_all(&self.pool)
            .await?;
        let mut out = BTreeMap::new();
        for row in rows {
            let key: String = row.try_get("key")?;
            let value: String = row.try_get("value")?;
            let code = key
                .strip_prefix(PROGRAM_SETTING_PREFIX)
                .and_then(|rest| rest.strip_suffix(PROGRAM_SETTING_SUFFIX))
                .and_then(ProgramCode::parse_loose);
            if let Some(code) = code {
                out.insert(code, value == "1");
            }
        }
        Ok(out)
    }

    pub async fn set_program_enabled(&self, code: ProgramCode, enabled: bool) -> Result<(), StoreError> {
        let key = format!("{PROGRAM_SETTING_PREFIX}{}{PROGRAM_SETTING_SUFFIX}", code.as_str());
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(if enabled { "1" } else { "0" })
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_holder(&self, holder: &NewHolder) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO holders (name, full_name, program_code, capabilities_json, metadata_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(program_code, name) DO NOTHING
            "#,
        )
        .bind(&holder.name)
        .bind(&holder.full_name)
        .bind(holder.program_code.as_str())
        .bind(to_json("capabilities_json", &holder.capabilities)?)
        .bind(to_json("metadata_json", &holder.metadata)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(insert_outcome(result.rows_affected(), result.last_insert_rowid()))
    }

    pub async fn holders_for_program(&self, code: ProgramCode) -> Result<Vec<Holder>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, full_name, program_code, capabilities_json, metadata_json
              FROM holders
             WHERE program_code = ?
             ORDER BY name
            "#,
        )
        .bind(code.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(holder_from_row).collect()
    }

    pub async fn insert_opportunity(&self, opp: &NewOpportunity) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO opportunities (opp_no, title, agency, status, close_date, url, program_code, meta_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(opp_no) DO NOTHING
            "#,
        )
        .bind(&opp.opp_no)
        .bind(&opp.title)
        .bind(&opp.agency)
        .bind(&opp.status)
        .bind(opp.close_date)
        .bind(&opp.url)
        .bind(opp.program_code.map(ProgramCode::as_str))
        .bind(to_json("meta_json", &opp.meta)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(insert_outcome(result.rows_affected(), result.last_insert_rowid()))
    }

    pub async fn opportunity_by_no(&self, opp_no: &str) -> Result<Option<Opportunity>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, opp_no, title, agency, status, close_date, url, program_code, meta_json
              FROM opportunities
             WHERE opp_no = ?
            "#,
        )
        .bind(opp_no)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(opportunity_from_row).transpose()
    }

    /// Opportunities ordered by closing date; `None` returns every program.
    pub async fn opportunities(
        &self,
        program: Option<ProgramCode>,
        limit: i64,
    ) -> Result<Vec<Opportunity>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, opp_no, title, agency, status, close_date, url, program_code, meta_json
              FROM opportunities
             WHERE (?1 IS NULL OR program_code = ?1)
             ORDER BY close_date IS NULL, close_date, opp_no
             LIMIT ?2
            "#,
        )
        .bind(program.map(ProgramCode::as_str))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(opportunity_from_row).collect()
    }

    pub async fn insert_research_doc(&self, doc: &NewResearchDoc) -> Result<InsertOutcome, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO research_docs (title, source_url, doc_type, tags_json, drive_file_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&doc.title)
        .bind(&doc.source_url)
        .bind(&doc.doc_type)
        .bind(to_json("tags_json", &doc.tags)?)
        .bind(&doc.drive_file_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(insert_outcome(result.rows_affected(), result.last_insert_rowid()))
    }

    /// Update the row already linked to this Drive file, else insert it (or link the row
    /// that already carries the same source URL).
    pub async fn upsert_drive_doc(&self, doc: &DriveDocUpsert) -> Result<DocUpsertOutcome, StoreError> {
        let now = Utc::now();
        let updated = sqlx::query(
            r#"
            UPDATE research_docs
               SET title = ?, source_url = ?, doc_type = ?, updated_at = ?
             WHERE drive_file_id = ?
            "#,
        )
        .bind(&doc.title)
        .bind(&doc.source_url)
        .bind(&doc.doc_type)
        .bind(now)
        .bind(&doc.drive_file_id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() > 0 {
            return Ok(DocUpsertOutcome::Updated);
        }

        let row = sqlx::query(
            r#"
            INSERT INTO research_docs (title, source_url, doc_type, tags_json, drive_file_id, created_at, updated_at)
            VALUES (?, ?, ?, '[]', ?, ?, ?)
            ON CONFLICT(source_url) DO UPDATE
               SET drive_file_id = excluded.drive_file_id,
                   title = excluded.title,
                   doc_type = excluded.doc_type,
                   updated_at = excluded.updated_at
            RETURNING created_at = updated_at AS fresh
            "#,
        )
        .bind(&doc.title)
        .bind(&doc.source_url)
        .bind(&doc.doc_type)
        .bind(&doc.drive_file_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        let fresh: bool = row.try_get("fresh")?;
        Ok(if fresh {
            DocUpsertOutcome::Created
        } else {
            DocUpsertOutcome::Updated
        })
    }

    pub async fn research_docs(&self, limit: i64) -> Result<Vec<ResearchDoc>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, source_url, doc_type, tags_json, drive_file_id
              FROM research_docs
             ORDER BY updated_at DESC, id DESC
             LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<ResearchDoc, StoreError> {
                Ok(ResearchDoc {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    source_url: row.try_get("source_url")?,
                    doc_type: row.try_get("doc_type")?,
                    tags: from_json("tags_json", &row.try_get::<String, _>("tags_json")?)?,
                    drive_file_id: row.try_get("drive_file_id")?,
                })
            })
            .collect()
    }

    pub async fn insert_subscriber(&self, sub: &NewSubscriber) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscribers (email, name, active, verified, programs_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(email) DO NOTHING
            "#,
        )
        .bind(&sub.email)
        .bind(&sub.name)
        .bind(sub.active)
        .bind(sub.verified)
        .bind(to_json("programs_json", &sub.subscribed_programs)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(insert_outcome(result.rows_affected(), result.last_insert_rowid()))
    }

    /// Active, verified subscribers; with a program, only those subscribed to it.
    pub async fn reachable_subscribers(
        &self,
        program: Option<ProgramCode>,
    ) -> Result<Vec<Subscriber>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, email, name, active, verified, programs_json
              FROM subscribers
             WHERE active = 1
               AND verified = 1
               AND (?1 IS NULL OR programs_json LIKE ?1)
             ORDER BY email
            "#,
        )
        .bind(program.map(program_json_pattern))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<Subscriber, StoreError> {
                Ok(Subscriber {
                    id: row.try_get("id")?,
                    email: row.try_get("email")?,
                    name: row.try_get("name")?,
                    active: row.try_get("active")?,
                    verified: row.try_get("verified")?,
                    subscribed_programs: from_json(
                        "programs_json",
                        &row.try_get::<String, _>("programs_json")?,
                    )?,
                })
            })
            .collect()
    }

    pub async fn create_user(&self, user: &NewUser) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (email, display_name, role, password_salt, password_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(email) DO NOTHING
            "#,
        )
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(user.role.as_str())
        .bind(&user.password_salt)
        .bind(&user.password_hash)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(insert_outcome(result.rows_affected(), result.last_insert_rowid()))
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, email, display_name, role, password_salt, password_hash
              FROM users
             WHERE email = ?
            "#,
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let role: String = row.try_get("role")?;
        Ok(Some(UserRecord {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            display_name: row.try_get("display_name")?,
            role: Role::from_str(&role).map_err(|_| StoreError::UnknownValue {
                kind: "role",
                value: role.clone(),
            })?,
            password_salt: row.try_get("password_salt")?,
            password_hash: row.try_get("password_hash")?,
        }))
    }

    pub async fn record_import_run(
        &self,
        import_type: ImportType,
        imported: usize,
        total_rows: usize,
        error_count: usize,
        archive_hash: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO import_runs (import_type, imported, total_rows, error_count, archive_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(import_type.as_str())
        .bind(imported as i64)
        .bind(total_rows as i64)
        .bind(error_count as i64)
        .bind(archive_hash)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_import_runs(&self, limit: i64) -> Result<Vec<ImportRunRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, import_type, imported, total_rows, error_count, archive_hash, created_at
              FROM import_runs
             ORDER BY created_at DESC, id DESC
             LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<ImportRunRecord, StoreError> {
                Ok(ImportRunRecord {
                    id: row.try_get("id")?,
                    import_type: row.try_get("import_type")?,
                    imported: row.try_get("imported")?,
                    total_rows: row.try_get("total_rows")?,
                    error_count: row.try_get("error_count")?,
                    archive_hash: row.try_get("archive_hash")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    pub async fn last_sync(&self, kind: &str) -> Result<Option<SyncLogEntry>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT kind, status, created_count, updated_count, message, started_at
              FROM sync_log
             WHERE kind = ?
             ORDER BY started_at DESC, id DESC
             LIMIT 1
            "#,
        )
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(SyncLogEntry {
            kind: row.try_get("kind")?,
            status: row.try_get("status")?,
            created_count: row.try_get("created_count")?,
            updated_count: row.try_get("updated_count")?,
            message: row.try_get("message")?,
            started_at: row.try_get("started_at")?,
        }))
    }

    pub async fn record_sync(&self, entry: &SyncLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_log (kind, status, created_count, updated_count, message, started_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.kind)
        .bind(&entry.status)
        .bind(entry.created_count)
        .bind(entry.updated_count)
        .bind(&entry.message)
        .bind(entry.started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_calendar_event(&self, event: &CalendarEvent) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO calendar_events (title, event_date, event_time, opp_no, notes, created_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.title)
        .bind(event.event_date)
        .bind(&event.event_time)
        .bind(&event.opp_no)
        .bind(&event.notes)
        .bind(&event.created_by)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn record_outreach(
        &self,
        subject: &str,
        program: Option<ProgramCode>,
        recipients: usize,
        sent_by: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO outreach_log (subject, program_code, recipients, sent_by, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(subject)
        .bind(program.map(ProgramCode::as_str))
        .bind(recipients as i64)
        .bind(sent_by)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_outreach(&self, limit: i64) -> Result<Vec<OutreachRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT subject, program_code, recipients, sent_by, created_at
              FROM outreach_log
             ORDER BY created_at DESC, id DESC
             LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<OutreachRecord, StoreError> {
                let program_code: Option<String> = row.try_get("program_code")?;
                Ok(OutreachRecord {
                    subject: row.try_get("subject")?,
                    program_code: program_code.as_deref().map(parse_program).transpose()?,
                    recipients: row.try_get("recipients")?,
                    sent_by: row.try_get("sent_by")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    pub async fn count_holders(&self, program: Option<ProgramCode>) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM holders WHERE (?1 IS NULL OR program_code = ?1)")
            .bind(program.map(ProgramCode::as_str))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn count_opportunities(
        &self,
        program: Option<ProgramCode>,
        status: Option<&str>,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n
              FROM opportunities
             WHERE (?1 IS NULL OR program_code = ?1)
               AND (?2 IS NULL OR LOWER(status) = LOWER(?2))
            "#,
        )
        .bind(program.map(ProgramCode::as_str))
        .bind(status)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    /// `(program_code, status, count)` rows; unassigned opportunities report an empty code.
    pub async fn opportunity_status_counts(
        &self,
        program: Option<ProgramCode>,
    ) -> Result<Vec<(String, String, i64)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT COALESCE(program_code, '') AS program_code, LOWER(status) AS status, COUNT(*) AS n
              FROM opportunities
             WHERE (?1 IS NULL OR program_code = ?1)
             GROUP BY 1, 2
             ORDER BY 1, 2
            "#,
        )
        .bind(program.map(ProgramCode::as_str))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<(String, String, i64), StoreError> {
                Ok((row.try_get("program_code")?, row.try_get("status")?, row.try_get("n")?))
            })
            .collect()
    }

    pub async fn count_research_docs(&self, drive_linked_only: bool) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM research_docs WHERE (?1 = 0 OR drive_file_id IS NOT NULL)",
        )
        .bind(drive_linked_only)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn count_subscribers(
        &self,
        program: Option<ProgramCode>,
        verified_only: bool,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n
              FROM subscribers
             WHERE active = 1
               AND (?1 = 0 OR verified = 1)
               AND (?2 IS NULL OR programs_json LIKE ?2)
            "#,
        )
        .bind(verified_only)
        .bind(program.map(program_json_pattern))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn count_sync_runs(&self, kind: &str, status: Option<&str>) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM sync_log WHERE kind = ?1 AND (?2 IS NULL OR status = ?2)",
        )
        .bind(kind)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn import_error_total(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COALESCE(SUM(error_count), 0) AS n FROM import_runs")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

fn insert_outcome(rows_affected: u64, rowid: i64) -> InsertOutcome {
    if rows_affected == 0 {
        InsertOutcome::Duplicate
    } else {
        InsertOutcome::Inserted(rowid)
    }
}

fn program_json_pattern(code: ProgramCode) -> String {
    format!("%\"{}\"%", code.as_str())
}

fn to_json<T: Serialize + ?Sized>(column: &'static str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Json { column, source })
}

fn from_json<T: DeserializeOwned>(column: &'static str, text: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(|source| StoreError::Json { column, source })
}

fn parse_program(value: &str) -> Result<ProgramCode, StoreError> {
    ProgramCode::parse_loose(value).ok_or_else(|| StoreError::UnknownValue {
        kind: "program code",
        value: value.to_string(),
    })
}

fn holder_from_row(row: &SqliteRow) -> Result<Holder, StoreError> {
    let program_code: String = row.try_get("program_code")?;
    Ok(Holder {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        full_name: row.try_get("full_name")?,
        program_code: parse_program(&program_code)?,
        capabilities: from_json("capabilities_json", &row.try_get::<String, _>("capabilities_json")?)?,
        metadata: from_json("metadata_json", &row.try_get::<String, _>("metadata_json")?)?,
    })
}

fn opportunity_from_row(row: &SqliteRow) -> Result<Opportunity, StoreError> {
    let program_code: Option<String> = row.try_get("program_code")?;
    Ok(Opportunity {
        id: row.try_get("id")?,
        opp_no: row.try_get("opp_no")?,
        title: row.try_get("title")?,
        agency: row.try_get("agency")?,
        status: row.try_get("status")?,
        close_date: row.try_get("close_date")?,
        url: row.try_get("url")?,
        program_code: program_code.as_deref().map(parse_program).transpose()?,
        meta: from_json("meta_json", &row.try_get::<String, _>("meta_json")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opp(opp_no: &str, title: &str) -> NewOpportunity {
        NewOpportunity {
            opp_no: opp_no.to_string(),
            title: title.to_string(),
            agency: "DLA Troop Support".to_string(),
            status: "open".to_string(),
            close_date: NaiveDate::from_ymd_opt(2026, 11, 30),
            url: None,
            program_code: Some(ProgramCode::Tls),
            meta: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn duplicate_opportunity_leaves_existing_row_untouched() {
        let store = PortalStore::in_memory().await.unwrap();
        let first = store.insert_opportunity(&opp("SPE300-26-R-0001", "Original")).await.unwrap();
        assert!(matches!(first, InsertOutcome::Inserted(_)));

        let second = store.insert_opportunity(&opp("SPE300-26-R-0001", "Replacement")).await.unwrap();
        assert_eq!(second, InsertOutcome::Duplicate);

        let stored = store.opportunity_by_no("SPE300-26-R-0001").await.unwrap().unwrap();
        assert_eq!(stored.title, "Original");
        assert_eq!(stored.close_date, NaiveDate::from_ymd_opt(2026, 11, 30));
        assert_eq!(stored.program_code, Some(ProgramCode::Tls));
    }

    #[tokio::test]
    async fn program_toggles_persist_in_settings() {
        let store = PortalStore::in_memory().await.unwrap();
        assert!(store.program_toggles().await.unwrap().is_empty());

        store.set_program_enabled(ProgramCode::Sewp, false).await.unwrap();
        store.set_program_enabled(ProgramCode::Sewp, true).await.unwrap();
        store.set_program_enabled(ProgramCode::Tls, false).await.unwrap();

        let toggles = store.program_toggles().await.unwrap();
        assert_eq!(toggles.get(&ProgramCode::Sewp), Some(&true));
        assert_eq!(toggles.get(&ProgramCode::Tls), Some(&false));
        assert_eq!(toggles.get(&ProgramCode::OasisPlus), None);
    }

    #[tokio::test]
    async fn holders_round_trip_metadata_and_capabilities() {
        let store = PortalStore::in_memory().await.unwrap();
        let holder = NewHolder {
            name: "ACME".to_string(),
            full_name: "ACME Federal Solutions LLC".to_string(),
            program_code: ProgramCode::OasisPlus,
            capabilities: vec!["Program management".to_string()],
            metadata: HolderMetadata {
                pool: Some("Unrestricted".to_string()),
                domains: vec!["Technical and Engineering".to_string()],
                ..HolderMetadata::default()
            },
        };
        assert!(matches!(store.insert_holder(&holder).await.unwrap(), InsertOutcome::Inserted(_)));
        assert_eq!(store.insert_holder(&holder).await.unwrap(), InsertOutcome::Duplicate);

        let holders = store.holders_for_program(ProgramCode::OasisPlus).await.unwrap();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].metadata.pool.as_deref(), Some("Unrestricted"));
        assert_eq!(holders[0].capabilities, vec!["Program management".to_string()]);
        assert!(store.holders_for_program(ProgramCode::Sewp).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn drive_upsert_updates_by_file_id_and_links_by_url() {
        let store = PortalStore::in_memory().await.unwrap();
        store
            .insert_research_doc(&NewResearchDoc {
                title: "Market scan".to_string(),
                source_url: "https://docs.example.gov/scan".to_string(),
                doc_type: "pdf".to_string(),
                tags: vec![],
                drive_file_id: None,
            })
            .await
            .unwrap();

        let linked = store
            .upsert_drive_doc(&DriveDocUpsert {
                drive_file_id: "file-1".to_string(),
                title: "Market scan v2".to_string(),
                source_url: "https://docs.example.gov/scan".to_string(),
                doc_type: "pdf".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(linked, DocUpsertOutcome::Updated);

        let created = store
            .upsert_drive_doc(&DriveDocUpsert {
                drive_file_id: "file-2".to_string(),
                title: "Capability brief".to_string(),
                source_url: "https://drive.example.com/file-2".to_string(),
                doc_type: "document".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(created, DocUpsertOutcome::Created);

        let again = store
            .upsert_drive_doc(&DriveDocUpsert {
                drive_file_id: "file-2".to_string(),
                title: "Capability brief (final)".to_string(),
                source_url: "https://drive.example.com/file-2".to_string(),
                doc_type: "document".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(again, DocUpsertOutcome::Updated);

        assert_eq!(store.count_research_docs(false).await.unwrap(), 2);
        assert_eq!(store.count_research_docs(true).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn reachable_subscribers_filter_by_program() {
        let store = PortalStore::in_memory().await.unwrap();
        for (email, verified, programs) in [
            ("a@example.com", true, vec![ProgramCode::Tls]),
            ("b@example.com", true, vec![ProgramCode::Sewp]),
            ("c@example.com", false, vec![ProgramCode::Tls]),
        ] {
            store
                .insert_subscriber(&NewSubscriber {
                    email: email.to_string(),
                    name: None,
                    active: true,
                    verified,
                    subscribed_programs: programs,
                })
                .await
                .unwrap();
        }

        let tls = store.reachable_subscribers(Some(ProgramCode::Tls)).await.unwrap();
        assert_eq!(tls.len(), 1);
        assert_eq!(tls[0].email, "a@example.com");
        assert_eq!(store.reachable_subscribers(None).await.unwrap().len(), 2);
        assert_eq!(store.count_subscribers(None, false).await.unwrap(), 3);
    }
}
