//! SQL DDL applied by `PortalStore::migrate`. Every statement is idempotent.

/// Uniqueness lives in the schema: imports rely on `ON CONFLICT DO NOTHING` rather than
/// a pre-insert existence check.
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS programs (
    code TEXT PRIMARY KEY NOT NULL,
    display_name TEXT NOT NULL,
    keywords_json TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS holders (
    id INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    full_name TEXT NOT NULL,
    program_code TEXT NOT NULL REFERENCES programs(code),
    capabilities_json TEXT NOT NULL DEFAULT '[]',
    metadata_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    UNIQUE(program_code, name)
);

CREATE TABLE IF NOT EXISTS opportunities (
    id INTEGER PRIMARY KEY NOT NULL,
    opp_no TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    agency TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'open',
    close_date TEXT NULL,
    url TEXT NULL,
    program_code TEXT NULL,
    meta_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_opportunities_program ON opportunities(program_code);

CREATE TABLE IF NOT EXISTS research_docs (
    id INTEGER PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    source_url TEXT NOT NULL UNIQUE,
    doc_type TEXT NOT NULL DEFAULT 'document',
    tags_json TEXT NOT NULL DEFAULT '[]',
    drive_file_id TEXT NULL UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS subscribers (
    id INTEGER PRIMARY KEY NOT NULL,
    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
    name TEXT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    verified INTEGER NOT NULL DEFAULT 0,
    programs_json TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY NOT NULL,
    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
    display_name TEXT NOT NULL,
    role TEXT NOT NULL,
    password_salt TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS import_runs (
    id INTEGER PRIMARY KEY NOT NULL,
    import_type TEXT NOT NULL,
    imported INTEGER NOT NULL,
    total_rows INTEGER NOT NULL,
    error_count INTEGER NOT NULL,
    archive_hash TEXT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_log (
    id INTEGER PRIMARY KEY NOT NULL,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    created_count INTEGER NOT NULL DEFAULT 0,
    updated_count INTEGER NOT NULL DEFAULT 0,
    message TEXT NULL,
    started_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_log_kind ON sync_log(kind, started_at);

CREATE TABLE IF NOT EXISTS calendar_events (
    id INTEGER PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    event_date TEXT NOT NULL,
    event_time TEXT NULL,
    opp_no TEXT NULL,
    notes TEXT NULL,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS outreach_log (
    id INTEGER PRIMARY KEY NOT NULL,
    subject TEXT NOT NULL,
    program_code TEXT NULL,
    recipients INTEGER NOT NULL,
    sent_by TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;
