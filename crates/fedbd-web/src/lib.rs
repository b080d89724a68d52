//! Axum + Askama web portal: program pages, imports, analytics, settings and the JSON API.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use askama::Template;
use axum::{
    extract::{DefaultBodyLimit, Form, Multipart, Path as AxumPath, Query, State},
    http::{header, StatusCode, Uri},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use fedbd_adapters::{AdapterError, ProgramAdapter, ProgramRegistry};
use fedbd_core::{ImportType, PortalConfig, ProgramCode, Role};
use fedbd_pipeline::import::{template_csv, MAX_UPLOAD_BYTES};
use fedbd_pipeline::{
    build_export, render_micro_catalog, to_csv, to_json, CsvImporter, DriveClient, ExportFormat,
    ExportKind, GoogleDriveClient, Upload,
};
use fedbd_storage::{PortalStore, UploadArchive};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub mod api;
pub mod auth;
pub mod health;
pub mod mail;

use auth::{RequestContext, SessionStore};
use mail::{LogMailer, Mailer};

pub const CRATE_NAME: &str = "fedbd-web";

const RECENT_IMPORTS: i64 = 10;
const RECENT_DOCS_LIMIT: i64 = 10;
const RECENT_OUTREACH_LIMIT: i64 = 10;

#[derive(Clone)]
pub struct AppState {
    pub store: PortalStore,
    pub registry: Arc<ProgramRegistry>,
    pub config: Arc<PortalConfig>,
    pub archive: UploadArchive,
    pub sessions: SessionStore,
    pub mailer: Arc<dyn Mailer>,
    pub drive: Option<Arc<dyn DriveClient>>,
}

impl AppState {
    pub fn new(store: PortalStore, registry: Arc<ProgramRegistry>, config: Arc<PortalConfig>) -> Self {
        let archive = UploadArchive::new(config.artifacts_dir.join("uploads"));
        Self {
            store,
            registry,
            config,
            archive,
            sessions: auth::new_session_store(),
            mailer: Arc::new(LogMailer),
            drive: None,
        }
    }

    pub fn with_drive(mut self, client: Arc<dyn DriveClient>) -> Self {
        self.drive = Some(client);
        self
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    /// Connect, migrate, load `programs.yaml` and apply saved toggles.
    pub async fn bootstrap(config: PortalConfig) -> anyhow::Result<Self> {
        let store = PortalStore::connect(&config.database_url, config.db_max_connections)
            .await
            .with_context(|| format!("connecting to {}", config.database_url))?;
        store.migrate().await.context("applying schema")?;
        let registry = ProgramRegistry::load(&config.workspace_root).await?;
        registry
            .sync_with_store(&store)
            .await
            .context("applying saved program toggles")?;
        let drive = GoogleDriveClient::from_config(&config)?;

        let mut state = Self::new(store, Arc::new(registry), Arc::new(config));
        if let Some(client) = drive {
            state = state.with_drive(Arc::new(client));
        }
        Ok(state)
    }

    pub fn drive_configured(&self) -> bool {
        self.drive.is_some() && self.config.google_drive_folder_id.is_some()
    }
}

/// Shared header data for every page.
#[derive(Debug, Clone, Default)]
struct Chrome {
    user_name: String,
    role: String,
    csrf_token: String,
    is_ops: bool,
    is_admin: bool,
}

impl Chrome {
    fn for_user(ctx: &RequestContext) -> Self {
        Self {
            user_name: ctx.user.display_name.clone(),
            role: ctx.user.role.as_str().to_string(),
            csrf_token: ctx.csrf_token.clone(),
            is_ops: ctx.has_role(Role::Ops),
            is_admin: ctx.has_role(Role::Admin),
        }
    }
}

#[derive(Debug, Clone)]
struct ProgramSummaryRow {
    code: String,
    display_name: String,
    holders: usize,
    opportunities: i64,
}

#[derive(Debug, Clone)]
struct ResearchDocRow {
    title: String,
    source_url: String,
    doc_type: String,
}

#[derive(Debug, Clone)]
struct OutreachRow {
    created_at: String,
    subject: String,
    program: String,
    recipients: i64,
    sent_by: String,
}

#[derive(Debug, Clone)]
struct HolderRow {
    id: i64,
    name: String,
    full_name: String,
    capabilities: String,
    extras: Vec<String>,
}

#[derive(Debug, Clone)]
struct OpportunityRow {
    opp_no: String,
    title: String,
    agency: String,
    status: String,
    close_date: String,
    url: String,
    details: String,
}

#[derive(Debug, Clone)]
struct ToggleRow {
    code: String,
    display_name: String,
    enabled: bool,
    keywords: String,
}

#[derive(Debug, Clone)]
struct ImportRunRow {
    created_at: String,
    import_type: String,
    imported: i64,
    total_rows: i64,
    error_count: i64,
}

#[derive(Debug, Clone)]
struct OptionRow {
    value: String,
    label: String,
    selected: bool,
}

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    chrome: Chrome,
    error: String,
    email: String,
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorTemplate {
    chrome: Chrome,
    message: String,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    chrome: Chrome,
    programs: Vec<ProgramSummaryRow>,
    research_docs: i64,
    recent_docs: Vec<ResearchDocRow>,
    subscribers: i64,
    drive_configured: bool,
}

#[derive(Template)]
#[template(path = "program.html")]
struct ProgramTemplate {
    chrome: Chrome,
    code: String,
    display_name: String,
    keywords: String,
    extra_labels: Vec<String>,
    holders: Vec<HolderRow>,
    opportunities: Vec<OpportunityRow>,
}

#[derive(Template)]
#[template(path = "settings.html")]
struct SettingsTemplate {
    chrome: Chrome,
    programs: Vec<ToggleRow>,
}

#[derive(Template)]
#[template(path = "import.html")]
struct ImportTemplate {
    chrome: Chrome,
    import_types: Vec<OptionRow>,
    notice: String,
    error: String,
    row_errors: Vec<String>,
    recent: Vec<ImportRunRow>,
}

#[derive(Template)]
#[template(path = "analytics.html")]
struct AnalyticsTemplate {
    chrome: Chrome,
    programs: Vec<OptionRow>,
    program_query: String,
    export_kinds: Vec<String>,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    outreach: Vec<OutreachRow>,
}

pub fn app(state: AppState) -> Router {
    let import_limit = DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 64 * 1024);
    Router::new()
        .route("/", get(index_handler))
        .route("/auth/login.php", get(login_page_handler).post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/programs/{code}", get(program_handler))
        .route("/programs/{code}/holders/{id}/catalog", get(catalog_handler))
        .route("/settings/", get(settings_handler))
        .route("/settings/programs/{code}/toggle", post(toggle_program_handler))
        .route(
            "/admin/import",
            get(import_page_handler)
                .post(import_submit_handler)
                .layer(import_limit),
        )
        .route("/admin/import/template", get(import_template_handler))
        .route("/analytics", get(analytics_handler))
        .route("/analytics/export", get(analytics_export_handler))
        .route(
            "/api/calendar/create",
            post(api::calendar_create).fallback(api::method_not_allowed),
        )
        .route(
            "/api/outreach/send",
            post(api::outreach_send).fallback(api::method_not_allowed),
        )
        .route(
            "/api/drive/sync",
            post(api::drive_sync).fallback(api::method_not_allowed),
        )
        .route("/health", get(health::health_handler))
        .route("/assets/static/app.css", get(app_css_handler))
        .fallback(not_found_handler)
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let port = state.config.web_port;
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "fedbd web listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn render_html<T: Template>(tpl: T) -> Response {
    render_html_with_status(StatusCode::OK, tpl)
}

fn render_html_with_status<T: Template>(status: StatusCode, tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    let detail = format!("{err:#}");
    error!(error = %detail, "page request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html("Server error. The failure has been logged.".to_string()),
    )
        .into_response()
}

/// Page-level error banner.
fn page_error(chrome: Chrome, status: StatusCode, message: impl Into<String>) -> Response {
    render_html_with_status(
        status,
        ErrorTemplate {
            chrome,
            message: message.into(),
        },
    )
}

fn forbidden(ctx: &RequestContext) -> Response {
    page_error(
        Chrome::for_user(ctx),
        StatusCode::FORBIDDEN,
        "You do not have access to this page.",
    )
}

fn csrf_rejected(ctx: &RequestContext) -> Response {
    warn!(user = %ctx.user.email, "form rejected: bad CSRF token");
    page_error(
        Chrome::for_user(ctx),
        StatusCode::FORBIDDEN,
        "Your session token is invalid. Reload the page and try again.",
    )
}

/// An enabled program and its adapter, or `None` for unknown and disabled codes.
fn enabled_program(
    registry: &ProgramRegistry,
    raw: &str,
) -> Result<Option<(fedbd_core::Program, Arc<dyn ProgramAdapter>)>, AdapterError> {
    let Ok(Some(code)) = registry.normalize_code(raw) else {
        return Ok(None);
    };
    match registry.enabled_adapter(code) {
        Ok(adapter) => Ok(registry.program(code).map(|program| (program, adapter))),
        Err(AdapterError::Disabled(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

async fn login_page_handler() -> Response {
    render_html(LoginTemplate {
        chrome: Chrome::default(),
        error: String::new(),
        email: String::new(),
    })
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    let email = form.email.trim().to_ascii_lowercase();
    let user = match state.store.user_by_email(&email).await {
        Ok(user) => user,
        Err(err) => return server_error(err.into()),
    };
    let Some(user) = user.filter(|u| {
        auth::verify_password(&form.password, &u.password_salt, &u.password_hash)
    }) else {
        warn!(email = %email, "login failed");
        return render_html_with_status(
            StatusCode::UNAUTHORIZED,
            LoginTemplate {
                chrome: Chrome::default(),
                error: "Invalid email or password.".to_string(),
                email,
            },
        );
    };

    let session_id = auth::start_session(&state.sessions, &user);
    info!(user = %user.email, role = %user.role.as_str(), "login");
    let jar = jar.add(auth::session_cookie(session_id, state.config.is_production()));
    (jar, Redirect::to("/")).into_response()
}

#[derive(Debug, Deserialize)]
struct CsrfForm {
    #[serde(default)]
    csrf_token: String,
}

async fn logout_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    jar: CookieJar,
    Form(form): Form<CsrfForm>,
) -> Response {
    if !ctx.csrf_ok(Some(&form.csrf_token)) {
        return csrf_rejected(&ctx);
    }
    state.sessions.invalidate(&ctx.session_id);
    let jar = jar.remove(auth::expired_session_cookie());
    (jar, Redirect::to(auth::LOGIN_PATH)).into_response()
}

async fn index_handler(State(state): State<Arc<AppState>>, ctx: RequestContext) -> Response {
    let mut programs = Vec::new();
    for code in state.registry.enabled_codes() {
        let adapter = state.registry.adapter(code);
        let holders = match adapter.list_primes_or_holders(&state.store).await {
            Ok(holders) => holders.len(),
            Err(err) => return server_error(err.into()),
        };
        let opportunities = match state.store.count_opportunities(Some(code), None).await {
            Ok(n) => n,
            Err(err) => return server_error(err.into()),
        };
        programs.push(ProgramSummaryRow {
            code: code.as_str().to_string(),
            display_name: adapter.name().to_string(),
            holders,
            opportunities,
        });
    }
    let counts = async {
        let docs = state.store.count_research_docs(false).await?;
        let subscribers = state.store.count_subscribers(None, true).await?;
        let recent = state.store.research_docs(RECENT_DOCS_LIMIT).await?;
        Ok::<_, fedbd_storage::StoreError>((docs, subscribers, recent))
    };
    let (research_docs, subscribers, recent) = match counts.await {
        Ok(counts) => counts,
        Err(err) => return server_error(err.into()),
    };

    render_html(IndexTemplate {
        chrome: Chrome::for_user(&ctx),
        programs,
        research_docs,
        recent_docs: recent
            .into_iter()
            .map(|d| ResearchDocRow {
                title: d.title,
                source_url: d.source_url,
                doc_type: d.doc_type,
            })
            .collect(),
        subscribers,
        drive_configured: state.drive_configured(),
    })
}

async fn program_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    AxumPath(code): AxumPath<String>,
) -> Response {
    let chrome = Chrome::for_user(&ctx);
    let (program, adapter) = match enabled_program(&state.registry, &code) {
        Ok(Some(found)) => found,
        Ok(None) => return page_error(chrome, StatusCode::NOT_FOUND, "Program not found."),
        Err(err) => return server_error(err.into()),
    };

    let holders = match adapter.list_primes_or_holders(&state.store).await {
        Ok(holders) => holders,
        Err(err) => return server_error(err.into()),
    };
    let solicitations = match adapter.fetch_solicitations(&state.store).await {
        Ok(rows) => rows,
        Err(err) => return server_error(err.into()),
    };

    let fields = adapter.extra_fields();
    let holders = holders
        .into_iter()
        .map(|h| HolderRow {
            extras: fields
                .iter()
                .map(|f| f.read(&h.metadata).unwrap_or_default())
                .collect(),
            capabilities: h.capabilities.join(", "),
            id: h.id,
            name: h.name,
            full_name: h.full_name,
        })
        .collect();
    let opportunities = solicitations
        .into_iter()
        .map(|o| OpportunityRow {
            close_date: o.close_date.map(|d| d.to_string()).unwrap_or_default(),
            url: o.url.unwrap_or_default(),
            details: o
                .meta
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join("; "),
            opp_no: o.opp_no,
            title: o.title,
            agency: o.agency,
            status: o.status,
        })
        .collect();

    render_html(ProgramTemplate {
        chrome,
        code: program.code.as_str().to_string(),
        display_name: program.display_name,
        keywords: program.keywords.join(", "),
        extra_labels: fields.iter().map(|f| f.label().to_string()).collect(),
        holders,
        opportunities,
    })
}

async fn catalog_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    AxumPath((code, id)): AxumPath<(String, i64)>,
) -> Response {
    let chrome = Chrome::for_user(&ctx);
    let (program, adapter) = match enabled_program(&state.registry, &code) {
        Ok(Some(found)) => found,
        Ok(None) => return page_error(chrome, StatusCode::NOT_FOUND, "Program not found."),
        Err(err) => return server_error(err.into()),
    };
    let holders = match adapter.list_primes_or_holders(&state.store).await {
        Ok(holders) => holders,
        Err(err) => return server_error(err.into()),
    };
    let Some(holder) = holders.into_iter().find(|h| h.id == id) else {
        return page_error(chrome, StatusCode::NOT_FOUND, "Holder not found.");
    };
    (
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        render_micro_catalog(&program, adapter.as_ref(), &holder),
    )
        .into_response()
}

async fn settings_handler(State(state): State<Arc<AppState>>, ctx: RequestContext) -> Response {
    if !ctx.has_role(Role::Admin) {
        return forbidden(&ctx);
    }
    let programs = state
        .registry
        .programs()
        .into_iter()
        .map(|p| ToggleRow {
            code: p.code.as_str().to_string(),
            display_name: p.display_name,
            enabled: p.enabled,
            keywords: p.keywords.join(", "),
        })
        .collect();
    render_html(SettingsTemplate {
        chrome: Chrome::for_user(&ctx),
        programs,
    })
}

async fn toggle_program_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    AxumPath(code): AxumPath<String>,
    Form(form): Form<CsrfForm>,
) -> Response {
    if !ctx.has_role(Role::Admin) {
        return forbidden(&ctx);
    }
    if !ctx.csrf_ok(Some(&form.csrf_token)) {
        return csrf_rejected(&ctx);
    }
    let Some(code) = ProgramCode::parse_loose(&code) else {
        return page_error(Chrome::for_user(&ctx), StatusCode::NOT_FOUND, "Program not found.");
    };
    let enabled = !state.registry.is_enabled(code);
    if let Err(err) = state.store.set_program_enabled(code, enabled).await {
        return server_error(err.into());
    }
    state.registry.set_enabled(code, enabled);
    info!(program = %code, enabled, user = %ctx.user.email, "program toggled");
    Redirect::to("/settings/").into_response()
}

fn import_type_options(selected: Option<ImportType>) -> Vec<OptionRow> {
    ImportType::ALL
        .iter()
        .map(|t| OptionRow {
            value: t.as_str().to_string(),
            label: t.as_str().replace('_', " "),
            selected: Some(*t) == selected,
        })
        .collect()
}

async fn recent_import_rows(store: &PortalStore) -> Result<Vec<ImportRunRow>, fedbd_storage::StoreError> {
    Ok(store
        .recent_import_runs(RECENT_IMPORTS)
        .await?
        .into_iter()
        .map(|run| ImportRunRow {
            created_at: run.created_at.format("%Y-%m-%d %H:%M").to_string(),
            import_type: run.import_type,
            imported: run.imported,
            total_rows: run.total_rows,
            error_count: run.error_count,
        })
        .collect())
}

async fn render_import_page(
    state: &AppState,
    ctx: &RequestContext,
    status: StatusCode,
    selected: Option<ImportType>,
    notice: String,
    error: String,
    row_errors: Vec<String>,
) -> Response {
    let recent = match recent_import_rows(&state.store).await {
        Ok(rows) => rows,
        Err(err) => return server_error(err.into()),
    };
    render_html_with_status(
        status,
        ImportTemplate {
            chrome: Chrome::for_user(ctx),
            import_types: import_type_options(selected),
            notice,
            error,
            row_errors,
            recent,
        },
    )
}

async fn import_page_handler(State(state): State<Arc<AppState>>, ctx: RequestContext) -> Response {
    if !ctx.has_role(Role::Ops) {
        return forbidden(&ctx);
    }
    render_import_page(&state, &ctx, StatusCode::OK, None, String::new(), String::new(), Vec::new()).await
}

#[derive(Debug, Default)]
struct ImportForm {
    csrf_token: String,
    import_type: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

async fn read_import_form(mut multipart: Multipart) -> Result<ImportForm, String> {
    let mut form = ImportForm::default();
    while let Some(field) = multipart.next_field().await.map_err(|e| e.body_text())? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "csrf_token" => form.csrf_token = field.text().await.map_err(|e| e.body_text())?,
            "import_type" => form.import_type = field.text().await.map_err(|e| e.body_text())?,
            "file" => {
                form.content_type = field.content_type().map(str::to_string);
                form.bytes = field.bytes().await.map_err(|e| e.body_text())?.to_vec();
            }
            _ => {}
        }
    }
    Ok(form)
}

async fn import_submit_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    multipart: Multipart,
) -> Response {
    if !ctx.has_role(Role::Ops) {
        return forbidden(&ctx);
    }
    let form = match read_import_form(multipart).await {
        Ok(form) => form,
        Err(message) => {
            return render_import_page(&state, &ctx, StatusCode::BAD_REQUEST, None, String::new(), message, Vec::new())
                .await
        }
    };
    if !ctx.csrf_ok(Some(&form.csrf_token)) {
        return csrf_rejected(&ctx);
    }
    let import_type = match ImportType::from_str(&form.import_type) {
        Ok(t) => t,
        Err(err) => {
            return render_import_page(
                &state,
                &ctx,
                StatusCode::BAD_REQUEST,
                None,
                String::new(),
                err.to_string(),
                Vec::new(),
            )
            .await
        }
    };

    let upload = Upload {
        content_type: form.content_type.as_deref(),
        bytes: &form.bytes,
    };
    let result = CsvImporter::new(&state.store, &state.registry)
        .with_archive(&state.archive)
        .run(import_type, upload)
        .await;
    match result {
        Ok(summary) => {
            let notice = format!(
                "Imported {} of {} {} rows.",
                summary.imported,
                summary.total_rows,
                import_type.as_str().replace('_', " ")
            );
            render_import_page(&state, &ctx, StatusCode::OK, Some(import_type), notice, String::new(), summary.errors)
                .await
        }
        Err(err) => {
            render_import_page(
                &state,
                &ctx,
                StatusCode::BAD_REQUEST,
                Some(import_type),
                String::new(),
                err.to_string(),
                Vec::new(),
            )
            .await
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct TemplateQuery {
    #[serde(rename = "type", default)]
    import_type: String,
}

async fn import_template_handler(ctx: RequestContext, Query(query): Query<TemplateQuery>) -> Response {
    if !ctx.has_role(Role::Ops) {
        return forbidden(&ctx);
    }
    let import_type = match ImportType::from_str(&query.import_type) {
        Ok(t) => t,
        Err(err) => return page_error(Chrome::for_user(&ctx), StatusCode::BAD_REQUEST, err.to_string()),
    };
    let disposition = format!("attachment; filename=\"{}_template.csv\"", import_type.as_str());
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        template_csv(import_type),
    )
        .into_response()
}

#[derive(Debug, Deserialize, Default)]
struct ExportQuery {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    format: String,
    #[serde(default)]
    program: String,
}

fn program_options(registry: &ProgramRegistry, selected: Option<ProgramCode>) -> Vec<OptionRow> {
    registry
        .programs()
        .into_iter()
        .map(|p| OptionRow {
            value: p.code.as_str().to_string(),
            label: p.display_name,
            selected: Some(p.code) == selected,
        })
        .collect()
}

async fn analytics_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Query(query): Query<ExportQuery>,
) -> Response {
    let chrome = Chrome::for_user(&ctx);
    let program = match state.registry.normalize_code(&query.program) {
        Ok(program) => program,
        Err(err) => return page_error(chrome, StatusCode::BAD_REQUEST, err.to_string()),
    };
    let table = match build_export(&state.store, ExportKind::Summary, program).await {
        Ok(table) => table,
        Err(err) => return server_error(err.into()),
    };
    let outreach = match state.store.recent_outreach(RECENT_OUTREACH_LIMIT).await {
        Ok(records) => records
            .into_iter()
            .map(|r| OutreachRow {
                created_at: r.created_at.format("%Y-%m-%d %H:%M").to_string(),
                subject: r.subject,
                program: r
                    .program_code
                    .map(|c| c.display_name().to_string())
                    .unwrap_or_else(|| "All programs".to_string()),
                recipients: r.recipients,
                sent_by: r.sent_by,
            })
            .collect(),
        Err(err) => return server_error(err.into()),
    };
    render_html(AnalyticsTemplate {
        chrome,
        programs: program_options(&state.registry, program),
        program_query: program.map(|c| c.as_str().to_string()).unwrap_or_default(),
        export_kinds: ExportKind::ALL.iter().map(|k| k.as_str().to_string()).collect(),
        headers: table.headers,
        rows: table.rows,
        outreach,
    })
}

async fn analytics_export_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Query(query): Query<ExportQuery>,
) -> Response {
    let chrome = Chrome::for_user(&ctx);
    let kind = match ExportKind::from_str(&query.kind) {
        Ok(kind) => kind,
        Err(message) => return page_error(chrome, StatusCode::BAD_REQUEST, message),
    };
    let format = match ExportFormat::from_str(&query.format) {
        Ok(ExportFormat::Parquet) => {
            return page_error(
                chrome,
                StatusCode::BAD_REQUEST,
                "Parquet snapshots are written by the command-line exporter.",
            )
        }
        Ok(format) => format,
        Err(message) => return page_error(chrome, StatusCode::BAD_REQUEST, message),
    };
    let program = match state.registry.normalize_code(&query.program) {
        Ok(program) => program,
        Err(err) => return page_error(chrome, StatusCode::BAD_REQUEST, err.to_string()),
    };
    let table = match build_export(&state.store, kind, program).await {
        Ok(table) => table,
        Err(err) => return server_error(err.into()),
    };
    info!(kind = %kind, user = %ctx.user.email, "analytics export");

    match format {
        ExportFormat::Json => Json(to_json(&table)).into_response(),
        _ => {
            let filename = format!(
                "fedbd_{}_{}.csv",
                kind.as_str(),
                chrono::Utc::now().format("%Y%m%d")
            );
            (
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{filename}\""),
                    ),
                ],
                to_csv(&table),
            )
                .into_response()
        }
    }
}

async fn app_css_handler(State(state): State<Arc<AppState>>) -> Response {
    let css_path = state.config.workspace_root.join("assets/static/app.css");
    match tokio::fs::read_to_string(&css_path).await {
        Ok(css) => ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], css).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "/* missing app.css */").into_response(),
    }
}

async fn not_found_handler(uri: Uri) -> Response {
    if uri.path().starts_with("/api/") {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response();
    }
    (StatusCode::NOT_FOUND, Html("Not found".to_string())).into_response()
}
