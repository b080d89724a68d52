use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use fedbd_adapters::ProgramRegistry;
use fedbd_core::{ImportType, PortalConfig, Role};
use fedbd_pipeline::{
    build_export, ingest_solicitations, maybe_build_scheduler, to_csv, to_json, write_micro_catalogs,
    write_parquet_snapshot, CsvImporter, DriveClient, DriveSync, DriveSyncOutcome, ExportFormat, ExportKind, GoogleDriveClient,
    Upload,
};
use fedbd_storage::{InsertOutcome, NewUser, PortalStore, UploadArchive};
use fedbd_web::{auth, AppState};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "fedbd-cli")]
#[command(about = "Federal BD portal command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the web portal (and the Drive sync scheduler when enabled).
    Serve,
    /// Apply the schema and seed the program catalog.
    Migrate,
    /// Bulk-import a CSV file.
    Import {
        #[arg(long = "type")]
        import_type: String,
        file: PathBuf,
    },
    /// Load a JSON solicitation feed through the program's adapter.
    Ingest {
        #[arg(long)]
        program: String,
        file: PathBuf,
    },
    /// Export analytics as CSV, JSON or a Parquet snapshot.
    Export {
        #[arg(long = "type", default_value = "summary")]
        kind: String,
        #[arg(long, default_value = "csv")]
        format: String,
        #[arg(long)]
        program: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Pull the configured Drive folder into research docs.
    DriveSync,
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "viewer")]
        role: String,
        #[arg(long)]
        password: String,
    },
    /// Write Markdown micro-catalogs for every prime of a program.
    Catalog {
        #[arg(long)]
        program: String,
    },
}

fn init_tracing(loglevel: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(loglevel));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_level(true)
                .with_target(false),
        )
        .init();
}

async fn open_store(config: &PortalConfig) -> Result<PortalStore> {
    let store = PortalStore::connect(&config.database_url, config.db_max_connections)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;
    store.migrate().await.context("applying schema")?;
    Ok(store)
}

async fn open_registry(config: &PortalConfig, store: &PortalStore) -> Result<ProgramRegistry> {
    let registry = ProgramRegistry::load(&config.workspace_root).await?;
    registry
        .sync_with_store(store)
        .await
        .context("applying saved program toggles")?;
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    let config = PortalConfig::from_env()?;
    init_tracing(&config.loglevel);

    let missing = config.missing_required();
    if !missing.is_empty() {
        warn!(missing = %missing.join(", "), app_env = %config.app_env, "required configuration keys are missing");
    }
    config.ensure_required()?;
    debug!(config = ?config.redacted(), "configuration loaded");

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let state = AppState::bootstrap(config.clone()).await?;
            let scheduler = maybe_build_scheduler(&config, state.store.clone(), state.drive.clone()).await?;
            if let Some(scheduler) = &scheduler {
                scheduler.start().await.context("starting scheduler")?;
                info!(cron = %config.drive_sync_cron, "drive sync scheduler started");
            }
            fedbd_web::serve(state).await?;
        }
        Commands::Migrate => {
            let store = open_store(&config).await?;
            open_registry(&config, &store).await?;
            println!("migrate complete: database={}", config.database_url);
        }
        Commands::Import { import_type, file } => {
            let import_type = ImportType::from_str(&import_type).map_err(|e| anyhow!(e))?;
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let store = open_store(&config).await?;
            let registry = open_registry(&config, &store).await?;
            let archive = UploadArchive::new(config.artifacts_dir.join("uploads"));
            let summary = CsvImporter::new(&store, &registry)
                .with_archive(&archive)
                .run(
                    import_type,
                    Upload {
                        content_type: Some("text/csv"),
                        bytes: &bytes,
                    },
                )
                .await?;
            println!(
                "import complete: type={} imported={} total_rows={} errors={}",
                summary.import_type,
                summary.imported,
                summary.total_rows,
                summary.error_count()
            );
            for error in &summary.errors {
                println!("  {error}");
            }
        }
        Commands::Ingest { program, file } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let payload: serde_json::Value =
                serde_json::from_str(&text).with_context(|| format!("parsing {}", file.display()))?;
            let store = open_store(&config).await?;
            let registry = open_registry(&config, &store).await?;
            let code = registry.resolve(&program)?;
            let summary = ingest_solicitations(&store, &registry, code, &payload).await?;
            println!(
                "ingest complete: program={} imported={} total_records={} errors={}",
                summary.program,
                summary.imported,
                summary.total_records,
                summary.errors.len()
            );
            for error in &summary.errors {
                println!("  {error}");
            }
        }
        Commands::Export {
            kind,
            format,
            program,
            out,
        } => {
            let kind = ExportKind::from_str(&kind).map_err(|e| anyhow!(e))?;
            let format = ExportFormat::from_str(&format).map_err(|e| anyhow!(e))?;
            let store = open_store(&config).await?;
            let registry = open_registry(&config, &store).await?;
            let program = registry.normalize_code(program.as_deref().unwrap_or_default())?;
            let table = build_export(&store, kind, program).await?;

            match format {
                ExportFormat::Parquet => {
                    let dir = out.unwrap_or_else(|| {
                        config
                            .artifacts_dir
                            .join("snapshots")
                            .join(chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string())
                    });
                    let manifest = write_parquet_snapshot(&table, &dir)?;
                    println!("export complete: manifest={}", manifest.display());
                }
                ExportFormat::Csv | ExportFormat::Json => {
                    let body = match format {
                        ExportFormat::Json => serde_json::to_string_pretty(&to_json(&table))?,
                        _ => to_csv(&table),
                    };
                    match out {
                        Some(path) => {
                            tokio::fs::write(&path, body)
                                .await
                                .with_context(|| format!("writing {}", path.display()))?;
                            println!("export complete: {}", path.display());
                        }
                        None => print!("{body}"),
                    }
                }
            }
        }
        Commands::DriveSync => {
            let Some(folder_id) = config.google_drive_folder_id.clone() else {
                bail!("Drive sync is not configured: set GOOGLE_DRIVE_FOLDER_ID");
            };
            let Some(client) = GoogleDriveClient::from_config(&config)? else {
                bail!("Drive sync is not configured: set GOOGLE_DRIVE_ACCESS_TOKEN");
            };
            let client: Arc<dyn DriveClient> = Arc::new(client);
            let store = open_store(&config).await?;
            let outcome = DriveSync::new(store, client, folder_id, config.drive_sync_cooldown_secs)
                .run()
                .await?;
            match outcome {
                DriveSyncOutcome::Completed { created, updated } => {
                    println!("drive sync complete: created={created} updated={updated}");
                }
                DriveSyncOutcome::CoolingDown { retry_after_secs } => {
                    println!("drive sync skipped: retry in {retry_after_secs}s");
                }
            }
        }
        Commands::CreateUser {
            email,
            name,
            role,
            password,
        } => {
            let role = Role::from_str(&role).map_err(|e| anyhow!(e))?;
            if password.len() < 8 {
                bail!("password must be at least 8 characters");
            }
            let email = email.trim().to_ascii_lowercase();
            let store = open_store(&config).await?;
            let salt = auth::new_salt();
            let outcome = store
                .create_user(&NewUser {
                    email: email.clone(),
                    display_name: name,
                    role,
                    password_hash: auth::hash_password(&password, &salt),
                    password_salt: salt,
                })
                .await?;
            match outcome {
                InsertOutcome::Inserted(id) => {
                    println!("user created: id={id} email={email} role={}", role.as_str())
                }
                InsertOutcome::Duplicate => bail!("user {email} already exists"),
            }
        }
        Commands::Catalog { program } => {
            let store = open_store(&config).await?;
            let registry = open_registry(&config, &store).await?;
            let code = registry.resolve(&program)?;
            let program = registry
                .program(code)
                .with_context(|| format!("program {code} is not registered"))?;
            let adapter = registry.adapter(code);
            let holders = adapter.list_primes_or_holders(&store).await?;
            let written =
                write_micro_catalogs(&config.workspace_root, &program, adapter.as_ref(), &holders).await?;
            println!("catalog complete: program={code} files={}", written.len());
        }
    }

    Ok(())
}
