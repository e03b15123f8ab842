use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use request_desk::audit::{export_records, AuditFilter, AuditStore, ExportFormat, ExportOptions, SqliteAuditStore};
use request_desk::authz::PolicyCatalog;
use request_desk::jwt::JwtConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "request-desk admin tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Print a signed bearer token for local testing
    IssueToken {
        #[arg(long)]
        user_id: Option<Uuid>,
        #[arg(long = "role")]
        roles: Vec<String>,
    },
    /// Parse a policy catalog file (or the built-in one) and list its roles
    CheckCatalog { path: Option<PathBuf> },
    /// Delete audit records older than the retention window
    Cleanup {
        #[arg(long)]
        retention_days: i64,
    },
    /// Write every audit record to a file
    Export {
        #[arg(long, default_value = "json")]
        format: ExportFormat,
        #[arg(long)]
        out: PathBuf,
    },
    /// Report audit records whose digest no longer matches their content
    Verify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if dotenv().is_err() {
        let crate_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::IssueToken { user_id, roles } => {
            let jwt = JwtConfig::from_env()?;
            let user_id = user_id.unwrap_or_else(Uuid::new_v4);
            let token = jwt.encode(user_id, roles)?;
            println!("user_id: {user_id}");
            println!("{token}");
        }
        Commands::CheckCatalog { path } => {
            let catalog = PolicyCatalog::load(path.as_deref())?;
            println!("super admin role: {}", catalog.super_admin_role());
            for name in catalog.role_names() {
                let mut permissions: Vec<String> = catalog
                    .permissions_for(name)
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                permissions.sort();
                println!("{:<16} {}", name, permissions.join(", "));
            }
        }
        Commands::Cleanup { retention_days } => {
            let store = SqliteAuditStore::new(get_pool().await?);
            let deleted = store.cleanup(retention_days).await?;
            println!("Deleted {deleted} audit records");
        }
        Commands::Export { format, out } => {
            let store = SqliteAuditStore::new(get_pool().await?);
            let artifact = export_records(&store, &AuditFilter::default(), format, ExportOptions::default()).await?;
            std::fs::write(&out, &artifact.bytes)
                .with_context(|| format!("failed to write export to {}", out.display()))?;
            println!("Exported {} records to {}", artifact.record_count, out.display());
        }
        Commands::Verify => {
            let store = SqliteAuditStore::new(get_pool().await?);
            let tampered = store.verify().await?;
            if tampered.is_empty() {
                println!("All audit records intact");
            } else {
                for id in &tampered {
                    println!("digest mismatch: {id}");
                }
                anyhow::bail!("{} audit records failed verification", tampered.len());
            }
        }
    }

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let db_applied = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
        .fetch_optional(pool)
        .await?;
    let applied_versions: HashSet<i64> = if db_applied.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) { "applied" } else { "pending" };
        let desc = migration.description.trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Prefer ./migrations when run from the repo root, else the crate-local folder.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}
