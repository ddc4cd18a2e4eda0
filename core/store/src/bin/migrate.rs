/// Migration Binary - Imports the legacy flat JSON diary list into the SQLite store
///
/// Usage:
///   cargo run --bin migrate -- --data-dir <dir>
///   cargo run --bin migrate -- --db-path <file> --legacy <json> [--backup <json>]
///
/// Options:
///   --data-dir: App data directory; derives the database and legacy paths
///   --db-path:  Path to SQLite database (defaults to <data-dir>/my_diary_app.db)
///   --legacy:   Legacy list (defaults to <data-dir>/diaries/diary_list.json)
///   --backup:   Where the legacy list is moved after a complete import

use anyhow::{Context, Result};
use clap::Parser;
use diary_store::{migrate_legacy, Database, LegacySource, MigrationOutcome};
use std::path::PathBuf;
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "migrate")]
#[command(about = "Import the legacy JSON diary list into the SQLite record store")]
struct Args {
    /// App data directory
    #[arg(long, default_value = "./diary-data")]
    data_dir: PathBuf,

    /// Path to SQLite database file
    #[arg(long, short)]
    db_path: Option<PathBuf>,

    /// Path to the legacy JSON list
    #[arg(long)]
    legacy: Option<PathBuf>,

    /// Backup location for the legacy list
    #[arg(long)]
    backup: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("Diary Store - Legacy Migration Tool v0.1.0");

    let args = Args::parse();

    let db_path = args
        .db_path
        .unwrap_or_else(|| args.data_dir.join("my_diary_app.db"));

    let defaults = LegacySource::in_data_dir(&args.data_dir);
    let legacy_path = args.legacy.unwrap_or(defaults.path);
    let backup_path = args.backup.unwrap_or_else(|| {
        legacy_path
            .parent()
            .map(|dir| dir.join("diary_list_backup.json"))
            .unwrap_or(defaults.backup_path)
    });
    let source = LegacySource::new(legacy_path, backup_path);

    info!("Database: {}", db_path.display());
    info!("Legacy list: {}", source.path.display());

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let db = Database::new(&db_path).context("opening diary database")?;
    let outcome = migrate_legacy(&db, &source).context("running legacy migration")?;

    info!("─────────────────────────────────────────────────");
    match &outcome {
        MigrationOutcome::AlreadyPopulated { existing } => {
            info!("Store already holds {} records; nothing to do", existing)
        }
        MigrationOutcome::NoLegacySource => info!("No legacy list found; nothing to do"),
        MigrationOutcome::EmptyLegacy => info!("Legacy list was empty and has been moved aside"),
        MigrationOutcome::Migrated { count } => {
            info!("✓ Migrated {} records", count);
            info!("  Backup: {}", source.backup_path.display());
        }
        MigrationOutcome::PartialFailure { failed_ids, total } => {
            warn!(
                "⚠ {} of {} records could not be migrated; nothing was committed",
                failed_ids.len(),
                total
            );
            for id in failed_ids {
                warn!("  failed: {}", id);
            }
        }
        MigrationOutcome::Unreadable { reason } => warn!("⚠ Legacy list unreadable: {}", reason),
    }

    if !outcome.is_settled() {
        anyhow::bail!("migration did not complete; the legacy list was left in place");
    }

    Ok(())
}
