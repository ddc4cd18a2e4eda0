use anyhow::{Context, Result};
use axum::Router;
use diary_reminders::{InProcessTimer, LogNotifier, ReminderReceiver, ReminderScheduler};
use diary_schemas::{Clock, SystemClock};
use diary_store::{spawn_store, Database, MigrationOutcome, StoreHandle};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::api::{router, AppState};
use crate::config::ServiceConfig;

/// Fully wired service: store worker, scheduler and the HTTP router over them
pub struct App {
    state: AppState,
}

impl App {
    /// Open storage, import legacy data, restore reminders.
    ///
    /// Only a database that cannot be opened stops startup; migration and
    /// reminder restore problems are logged and skipped.
    pub async fn bootstrap(config: &ServiceConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

        let db_path = config.db_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let db = Database::new(&db_path)
            .with_context(|| format!("opening diary database at {}", db_path.display()))?;
        info!("Database initialized at: {}", db_path.display());

        // The worker thread exits once every handle is dropped
        let (store, _worker) = spawn_store(db).context("starting store worker")?;

        match store.migrate_legacy(config.legacy_source()).await {
            Ok(outcome) => log_migration(&outcome),
            Err(e) => warn!("Legacy migration failed, continuing: {}", e),
        }

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let receiver = Arc::new(ReminderReceiver::new(Arc::new(LogNotifier)));
        let timer = InProcessTimer::new(Handle::current(), clock.clone(), receiver)
            .with_exact_permitted(config.exact_alarms)
            .with_best_effort_slack(config.best_effort_slack());
        let scheduler = Arc::new(ReminderScheduler::new(Arc::new(timer), clock.clone()));

        if let Err(e) = scheduler.restore_from(&store).await {
            warn!("Could not restore reminders: {}", e);
        }

        Ok(Self::from_parts(store, scheduler, clock))
    }

    /// Assemble from already-built parts, skipping migration and restore
    pub fn from_parts(
        store: StoreHandle,
        scheduler: Arc<ReminderScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state: AppState {
                store,
                scheduler,
                clock,
            },
        }
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    pub async fn serve(self, config: &ServiceConfig) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(config.bind)
            .await
            .with_context(|| format!("binding {}", config.bind))?;
        info!("Starting HTTP server on http://{}", config.bind);

        axum::serve(listener, self.router())
            .await
            .context("serving HTTP")?;
        Ok(())
    }
}

fn log_migration(outcome: &MigrationOutcome) {
    match outcome {
        MigrationOutcome::AlreadyPopulated { existing } => {
            info!("Store already holds {} records, legacy import skipped", existing)
        }
        MigrationOutcome::NoLegacySource => info!("No legacy diary list found"),
        MigrationOutcome::EmptyLegacy => info!("Legacy diary list was empty"),
        MigrationOutcome::Migrated { count } => info!("Migrated {} legacy records", count),
        MigrationOutcome::PartialFailure { failed_ids, total } => warn!(
            "Legacy import rolled back: {} of {} records failed ({:?})",
            failed_ids.len(),
            total,
            failed_ids
        ),
        MigrationOutcome::Unreadable { reason } => {
            warn!("Legacy diary list unreadable, left in place: {}", reason)
        }
    }
}
