use clap::{ArgAction, Parser};
use diary_store::LegacySource;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DB_FILE_NAME: &str = "my_diary_app.db";

/// Runtime configuration; every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "diary-service")]
#[command(about = "Diary record store and reminder scheduler behind a local HTTP API")]
pub struct ServiceConfig {
    /// App data directory (database and legacy list live here)
    #[arg(long, env = "DIARY_DATA_DIR", default_value = "./diary-data")]
    pub data_dir: PathBuf,

    /// SQLite database file (defaults to <data-dir>/my_diary_app.db)
    #[arg(long, env = "DIARY_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// HTTP listen address
    #[arg(long, env = "DIARY_BIND", default_value = "127.0.0.1:21960")]
    pub bind: SocketAddr,

    /// Whether exact reminder delivery is permitted
    #[arg(long, env = "DIARY_EXACT_ALARMS", default_value_t = true, action = ArgAction::Set)]
    pub exact_alarms: bool,

    /// Extra delay for best-effort reminders, in seconds
    #[arg(long, env = "DIARY_BEST_EFFORT_SLACK_SECS", default_value_t = 60)]
    pub best_effort_slack_secs: u64,

    /// Log filter directive, e.g. "info" or "diary_store=debug"
    #[arg(long, env = "DIARY_LOG", default_value = "info")]
    pub log: String,
}

impl ServiceConfig {
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DB_FILE_NAME))
    }

    pub fn legacy_source(&self) -> LegacySource {
        LegacySource::in_data_dir(&self.data_dir)
    }

    pub fn best_effort_slack(&self) -> Duration {
        Duration::from_secs(self.best_effort_slack_secs)
    }
}
