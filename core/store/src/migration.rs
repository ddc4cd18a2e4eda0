use diary_schemas::{parse_date, DiaryRecord, RecordId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::database::{upsert_record, Database};
use crate::error::{Result, StoreError};

const LEGACY_DIR: &str = "diaries";
const LEGACY_FILE: &str = "diary_list.json";
const LEGACY_BACKUP_FILE: &str = "diary_list_backup.json";

/// Location of the flat JSON list written by the pre-SQLite app
#[derive(Debug, Clone)]
pub struct LegacySource {
    pub path: PathBuf,
    pub backup_path: PathBuf,
}

impl LegacySource {
    pub fn new(path: impl Into<PathBuf>, backup_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backup_path: backup_path.into(),
        }
    }

    /// `<data_dir>/diaries/diary_list.json`, backed up next to itself
    pub fn in_data_dir(data_dir: &Path) -> Self {
        let dir = data_dir.join(LEGACY_DIR);
        Self::new(dir.join(LEGACY_FILE), dir.join(LEGACY_BACKUP_FILE))
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn relocate(&self) -> Result<()> {
        if let Some(parent) = self.backup_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&self.path, &self.backup_path)?;
        Ok(())
    }
}

/// One entry of the legacy list. Every field is optional on decode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyDiary {
    pub id: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub date: Option<String>,
    pub create_time: Option<i64>,
    pub update_time: Option<i64>,
    pub mood: Option<String>,
    pub weather: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_reminder: Option<bool>,
    pub reminder_time: Option<i64>,
}

impl LegacyDiary {
    /// Convert to a record, keeping the original id and timestamps
    pub fn into_record(self) -> std::result::Result<DiaryRecord, String> {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| "missing id".to_string())?;

        let date_raw = self.date.unwrap_or_default();
        let date = parse_date(&date_raw)
            .ok_or_else(|| format!("invalid date '{}' on {}", date_raw, id))?;

        let created_at = self.create_time.or(self.update_time).unwrap_or(0);
        let reminder_at = self.reminder_time.unwrap_or(0);

        Ok(DiaryRecord {
            id: RecordId(id),
            title: self.title.unwrap_or_default(),
            body: self.content.unwrap_or_default(),
            date,
            created_at,
            updated_at: self.update_time.unwrap_or(created_at),
            mood: self.mood.filter(|m| !m.is_empty()),
            weather_note: self.weather.filter(|w| !w.is_empty()),
            tags: self.tags.unwrap_or_default(),
            reminder_enabled: self.is_reminder.unwrap_or(false) && reminder_at > 0,
            reminder_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The store already holds records; the legacy list is not consulted
    AlreadyPopulated { existing: usize },
    NoLegacySource,
    /// The legacy file could not be read or parsed; it stays in place
    Unreadable { reason: String },
    /// The legacy list was empty and has been relocated
    EmptyLegacy,
    Migrated { count: usize },
    /// Nothing was committed; the legacy file stays in place for a retry
    PartialFailure { failed_ids: Vec<String>, total: usize },
}

impl MigrationOutcome {
    /// True when a later run has nothing left to do
    pub fn is_settled(&self) -> bool {
        !matches!(
            self,
            MigrationOutcome::Unreadable { .. } | MigrationOutcome::PartialFailure { .. }
        )
    }
}

/// Move the legacy JSON list into the record store exactly once.
///
/// The whole batch is written in one transaction: either every record is
/// committed and the legacy file is relocated, or nothing is committed and
/// the file is left for the next start.
pub fn migrate_legacy(db: &Database, source: &LegacySource) -> Result<MigrationOutcome> {
    info!("Checking for legacy diary list at {}", source.path.display());

    let existing = db.count()?;
    if existing > 0 {
        info!("Store already holds {} records, skipping migration", existing);
        return Ok(MigrationOutcome::AlreadyPopulated { existing });
    }

    if !source.exists() {
        info!("No legacy diary list found, nothing to migrate");
        return Ok(MigrationOutcome::NoLegacySource);
    }

    let entries = match read_legacy(&source.path) {
        Ok(entries) => entries,
        Err(reason) => {
            error!("Legacy diary list is unreadable, leaving it in place: {}", reason);
            return Ok(MigrationOutcome::Unreadable { reason });
        }
    };

    if entries.is_empty() {
        info!("Legacy diary list is empty, relocating it");
        source.relocate()?;
        return Ok(MigrationOutcome::EmptyLegacy);
    }

    let total = entries.len();
    info!("Found {} legacy diary records to migrate", total);

    let tx = db
        .conn()
        .unchecked_transaction()
        .map_err(StoreError::WriteFailed)?;

    let mut failed_ids = Vec::new();
    for (index, entry) in entries.into_iter().enumerate() {
        let label = entry
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("#{}", index));

        match entry.into_record() {
            Ok(record) => {
                if let Err(e) = upsert_record(&tx, &record) {
                    warn!("Failed to migrate diary record {}: {}", label, e);
                    failed_ids.push(label);
                }
            }
            Err(reason) => {
                warn!("Skipping malformed legacy record {}: {}", label, reason);
                failed_ids.push(label);
            }
        }
    }

    if !failed_ids.is_empty() {
        tx.rollback().map_err(StoreError::WriteFailed)?;
        warn!(
            "Migration incomplete: {} of {} records failed ({}); legacy list retained",
            failed_ids.len(),
            total,
            failed_ids.join(", ")
        );
        return Ok(MigrationOutcome::PartialFailure { failed_ids, total });
    }

    tx.commit().map_err(StoreError::WriteFailed)?;

    // The store is now non-empty, so a failed rename cannot cause a re-import
    match source.relocate() {
        Ok(()) => info!(
            "Legacy diary list backed up to {}",
            source.backup_path.display()
        ),
        Err(e) => warn!("Failed to back up legacy diary list: {}", e),
    }

    info!("Migration complete: {} records", total);
    Ok(MigrationOutcome::Migrated { count: total })
}

fn read_legacy(path: &Path) -> std::result::Result<Vec<LegacyDiary>, String> {
    let raw = fs::read_to_string(path).map_err(|e| e.to_string())?;
    if raw.trim().is_empty() || raw.trim() == "null" {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw).map_err(|e| e.to_string())
}
