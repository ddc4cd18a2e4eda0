use chrono::NaiveDate;
use diary_schemas::{DiaryRecord, RecordId, DATE_FORMAT};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};

/// Current on-disk layout, stamped into `PRAGMA user_version`
pub const SCHEMA_VERSION: i64 = 1;

const RECORD_COLUMNS: &str = "id, title, body, date, created_at, updated_at, mood, weather_note,
     tags, reminder_enabled, reminder_at";

/// Columns that older layouts of the table may lack
const OPTIONAL_COLUMNS: &[(&str, &str)] = &[
    ("mood", "TEXT"),
    ("weather_note", "TEXT"),
    ("tags", "TEXT"),
    ("reminder_enabled", "INTEGER NOT NULL DEFAULT 0"),
    ("reminder_at", "INTEGER"),
];

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    pub schema_version: i64,
    pub record_count: usize,
    pub path: Option<String>,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the diary database and bring its schema up to date.
    ///
    /// Any failure here is fatal for startup.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            StoreError::StorageUnavailable(format!("cannot open {}: {}", path.display(), e))
        })?;

        let db = Self { conn };
        db.init_schema()
            .map_err(|e| StoreError::StorageUnavailable(format!("schema setup failed: {}", e)))?;

        info!("Database initialized at {}", path.display());
        Ok(db)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Check if a column exists in a table
    fn has_column(&self, table: &str, column: &str) -> rusqlite::Result<bool> {
        let query = format!("PRAGMA table_info({})", table);
        let mut stmt = self.conn.prepare(&query)?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(columns.iter().any(|c| c == column))
    }

    fn schema_version(&self) -> rusqlite::Result<i64> {
        self.conn.query_row("PRAGMA user_version", [], |row| row.get(0))
    }

    /// Create the diaries table and its indexes
    fn init_schema(&self) -> std::result::Result<(), String> {
        let version = self.schema_version().map_err(|e| e.to_string())?;
        if version > SCHEMA_VERSION {
            return Err(format!(
                "database schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            ));
        }

        let journal_mode: String = self
            .conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| e.to_string())?;
        debug!("Journal mode: {}", journal_mode);

        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| e.to_string())?;

        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS diaries (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    body TEXT NOT NULL,
                    date TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    mood TEXT,
                    weather_note TEXT,
                    tags TEXT,
                    reminder_enabled INTEGER NOT NULL DEFAULT 0,
                    reminder_at INTEGER
                )",
                [],
            )
            .map_err(|e| e.to_string())?;

        // Tables written by earlier builds may predate the optional columns
        for (column, decl) in OPTIONAL_COLUMNS {
            if !self.has_column("diaries", column).map_err(|e| e.to_string())? {
                info!("Adding missing column diaries.{}", column);
                self.conn
                    .execute(
                        &format!("ALTER TABLE diaries ADD COLUMN {} {}", column, decl),
                        [],
                    )
                    .map_err(|e| e.to_string())?;
            }
        }

        self.conn
            .execute(
                "CREATE INDEX IF NOT EXISTS idx_diaries_date ON diaries(date)",
                [],
            )
            .map_err(|e| e.to_string())?;

        self.conn
            .execute(
                "CREATE INDEX IF NOT EXISTS idx_diaries_created_at ON diaries(created_at DESC)",
                [],
            )
            .map_err(|e| e.to_string())?;

        if version < SCHEMA_VERSION {
            self.conn
                .pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(|e| e.to_string())?;
            info!("Schema upgraded from version {} to {}", version, SCHEMA_VERSION);
        }

        debug!("Database schema initialized");
        Ok(())
    }

    /// Insert or fully replace a record by id
    pub fn put(&self, record: &DiaryRecord) -> Result<()> {
        upsert_record(&self.conn, record).map_err(StoreError::WriteFailed)?;
        debug!("Saved diary record: {}", record.id);
        Ok(())
    }

    /// Remove a record; returns whether a row was removed
    pub fn delete(&self, id: &RecordId) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM diaries WHERE id = ?1", params![id.as_str()])
            .map_err(StoreError::WriteFailed)?;

        if removed > 0 {
            debug!("Deleted diary record: {}", id);
        } else {
            debug!("Delete of unknown diary record {} ignored", id);
        }
        Ok(removed > 0)
    }

    pub fn get_by_id(&self, id: &RecordId) -> Result<Option<DiaryRecord>> {
        let query = format!("SELECT {} FROM diaries WHERE id = ?1", RECORD_COLUMNS);
        self.conn
            .query_row(&query, params![id.as_str()], row_to_record)
            .optional()
            .map_err(StoreError::ReadFailed)
    }

    /// All records, newest `created_at` first
    pub fn list_all(&self) -> Result<Vec<DiaryRecord>> {
        let query = format!(
            "SELECT {} FROM diaries ORDER BY created_at DESC, id DESC",
            RECORD_COLUMNS
        );
        self.collect_records(&query, params![])
    }

    /// Records whose `date` lies within `[start, end]`, newest `created_at` first
    pub fn list_by_date_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DiaryRecord>> {
        let query = format!(
            "SELECT {} FROM diaries
             WHERE date >= ?1 AND date <= ?2
             ORDER BY created_at DESC, id DESC",
            RECORD_COLUMNS
        );
        self.collect_records(
            &query,
            params![
                start.format(DATE_FORMAT).to_string(),
                end.format(DATE_FORMAT).to_string()
            ],
        )
    }

    /// Case-insensitive substring search over title, body and tags.
    ///
    /// SQLite's `LIKE` only folds ASCII, so matching happens on decoded records.
    pub fn search(&self, keyword: &str) -> Result<Vec<DiaryRecord>> {
        let records = self.list_all()?;
        if keyword.trim().is_empty() {
            return Ok(records);
        }

        let matches: Vec<DiaryRecord> = records
            .into_iter()
            .filter(|record| record.matches_keyword(keyword))
            .collect();
        debug!("Search '{}' matched {} records", keyword, matches.len());
        Ok(matches)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM diaries", [], |row| row.get(0))
            .map_err(StoreError::ReadFailed)?;
        Ok(count as usize)
    }

    /// Delete every record; returns the number removed
    pub fn clear_all(&self) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM diaries", [])
            .map_err(StoreError::WriteFailed)?;
        info!("Cleared {} diary records", removed);
        Ok(removed)
    }

    pub fn info(&self) -> Result<DatabaseInfo> {
        Ok(DatabaseInfo {
            schema_version: self.schema_version().map_err(StoreError::ReadFailed)?,
            record_count: self.count()?,
            path: self.conn.path().map(|p| p.to_string()),
        })
    }

    fn collect_records(
        &self,
        query: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<DiaryRecord>> {
        let mut stmt = self.conn.prepare(query).map_err(StoreError::ReadFailed)?;
        let records = stmt
            .query_map(params, row_to_record)
            .map_err(StoreError::ReadFailed)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::ReadFailed)?;
        Ok(records)
    }
}

/// Upsert with total-replace semantics; shared by `put` and the migration batch
pub(crate) fn upsert_record(conn: &Connection, record: &DiaryRecord) -> rusqlite::Result<()> {
    let tags_json = serde_json::to_string(&record.tags)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    conn.execute(
        "INSERT INTO diaries (id, title, body, date, created_at, updated_at, mood,
                              weather_note, tags, reminder_enabled, reminder_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
             title = excluded.title,
             body = excluded.body,
             date = excluded.date,
             created_at = excluded.created_at,
             updated_at = excluded.updated_at,
             mood = excluded.mood,
             weather_note = excluded.weather_note,
             tags = excluded.tags,
             reminder_enabled = excluded.reminder_enabled,
             reminder_at = excluded.reminder_at",
        params![
            record.id.as_str(),
            record.title,
            record.body,
            record.date.format(DATE_FORMAT).to_string(),
            record.created_at,
            record.updated_at,
            record.mood,
            record.weather_note,
            tags_json,
            record.reminder_enabled,
            record.reminder_at,
        ],
    )?;
    Ok(())
}

fn row_to_record(row: &Row) -> rusqlite::Result<DiaryRecord> {
    let id: String = row.get(0)?;

    let date_raw: String = row.get(3)?;
    let date = NaiveDate::parse_from_str(&date_raw, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    let tags = match row.get::<_, Option<String>>(8)? {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Unreadable tags on diary record {}: {}", id, e);
            Vec::new()
        }),
        _ => Vec::new(),
    };

    Ok(DiaryRecord {
        id: RecordId(id),
        title: row.get(1)?,
        body: row.get(2)?,
        date,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        mood: row.get(6)?,
        weather_note: row.get(7)?,
        tags,
        reminder_enabled: row.get::<_, Option<bool>>(9)?.unwrap_or(false),
        reminder_at: row.get::<_, Option<i64>>(10)?.unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use diary_schemas::parse_date;
    use tempfile::TempDir;

    fn open() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("diary.db")).unwrap();
        (dir, db)
    }

    fn record(id: &str, date: &str, created_at: i64) -> DiaryRecord {
        DiaryRecord {
            id: RecordId::from(id),
            title: format!("Entry {}", id),
            body: "Walked to the market".to_string(),
            date: parse_date(date).unwrap(),
            created_at,
            updated_at: created_at,
            mood: Some("calm".to_string()),
            weather_note: None,
            tags: vec!["errands".to_string()],
            reminder_enabled: false,
            reminder_at: 0,
        }
    }

    #[test]
    fn test_database_creation() {
        let (_dir, db) = open();
        assert_eq!(db.count().unwrap(), 0);

        let info = db.info().unwrap();
        assert_eq!(info.schema_version, SCHEMA_VERSION);
        assert_eq!(info.record_count, 0);
    }

    #[test]
    fn test_put_and_get_round_trip() {
        let (_dir, db) = open();
        let mut entry = record("a1", "2024-05-01", 10);
        entry.weather_note = Some("Light rain".to_string());
        entry.reminder_enabled = true;
        entry.reminder_at = 1_714_560_000_000;

        db.put(&entry).unwrap();
        assert_eq!(db.get_by_id(&entry.id).unwrap(), Some(entry));
    }

    #[test]
    fn test_put_replaces_whole_record() {
        let (_dir, db) = open();
        let original = record("a1", "2024-05-01", 10);
        db.put(&original).unwrap();

        let mut replacement = original.clone();
        replacement.title = "Rewritten".to_string();
        replacement.mood = None;
        replacement.tags.clear();
        replacement.updated_at = 20;
        db.put(&replacement).unwrap();

        assert_eq!(db.count().unwrap(), 1);
        assert_eq!(db.get_by_id(&original.id).unwrap(), Some(replacement));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_dir, db) = open();
        let entry = record("a1", "2024-05-01", 10);
        db.put(&entry).unwrap();

        assert!(db.delete(&entry.id).unwrap());
        assert_eq!(db.get_by_id(&entry.id).unwrap(), None);
        assert!(!db.delete(&entry.id).unwrap());
    }

    #[test]
    fn test_list_all_orders_by_created_desc() {
        let (_dir, db) = open();
        db.put(&record("old", "2024-05-03", 1)).unwrap();
        db.put(&record("new", "2024-05-01", 3)).unwrap();
        db.put(&record("mid", "2024-05-02", 2)).unwrap();

        let ids: Vec<String> = db.list_all().unwrap().into_iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_single_day_range_equals_date_filter() {
        let (_dir, db) = open();
        db.put(&record("a", "2024-05-01", 1)).unwrap();
        db.put(&record("b", "2024-05-02", 2)).unwrap();
        db.put(&record("c", "2024-05-01", 3)).unwrap();
        db.put(&record("d", "2024-04-30", 4)).unwrap();

        for day in ["2024-05-01", "2024-05-02", "2024-04-30", "2024-06-01"] {
            let d = parse_date(day).unwrap();
            let expected: Vec<DiaryRecord> = db
                .list_all()
                .unwrap()
                .into_iter()
                .filter(|r| r.date == d)
                .collect();
            assert_eq!(db.list_by_date_range(d, d).unwrap(), expected);
        }
    }

    #[test]
    fn test_range_bounds_are_inclusive() {
        let (_dir, db) = open();
        db.put(&record("first", "2024-05-01", 1)).unwrap();
        db.put(&record("last", "2024-05-31", 2)).unwrap();
        db.put(&record("before", "2024-04-30", 3)).unwrap();
        db.put(&record("after", "2024-06-01", 4)).unwrap();

        let found = db
            .list_by_date_range(parse_date("2024-05-01").unwrap(), parse_date("2024-05-31").unwrap())
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["last", "first"]);
    }

    #[test]
    fn test_search_covers_title_body_and_tags() {
        let (_dir, db) = open();
        let mut a = record("a", "2024-05-01", 1);
        a.title = "Trip to Kyoto".to_string();
        let mut b = record("b", "2024-05-02", 2);
        b.body = "Long day at the OFFICE".to_string();
        let mut c = record("c", "2024-05-03", 3);
        c.tags = vec!["Reading".to_string()];
        for r in [&a, &b, &c] {
            db.put(r).unwrap();
        }

        assert_eq!(db.search("kyoto").unwrap(), vec![a]);
        assert_eq!(db.search("office").unwrap(), vec![b]);
        assert_eq!(db.search("READ").unwrap(), vec![c]);
        assert!(db.search("nothing like this").unwrap().is_empty());
        assert_eq!(db.search("").unwrap(), db.list_all().unwrap());
    }

    #[test]
    fn test_tag_search_does_not_match_json_punctuation() {
        let (_dir, db) = open();
        db.put(&record("a", "2024-05-01", 1)).unwrap();
        assert!(db.search("\",\"").unwrap().is_empty());
    }

    #[test]
    fn test_nullable_columns_decode_to_defaults() {
        let (_dir, db) = open();
        db.conn()
            .execute(
                "INSERT INTO diaries (id, title, body, date, created_at, updated_at)
                 VALUES ('raw', 't', 'b', '2024-05-01', 5, 6)",
                [],
            )
            .unwrap();
        db.conn()
            .execute(
                "INSERT INTO diaries (id, title, body, date, created_at, updated_at, tags)
                 VALUES ('bad-tags', 't', 'b', '2024-05-01', 7, 7, 'not json')",
                [],
            )
            .unwrap();

        let raw = db.get_by_id(&RecordId::from("raw")).unwrap().unwrap();
        assert_eq!(raw.mood, None);
        assert!(raw.tags.is_empty());
        assert!(!raw.reminder_enabled);
        assert_eq!(raw.reminder_at, 0);

        let bad = db.get_by_id(&RecordId::from("bad-tags")).unwrap().unwrap();
        assert!(bad.tags.is_empty());
    }

    #[test]
    fn test_reopen_keeps_records_and_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("diary.db");
        {
            let db = Database::new(&path).unwrap();
            db.put(&record("a1", "2024-05-01", 1)).unwrap();
        }

        let db = Database::new(&path).unwrap();
        assert_eq!(db.count().unwrap(), 1);
        assert_eq!(db.info().unwrap().schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_old_layout_gains_missing_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("diary.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE diaries (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    body TEXT NOT NULL,
                    date TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                INSERT INTO diaries VALUES ('legacy', 't', 'b', '2024-01-02', 1, 1);",
            )
            .unwrap();
        }

        let db = Database::new(&path).unwrap();
        let legacy = db.get_by_id(&RecordId::from("legacy")).unwrap().unwrap();
        assert!(legacy.tags.is_empty());
        assert!(!legacy.reminder_enabled);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("diary.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
                .unwrap();
        }

        match Database::new(&path) {
            Err(StoreError::StorageUnavailable(_)) => {}
            other => panic!("expected StorageUnavailable, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unopenable_path_is_storage_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("nested").join("diary.db");
        assert!(matches!(
            Database::new(&path),
            Err(StoreError::StorageUnavailable(_))
        ));
    }

    #[test]
    fn test_clear_all() {
        let (_dir, db) = open();
        db.put(&record("a", "2024-05-01", 1)).unwrap();
        db.put(&record("b", "2024-05-02", 2)).unwrap();

        assert_eq!(db.clear_all().unwrap(), 2);
        assert_eq!(db.count().unwrap(), 0);
    }
}
