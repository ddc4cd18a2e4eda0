use diary_schemas::{parse_date, DiaryRecord, RecordId, ViewMode};
use diary_store::{spawn_store, Database, DiaryQuery, LegacySource, MigrationOutcome};
use std::fs;
use tempfile::TempDir;

const LEGACY_LIST: &str = r#"[
  {
    "id": "1715760000000",
    "title": "First entry",
    "content": "Moved into the new flat",
    "date": "2024-05-15",
    "createTime": 1715760000000,
    "updateTime": 1715763600000,
    "mood": "happy",
    "weather": "",
    "tags": ["home", "move"],
    "isReminder": true,
    "reminderTime": 1715850000000
  },
  {
    "id": "1715846400000",
    "title": "Second entry",
    "content": "Unpacking",
    "date": "2024-05-16",
    "createTime": 1715846400000,
    "updateTime": 1715846400000,
    "isReminder": false,
    "reminderTime": 0
  }
]"#;

fn write_legacy(data_dir: &std::path::Path, contents: &str) -> LegacySource {
    let source = LegacySource::in_data_dir(data_dir);
    fs::create_dir_all(source.path.parent().unwrap()).unwrap();
    fs::write(&source.path, contents).unwrap();
    source
}

#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("my_diary_app.db");

    let record = DiaryRecord {
        id: RecordId::from("keep"),
        title: "Persisted".to_string(),
        body: "Still here after a restart".to_string(),
        date: parse_date("2024-05-15").unwrap(),
        created_at: 10,
        updated_at: 20,
        mood: Some("calm".to_string()),
        weather_note: Some("drizzle".to_string()),
        tags: vec!["a".to_string(), "b".to_string()],
        reminder_enabled: true,
        reminder_at: 1_000,
    };

    {
        let db = Database::new(&path).unwrap();
        db.put(&record).unwrap();
    }

    let db = Database::new(&path).unwrap();
    assert_eq!(db.get_by_id(&record.id).unwrap(), Some(record));
    assert_eq!(db.info().unwrap().record_count, 1);
}

#[tokio::test]
async fn test_startup_migration_then_restart_is_noop() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("my_diary_app.db");
    let source = write_legacy(dir.path(), LEGACY_LIST);

    // First start: import through the worker, as the service does
    {
        let (store, _join) = spawn_store(Database::new(&path).unwrap()).unwrap();
        let outcome = store.migrate_legacy(source.clone()).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::Migrated { count: 2 });

        let first = store
            .get_by_id(RecordId::from("1715760000000"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.body, "Moved into the new flat");
        assert_eq!(first.created_at, 1715760000000);
        assert_eq!(first.updated_at, 1715763600000);
        assert_eq!(first.mood.as_deref(), Some("happy"));
        assert_eq!(first.weather_note, None);
        assert!(first.reminder_enabled);
        assert_eq!(first.reminder_at, 1715850000000);

        let second = store
            .get_by_id(RecordId::from("1715846400000"))
            .await
            .unwrap()
            .unwrap();
        assert!(!second.reminder_enabled);
    }

    assert!(!source.exists());
    assert!(source.backup_path.is_file());

    // A stray legacy file appearing later must not be imported again
    write_legacy(dir.path(), LEGACY_LIST);

    let (store, _join) = spawn_store(Database::new(&path).unwrap()).unwrap();
    let outcome = store.migrate_legacy(source.clone()).await.unwrap();
    assert_eq!(outcome, MigrationOutcome::AlreadyPopulated { existing: 2 });
    assert_eq!(store.count().await.unwrap(), 2);

    let anchor = parse_date("2024-05-15").unwrap();
    let week = store
        .query(DiaryQuery::view(ViewMode::ThisWeek), anchor)
        .await
        .unwrap();
    assert_eq!(week.len(), 2);
}

#[test]
fn test_failed_batch_commits_nothing_and_retries_cleanly() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("my_diary_app.db");
    let broken = LEGACY_LIST.replace("\"2024-05-16\"", "\"16/05/2024\"");
    let source = write_legacy(dir.path(), &broken);

    let db = Database::new(&path).unwrap();
    let outcome = migrate_legacy_now(&db, &source);
    assert_eq!(
        outcome,
        MigrationOutcome::PartialFailure {
            failed_ids: vec!["1715846400000".to_string()],
            total: 2,
        }
    );
    assert_eq!(db.count().unwrap(), 0);
    assert!(source.exists());

    // Fixed file on the next start goes through
    fs::write(&source.path, LEGACY_LIST).unwrap();
    assert_eq!(
        migrate_legacy_now(&db, &source),
        MigrationOutcome::Migrated { count: 2 }
    );
}

fn migrate_legacy_now(db: &Database, source: &LegacySource) -> MigrationOutcome {
    diary_store::migrate_legacy(db, source).unwrap()
}
