use chrono::NaiveDate;
use diary_schemas::{DiaryRecord, RecordId};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::database::{Database, DatabaseInfo};
use crate::error::{Result, StoreError};
use crate::migration::{migrate_legacy, LegacySource, MigrationOutcome};
use crate::query::DiaryQuery;

pub type StoreJob = Box<dyn FnOnce(&Database) + Send>;

/// Background worker that owns the database connection.
///
/// Jobs run one at a time in the order they were submitted.
pub struct StoreWorker {
    db: Database,
    receiver: mpsc::UnboundedReceiver<StoreJob>,
}

impl StoreWorker {
    pub fn new(db: Database, receiver: mpsc::UnboundedReceiver<StoreJob>) -> Self {
        Self { db, receiver }
    }

    /// Run until every `StoreHandle` has been dropped
    pub fn run(mut self) {
        info!("Store worker started");

        while let Some(job) = self.receiver.blocking_recv() {
            // A failed job only loses its own reply; keep serving the rest
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| job(&self.db))) {
                error!("Store job panicked: {}", panic_message(panic.as_ref()));
            }
        }

        warn!("Store worker stopped - channel closed");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Start the worker on its own thread and return a handle for submitting jobs
pub fn spawn_store(db: Database) -> Result<(StoreHandle, JoinHandle<()>)> {
    let (sender, receiver) = mpsc::unbounded_channel();
    let worker = StoreWorker::new(db, receiver);

    let join = std::thread::Builder::new()
        .name("diary-store".to_string())
        .spawn(move || worker.run())?;

    Ok((StoreHandle { sender }, join))
}

/// Cloneable async front for the store worker; callers never block on I/O
#[derive(Clone)]
pub struct StoreHandle {
    sender: mpsc::UnboundedSender<StoreJob>,
}

impl StoreHandle {
    /// Queue `f` immediately and return a future for its result.
    ///
    /// The job's place in the worker queue is fixed when this returns, before
    /// the future is first polled.
    pub fn enqueue<T, F>(&self, f: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let job: StoreJob = Box::new(move |db| {
            // The caller may have gone away; nothing to do then
            let _ = reply.send(f(db));
        });

        let queued = self.sender.send(job).map_err(|_| StoreError::WorkerStopped);
        async move {
            queued?;
            response.await.map_err(|_| StoreError::WorkerStopped)?
        }
    }

    /// Run `f` against the database on the worker thread
    pub async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue(f).await
    }

    pub fn enqueue_put(&self, record: DiaryRecord) -> impl Future<Output = Result<()>> + Send {
        self.enqueue(move |db| db.put(&record))
    }

    pub fn enqueue_delete(&self, id: RecordId) -> impl Future<Output = Result<bool>> + Send {
        self.enqueue(move |db| db.delete(&id))
    }

    pub fn enqueue_clear(&self) -> impl Future<Output = Result<usize>> + Send {
        self.enqueue(|db| db.clear_all())
    }

    pub async fn put(&self, record: DiaryRecord) -> Result<()> {
        self.enqueue_put(record).await
    }

    pub async fn delete(&self, id: RecordId) -> Result<bool> {
        self.enqueue_delete(id).await
    }

    pub async fn get_by_id(&self, id: RecordId) -> Result<Option<DiaryRecord>> {
        self.call(move |db| db.get_by_id(&id)).await
    }

    pub async fn list_all(&self) -> Result<Vec<DiaryRecord>> {
        self.call(|db| db.list_all()).await
    }

    pub async fn list_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DiaryRecord>> {
        self.call(move |db| db.list_by_date_range(start, end)).await
    }

    pub async fn search(&self, keyword: impl Into<String>) -> Result<Vec<DiaryRecord>> {
        let keyword = keyword.into();
        self.call(move |db| db.search(&keyword)).await
    }

    pub async fn query(&self, query: DiaryQuery, anchor: NaiveDate) -> Result<Vec<DiaryRecord>> {
        self.call(move |db| db.query(&query, anchor)).await
    }

    pub async fn today(&self, anchor: NaiveDate) -> Result<Vec<DiaryRecord>> {
        self.call(move |db| db.today(anchor)).await
    }

    pub async fn this_week(&self, anchor: NaiveDate) -> Result<Vec<DiaryRecord>> {
        self.call(move |db| db.this_week(anchor)).await
    }

    pub async fn this_month(&self, anchor: NaiveDate) -> Result<Vec<DiaryRecord>> {
        self.call(move |db| db.this_month(anchor)).await
    }

    pub async fn count(&self) -> Result<usize> {
        self.call(|db| db.count()).await
    }

    pub async fn clear_all(&self) -> Result<usize> {
        self.enqueue_clear().await
    }

    pub async fn info(&self) -> Result<DatabaseInfo> {
        self.call(|db| db.info()).await
    }

    pub async fn migrate_legacy(&self, source: LegacySource) -> Result<MigrationOutcome> {
        self.call(move |db| migrate_legacy(db, &source)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diary_schemas::parse_date;
    use tempfile::TempDir;

    fn record(id: &str, created_at: i64) -> DiaryRecord {
        DiaryRecord {
            id: RecordId::from(id),
            title: "Queued".to_string(),
            body: "Written through the worker".to_string(),
            date: parse_date("2024-05-01").unwrap(),
            created_at,
            updated_at: created_at,
            mood: None,
            weather_note: None,
            tags: Vec::new(),
            reminder_enabled: false,
            reminder_at: 0,
        }
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("diary.db")).unwrap();
        let (store, _join) = spawn_store(db).unwrap();

        store.put(record("a1", 1)).await.unwrap();
        assert_eq!(
            store.get_by_id(RecordId::from("a1")).await.unwrap(),
            Some(record("a1", 1))
        );
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.delete(RecordId::from("a1")).await.unwrap());
        assert!(!store.delete(RecordId::from("a1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_jobs_apply_in_submission_order() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("diary.db")).unwrap();
        let (store, _join) = spawn_store(db).unwrap();

        let mut later = record("a1", 1);
        later.title = "Second".to_string();

        let first = store.put(record("a1", 1));
        let second = store.put(later.clone());
        let (a, b) = tokio::join!(first, second);
        a.unwrap();
        b.unwrap();

        assert_eq!(store.get_by_id(RecordId::from("a1")).await.unwrap(), Some(later));
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_worker() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("diary.db")).unwrap();
        let (store, _join) = spawn_store(db).unwrap();

        store.put(record("a1", 1)).await.unwrap();

        // The panicking job's own caller sees the reply channel drop
        let result = store.call::<(), _>(|_| panic!("boom")).await;
        assert!(matches!(result, Err(StoreError::WorkerStopped)));

        assert_eq!(store.count().await.unwrap(), 1);
        store.put(record("b2", 2)).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stopped_worker_reports_error() {
        let (sender, receiver) = mpsc::unbounded_channel();
        drop(receiver);
        let store = StoreHandle { sender };

        assert!(matches!(store.count().await, Err(StoreError::WorkerStopped)));
        assert!(matches!(
            store.put(record("a1", 1)).await,
            Err(StoreError::WorkerStopped)
        ));
    }

    #[tokio::test]
    async fn test_enqueue_order_is_fixed_before_polling() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("diary.db")).unwrap();
        let (store, _join) = spawn_store(db).unwrap();

        // Queued put then delete, awaited in the opposite order
        let put = store.enqueue_put(record("a1", 1));
        let delete = store.enqueue_delete(RecordId::from("a1"));

        assert!(delete.await.unwrap());
        put.await.unwrap();
        assert_eq!(store.get_by_id(RecordId::from("a1")).await.unwrap(), None);
    }
}
