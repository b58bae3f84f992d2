//! SQLite-backed task store.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::domain::task::truncate_micros;
use crate::domain::{NewTask, Page, Task, TaskChanges, TaskError, TaskId, TaskStatus};
use crate::ports::{TaskStore, empty_counts};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL CHECK (length(title) BETWEEN 1 AND 255),
    description TEXT,
    status TEXT NOT NULL DEFAULT 'PENDING'
        CHECK (status IN ('PENDING', 'PROCESSING', 'COMPLETED', 'FAILED')),
    result TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at DESC);
"#;

const COLUMNS: &str = "id, title, description, status, result, created_at, updated_at";

/// Writers in other processes (the worker) may hold the lock briefly.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, TaskError> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)?;
            Self::init(&conn)?;
            Ok::<_, TaskError>(conn)
        })
        .await??;
        tracing::debug!("task store ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, TaskError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(conn: &Connection) -> Result<(), TaskError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Run a closure against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T, TaskError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, TaskError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await?
    }
}

/// Raw column values; converted outside of rusqlite's row callback so that
/// bad timestamps or unknown status literals surface as storage errors.
struct RawRow {
    id: i64,
    title: String,
    description: Option<String>,
    status: String,
    result: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            status: row.get(3)?,
            result: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_task(self) -> Result<Task, TaskError> {
        Ok(Task {
            id: TaskId::new(self.id),
            title: self.title,
            description: self.description,
            status: self.status.parse::<TaskStatus>()?,
            result: self.result,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, TaskError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TaskError::Storage(format!("invalid timestamp {s:?}: {e}")))
}

fn clamp(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn select_one(conn: &Connection, id: TaskId) -> Result<Option<Task>, TaskError> {
    let raw = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1"),
            params![id.get()],
            RawRow::read,
        )
        .optional()?;
    raw.map(RawRow::into_task).transpose()
}

fn select_many(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<Task>, TaskError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(args, RawRow::read)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(RawRow::into_task).collect()
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(&self, task: &NewTask, now: DateTime<Utc>) -> Result<Task, TaskError> {
        let title = task.title().to_string();
        let description = task.description().map(str::to_string);
        let now = truncate_micros(now);
        self.run(move |conn| {
            let ts = format_timestamp(now);
            conn.execute(
                "INSERT INTO tasks (title, description, status, result, created_at, updated_at)
                 VALUES (?1, ?2, ?3, NULL, ?4, ?4)",
                params![title, description, TaskStatus::Pending.as_str(), ts],
            )?;
            let id = TaskId::new(conn.last_insert_rowid());
            Ok(Task {
                id,
                title,
                description,
                status: TaskStatus::Pending,
                result: None,
                created_at: now,
                updated_at: now,
            })
        })
        .await
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, TaskError> {
        self.run(move |conn| select_one(conn, id)).await
    }

    async fn list(&self, page: Page) -> Result<Vec<Task>, TaskError> {
        self.run(move |conn| {
            select_many(
                conn,
                &format!("SELECT {COLUMNS} FROM tasks ORDER BY id ASC LIMIT ?1 OFFSET ?2"),
                params![clamp(page.limit), clamp(page.skip)],
            )
        })
        .await
    }

    async fn apply(
        &self,
        id: TaskId,
        changes: &TaskChanges,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>, TaskError> {
        let changes = changes.clone();
        self.run(move |conn| {
            // IMMEDIATE: take the write lock before reading so the
            // read-modify-write is atomic across processes.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(mut task) = select_one(&tx, id)? else {
                return Ok(None);
            };
            task.apply(&changes, now)?;
            tx.execute(
                "UPDATE tasks
                 SET title = ?1, description = ?2, status = ?3, result = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    task.title,
                    task.description,
                    task.status.as_str(),
                    task.result,
                    format_timestamp(task.updated_at),
                    id.get(),
                ],
            )?;
            tx.commit()?;
            Ok(Some(task))
        })
        .await
    }

    async fn delete(&self, id: TaskId) -> Result<bool, TaskError> {
        self.run(move |conn| {
            let n = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id.get()])?;
            Ok(n > 0)
        })
        .await
    }

    async fn counts_by_status(&self) -> Result<BTreeMap<TaskStatus, u64>, TaskError> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;

            let mut counts = empty_counts();
            for (status, n) in rows {
                counts.insert(status.parse::<TaskStatus>()?, n.max(0) as u64);
            }
            Ok(counts)
        })
        .await
    }

    async fn recent(&self, limit: u64) -> Result<Vec<Task>, TaskError> {
        self.run(move |conn| {
            select_many(
                conn,
                &format!(
                    "SELECT {COLUMNS} FROM tasks ORDER BY created_at DESC, id DESC LIMIT ?1"
                ),
                params![clamp(limit)],
            )
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn new_task(title: &str, description: Option<&str>) -> NewTask {
        NewTask::new(title, description.map(str::to_string)).unwrap()
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let created = store
            .insert(&new_task("Test Task", Some("This is a test task")), t0())
            .await
            .unwrap();

        let fetched = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.status, TaskStatus::Pending);
        assert_eq!(fetched.result, None);
    }

    #[tokio::test]
    async fn list_pages_in_creation_order() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .insert(&new_task(&format!("Task {i}"), None), t0())
                .await
                .unwrap();
        }

        let titles: Vec<_> = store
            .list(Page::new(2, 2))
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["Task 2", "Task 3"]);
    }

    #[tokio::test]
    async fn apply_persists_changes_and_microsecond_timestamps() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let created = store.insert(&new_task("a", None), t0()).await.unwrap();

        let later = t0() + ChronoDuration::microseconds(1_500_250);
        let updated = store
            .apply(created.id, &TaskChanges::status(TaskStatus::Processing), later)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.updated_at, later);

        let fetched = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(fetched, updated);
    }

    #[tokio::test]
    async fn unknown_status_literal_is_a_storage_error() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let created = store.insert(&new_task("a", None), t0()).await.unwrap();
        let id = created.id;

        // CHECK 制約を外した古い DB を想定して、制約なしで書き換える
        store
            .run(move |conn| {
                conn.execute_batch("PRAGMA ignore_check_constraints = ON;")?;
                conn.execute(
                    "UPDATE tasks SET status = 'DONE' WHERE id = ?1",
                    params![id.get()],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let err = store.get(id).await.unwrap_err();
        assert!(matches!(err, TaskError::Storage(msg) if msg.contains("DONE")));
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");

        let id = {
            let store = SqliteTaskStore::open(&path).await.unwrap();
            store.insert(&new_task("persisted", None), t0()).await.unwrap().id
        };

        let store = SqliteTaskStore::open(&path).await.unwrap();
        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(task.title, "persisted");

        let counts = store.counts_by_status().await.unwrap();
        assert_eq!(counts[&TaskStatus::Pending], 1);
        assert_eq!(counts[&TaskStatus::Failed], 0);
    }

    #[tokio::test]
    async fn delete_reports_whether_row_existed() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let created = store.insert(&new_task("a", None), t0()).await.unwrap();
        assert!(store.delete(created.id).await.unwrap());
        assert!(!store.delete(created.id).await.unwrap());
        assert_eq!(store.get(created.id).await.unwrap(), None);
    }
}
