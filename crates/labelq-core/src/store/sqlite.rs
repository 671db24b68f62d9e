//! SQLite-backed task store.
//!
//! Every method commits before returning. Claims run inside an immediate
//! transaction with a conditional update, so two processes sharing one
//! database file never claim the same row.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::{debug, info, warn};

use super::{Enqueued, StatusCounts, SweepReport};
use crate::error::StoreError;
use crate::models::config::StoreConfig;
use crate::models::task::{LabelType, Task, TaskId, TaskStatus};

type Result<T> = std::result::Result<T, StoreError>;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_path TEXT NOT NULL UNIQUE,
        label_type TEXT NOT NULL CHECK (label_type IN ('shipping', 'return', 'product')),
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'processing', 'done', 'failed', 'error')),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        -- epoch milliseconds
        claimed_at INTEGER,
        lease_expires_at INTEGER,
        claims INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, id);
"#;

const TASK_COLUMNS: &str = "id, file_path, label_type, status, created_at, claims";

/// Task store over one SQLite connection.
#[derive(Clone)]
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteTaskStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, Duration::from_millis(StoreConfig::default().busy_timeout_ms))
    }

    /// Open the database described by `config`.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        Self::open_with_timeout(&config.db_path, Duration::from_millis(config.busy_timeout_ms))
    }

    fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;

        debug!("Opened task store at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// A private in-memory store.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Database file, if not in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Insert a pending task unless one exists for `document_path`.
    pub fn enqueue(&self, document_path: &Path, label_type: LabelType) -> Result<Enqueued> {
        let conn = self.conn.lock();
        let now = Utc::now();
        let inserted = conn.execute(
            "INSERT INTO tasks (file_path, label_type, status, created_at, updated_at)
             VALUES (?1, ?2, 'pending', ?3, ?3)
             ON CONFLICT(file_path) DO NOTHING",
            params![document_path.to_string_lossy(), label_type, now],
        )?;

        if inserted == 0 {
            debug!("Task for {} already exists", document_path.display());
            return Ok(Enqueued::Existing);
        }
        let id = TaskId(conn.last_insert_rowid());
        info!("Enqueued task {} ({}) for {}", id, label_type, document_path.display());
        Ok(Enqueued::Created(id))
    }

    /// Atomically move the oldest pending task to `processing`.
    ///
    /// The claim holds a lease of `lease`; once it expires the sweeper may
    /// hand the task to another worker.
    pub fn claim_next_pending(&self, lease: Duration) -> Result<Option<Task>> {
        let mut conn = self.conn.lock();
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let expires_ms = now_ms.saturating_add(i64::try_from(lease.as_millis()).unwrap_or(i64::MAX));

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let task = tx
            .query_row(
                &format!(
                    "UPDATE tasks
                     SET status = 'processing', claimed_at = ?1, lease_expires_at = ?2,
                         claims = claims + 1, updated_at = ?3
                     WHERE id = (SELECT id FROM tasks WHERE status = 'pending' ORDER BY id LIMIT 1)
                       AND status = 'pending'
                     RETURNING {TASK_COLUMNS}"
                ),
                params![now_ms, expires_ms, now],
                task_from_row,
            )
            .optional()?;
        tx.commit()?;

        if let Some(task) = &task {
            debug!("Claimed task {} ({})", task.id, task.document_path.display());
        }
        Ok(task)
    }

    /// Record a lifecycle transition.
    pub fn set_status(&self, id: TaskId, status: TaskStatus) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: TaskStatus = tx
            .query_row("SELECT status FROM tasks WHERE id = ?1", params![id.0], |row| row.get(0))
            .optional()?
            .ok_or(StoreError::NotFound(id))?;

        if !current.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: current,
                to: status,
            });
        }

        tx.execute(
            "UPDATE tasks
             SET status = ?2, updated_at = ?3,
                 lease_expires_at = CASE WHEN ?2 IN ('done', 'failed', 'error') THEN NULL ELSE lease_expires_at END
             WHERE id = ?1",
            params![id.0, status, Utc::now()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Record the outcome of the claim that handed out `task`.
    ///
    /// Unlike [`set_status`](Self::set_status) this checks ownership: once the
    /// sweeper has taken the task back, or a later claim holds it, the result
    /// is refused with [`StoreError::LeaseLost`] and the row is left alone.
    pub fn complete(&self, task: &Task, status: TaskStatus) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (current, claims): (TaskStatus, u32) = tx
            .query_row(
                "SELECT status, claims FROM tasks WHERE id = ?1",
                params![task.id.0],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(StoreError::NotFound(task.id))?;

        if current != TaskStatus::Processing || claims != task.claim {
            return Err(StoreError::LeaseLost {
                id: task.id,
                claim: task.claim,
            });
        }
        if !current.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: task.id,
                from: current,
                to: status,
            });
        }

        tx.execute(
            "UPDATE tasks
             SET status = ?2, updated_at = ?3,
                 lease_expires_at = CASE WHEN ?2 IN ('done', 'failed', 'error') THEN NULL ELSE lease_expires_at END
             WHERE id = ?1 AND claims = ?4",
            params![task.id.0, status, Utc::now(), task.claim],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Task by id.
    pub fn get(&self, id: TaskId) -> Result<Option<Task>> {
        let conn = self.conn.lock();
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.0],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    /// Number of tasks waiting to be claimed.
    pub fn count_pending(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Per-status totals.
    pub fn counts(&self) -> Result<StatusCounts> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, TaskStatus>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) = row?;
            *counts.slot(status) = count as u64;
        }
        Ok(counts)
    }

    /// Return `processing` tasks whose lease expired before `now` to `pending`.
    ///
    /// Tasks already claimed `max_claims` times are marked `error` instead, so
    /// a document that crashes every worker cannot loop forever.
    pub fn requeue_expired(&self, now: DateTime<Utc>, max_claims: u32) -> Result<SweepReport> {
        let mut conn = self.conn.lock();
        let now_ms = now.timestamp_millis();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let abandoned = tx.execute(
            "UPDATE tasks
             SET status = 'error', lease_expires_at = NULL, updated_at = ?1
             WHERE status = 'processing' AND lease_expires_at < ?2 AND claims >= ?3",
            params![now, now_ms, max_claims],
        )?;
        let requeued = tx.execute(
            "UPDATE tasks
             SET status = 'pending', lease_expires_at = NULL, claimed_at = NULL, updated_at = ?1
             WHERE status = 'processing' AND lease_expires_at < ?2",
            params![now, now_ms],
        )?;
        tx.commit()?;

        let report = SweepReport {
            requeued,
            abandoned,
        };
        if abandoned > 0 {
            warn!("Sweeper marked {} tasks as error after {} claims", abandoned, max_claims);
        }
        if requeued > 0 {
            info!("Sweeper requeued {} tasks with expired leases", requeued);
        }
        Ok(report)
    }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: TaskId(row.get(0)?),
        document_path: PathBuf::from(row.get::<_, String>(1)?),
        label_type: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        claim: row.get(5)?,
    })
}

impl ToSql for LabelType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for LabelType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

impl ToSql for TaskStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TaskStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Barrier;

    const LEASE: Duration = Duration::from_secs(600);

    fn claimed(store: &SqliteTaskStore) -> Task {
        store.claim_next_pending(LEASE).unwrap().expect("a pending task")
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let first = store.enqueue(Path::new("/in/a.pdf"), LabelType::Shipping).unwrap();
        let second = store.enqueue(Path::new("/in/a.pdf"), LabelType::Return).unwrap();

        assert!(matches!(first, Enqueued::Created(_)));
        assert_eq!(second, Enqueued::Existing);
        assert_eq!(store.counts().unwrap().total(), 1);
        assert_eq!(store.count_pending().unwrap(), 1);
    }

    #[test]
    fn test_claim_oldest_first() {
        let store = SqliteTaskStore::in_memory().unwrap();
        store.enqueue(Path::new("/in/a.pdf"), LabelType::Shipping).unwrap();
        store.enqueue(Path::new("/in/b.pdf"), LabelType::Return).unwrap();

        let task = claimed(&store);
        assert_eq!(task.document_path, PathBuf::from("/in/a.pdf"));
        assert_eq!(task.label_type, LabelType::Shipping);
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(store.count_pending().unwrap(), 1);

        assert_eq!(claimed(&store).label_type, LabelType::Return);
        assert!(store.claim_next_pending(LEASE).unwrap().is_none());
    }

    #[test]
    fn test_status_lifecycle() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let Enqueued::Created(id) = store.enqueue(Path::new("/in/a.pdf"), LabelType::Product).unwrap() else {
            panic!("expected new task");
        };

        // Must be claimed before it can finish.
        assert!(matches!(
            store.set_status(id, TaskStatus::Done),
            Err(StoreError::InvalidTransition { from: TaskStatus::Pending, to: TaskStatus::Done, .. })
        ));

        claimed(&store);
        store.set_status(id, TaskStatus::Failed).unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().status, TaskStatus::Failed);

        // Terminal statuses stay put.
        assert!(matches!(
            store.set_status(id, TaskStatus::Done),
            Err(StoreError::InvalidTransition { .. })
        ));
        assert!(matches!(
            store.set_status(TaskId(999), TaskStatus::Done),
            Err(StoreError::NotFound(TaskId(999)))
        ));
    }

    #[test]
    fn test_counts_per_status() {
        let store = SqliteTaskStore::in_memory().unwrap();
        for name in ["a", "b", "c"] {
            store
                .enqueue(&PathBuf::from(format!("/in/{name}.pdf")), LabelType::Shipping)
                .unwrap();
        }
        let task = claimed(&store);
        store.set_status(task.id, TaskStatus::Done).unwrap();
        claimed(&store);

        let counts = store.counts().unwrap();
        assert_eq!(
            counts,
            StatusCounts {
                pending: 1,
                processing: 1,
                done: 1,
                failed: 0,
                error: 0,
            }
        );
    }

    #[test]
    fn test_sweeper_requeues_then_gives_up() {
        let store = SqliteTaskStore::in_memory().unwrap();
        store.enqueue(Path::new("/in/crash.pdf"), LabelType::Shipping).unwrap();
        let short = Duration::from_millis(0);

        let task = store.claim_next_pending(short).unwrap().unwrap();
        let later = || Utc::now() + chrono::Duration::hours(1);

        // Lease not yet expired at claim time.
        let report = store.requeue_expired(Utc::now() - chrono::Duration::seconds(60), 2).unwrap();
        assert_eq!(report, SweepReport::default());

        let report = store.requeue_expired(later(), 2).unwrap();
        assert_eq!(report, SweepReport { requeued: 1, abandoned: 0 });
        assert_eq!(store.get(task.id).unwrap().unwrap().status, TaskStatus::Pending);

        store.claim_next_pending(short).unwrap().unwrap();
        let report = store.requeue_expired(later(), 2).unwrap();
        assert_eq!(report, SweepReport { requeued: 0, abandoned: 1 });
        assert_eq!(store.get(task.id).unwrap().unwrap().status, TaskStatus::Error);
    }

    #[test]
    fn test_stale_claim_cannot_overwrite_new_owner() {
        let store = SqliteTaskStore::in_memory().unwrap();
        store.enqueue(Path::new("/in/slow.pdf"), LabelType::Shipping).unwrap();
        let later = Utc::now() + chrono::Duration::hours(1);

        let first = store.claim_next_pending(Duration::from_millis(0)).unwrap().unwrap();
        assert_eq!(first.claim, 1);
        store.requeue_expired(later, 5).unwrap();

        // Taken back but not yet reclaimed.
        assert!(matches!(
            store.complete(&first, TaskStatus::Failed),
            Err(StoreError::LeaseLost { claim: 1, .. })
        ));

        let second = claimed(&store);
        assert_eq!(second.id, first.id);
        assert_eq!(second.claim, 2);

        assert!(matches!(
            store.complete(&first, TaskStatus::Failed),
            Err(StoreError::LeaseLost { .. })
        ));
        store.complete(&second, TaskStatus::Done).unwrap();
        assert_eq!(store.get(first.id).unwrap().unwrap().status, TaskStatus::Done);

        assert!(matches!(
            store.complete(&second, TaskStatus::Error),
            Err(StoreError::LeaseLost { .. })
        ));
    }

    #[test]
    fn test_reopen_keeps_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("tasks.db");
        {
            let store = SqliteTaskStore::open(&db).unwrap();
            store.enqueue(Path::new("/in/a.pdf"), LabelType::Return).unwrap();
        }
        let store = SqliteTaskStore::open(&db).unwrap();
        assert_eq!(store.count_pending().unwrap(), 1);
        assert_eq!(store.path(), Some(db.as_path()));
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("tasks.db");
        SqliteTaskStore::open(&db)
            .unwrap()
            .enqueue(Path::new("/in/only.pdf"), LabelType::Shipping)
            .unwrap();

        const WORKERS: usize = 8;
        let stores: Vec<_> = (0..WORKERS).map(|_| SqliteTaskStore::open(&db).unwrap()).collect();
        let barrier = Arc::new(Barrier::new(WORKERS));

        let handles: Vec<_> = stores
            .into_iter()
            .map(|store| {
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    store.claim_next_pending(LEASE).unwrap()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();
        assert_eq!(winners, 1);
    }
}
