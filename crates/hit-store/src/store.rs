//! Durable queue and cursor operations.

use crate::{migrations, StoreError, StoreResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Logical queue within the store.
///
/// Hits wait in `Reorder` while dependency data is pending and are delivered
/// from `Main`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Main,
    Reorder,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Main => "main",
            QueueKind::Reorder => "reorder",
        }
    }
}

/// A persisted record together with its queue position id.
#[derive(Debug, Clone)]
pub struct QueuedRecord {
    pub id: i64,
    pub record: Vec<u8>,
}

/// SQLite-backed store for the two hit queues and the persisted cursor.
///
/// Records survive process restart; FIFO order is the insertion order
/// (rowids are strictly increasing).
pub struct HitStore {
    conn: Mutex<Connection>,
}

impl HitStore {
    /// Open a store at the given path, running migrations if needed.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
        ",
        )?;
        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store for testing.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        // Note: WAL mode doesn't apply to in-memory databases
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ==========================================
    // Queues
    // ==========================================

    /// Append a record to the back of a queue, returning its id.
    pub fn append(&self, queue: QueueKind, record: &[u8]) -> StoreResult<i64> {
        let conn = self.conn.lock().expect("lock poisoned");
        conn.execute(
            "INSERT INTO hits (queue, record) VALUES (?1, ?2)",
            params![queue.as_str(), record],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Peek the first `n` records of a queue, oldest first, without removing.
    pub fn peek(&self, queue: QueueKind, n: usize) -> StoreResult<Vec<QueuedRecord>> {
        let conn = self.conn.lock().expect("lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, record FROM hits WHERE queue = ?1 ORDER BY id ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![queue.as_str(), n as i64], |row| {
            Ok(QueuedRecord {
                id: row.get(0)?,
                record: row.get(1)?,
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Remove the front record of a queue. No-op on an empty queue.
    pub fn remove_front(&self, queue: QueueKind) -> StoreResult<()> {
        let conn = self.conn.lock().expect("lock poisoned");
        conn.execute(
            "DELETE FROM hits WHERE id = (
                SELECT id FROM hits WHERE queue = ?1 ORDER BY id ASC LIMIT 1
            )",
            params![queue.as_str()],
        )?;
        Ok(())
    }

    /// Remove a specific record by id.
    pub fn remove(&self, queue: QueueKind, id: i64) -> StoreResult<()> {
        let conn = self.conn.lock().expect("lock poisoned");
        conn.execute(
            "DELETE FROM hits WHERE queue = ?1 AND id = ?2",
            params![queue.as_str(), id],
        )?;
        Ok(())
    }

    /// Count the records in a queue.
    pub fn count(&self, queue: QueueKind) -> StoreResult<usize> {
        let conn = self.conn.lock().expect("lock poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM hits WHERE queue = ?1",
            params![queue.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Remove all records from a queue.
    pub fn clear(&self, queue: QueueKind) -> StoreResult<()> {
        let conn = self.conn.lock().expect("lock poisoned");
        let removed = conn.execute("DELETE FROM hits WHERE queue = ?1", params![queue.as_str()])?;
        if removed > 0 {
            debug!(queue = queue.as_str(), removed, "Cleared queue");
        }
        Ok(())
    }

    /// Move every record of `from` to the back of `to`, preserving order.
    ///
    /// Records are re-inserted with fresh ids so they land after everything
    /// already in the destination queue, then deleted from the source, all
    /// in one transaction.
    pub fn move_all(&self, from: QueueKind, to: QueueKind) -> StoreResult<usize> {
        if from == to {
            return Err(StoreError::InvalidData(
                "cannot move a queue onto itself".to_string(),
            ));
        }
        let mut conn = self.conn.lock().expect("lock poisoned");
        let tx = conn.transaction()?;
        let moved = tx.execute(
            "INSERT INTO hits (queue, record)
             SELECT ?2, record FROM hits WHERE queue = ?1 ORDER BY id ASC",
            params![from.as_str(), to.as_str()],
        )?;
        // Only rows that existed before the insert carry the source label.
        tx.execute("DELETE FROM hits WHERE queue = ?1", params![from.as_str()])?;
        tx.commit()?;

        if moved > 0 {
            debug!(
                from = from.as_str(),
                to = to.as_str(),
                moved,
                "Moved queue records"
            );
        }
        Ok(moved)
    }

    // ==========================================
    // Cursors
    // ==========================================

    /// Get a persisted scalar cursor, if set.
    pub fn get_cursor(&self, key: &str) -> StoreResult<Option<f64>> {
        let conn = self.conn.lock().expect("lock poisoned");
        let value = conn
            .query_row(
                "SELECT value FROM cursors WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Set a persisted scalar cursor.
    pub fn set_cursor(&self, key: &str, value: f64) -> StoreResult<()> {
        let conn = self.conn.lock().expect("lock poisoned");
        conn.execute(
            "INSERT INTO cursors (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }
}
