//! SQLite-based store implementation

use chrono::{DateTime, Local};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{LogEntry, LogSource, ScheduleSnapshot, Store, StoreError, StoreResult};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Event log (append-only)
            CREATE TABLE IF NOT EXISTS event_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                source TEXT NOT NULL,
                message TEXT NOT NULL
            );

            -- Per-task schedule state
            CREATE TABLE IF NOT EXISTS schedules (
                task TEXT PRIMARY KEY,
                snapshot_json TEXT NOT NULL
            );
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

impl Store for SqliteStore {
    fn append_log(&self, entry: LogEntry) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO event_log (timestamp, source, message) VALUES (?, ?, ?)",
            params![
                entry.timestamp.to_rfc3339(),
                entry.source.as_str(),
                entry.message
            ],
        )?;

        debug!(id = conn.last_insert_rowid(), "Log entry appended");
        Ok(())
    }

    fn recent_logs(&self, limit: usize) -> StoreResult<Vec<LogEntry>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, source, message FROM event_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp: String = row.get(1)?;
            let source: String = row.get(2)?;
            let message: String = row.get(3)?;
            Ok((id, timestamp, source, message))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, timestamp, source, message) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map(|dt| dt.with_timezone(&Local))
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let source = LogSource::parse(&source).unwrap_or(LogSource::Service);

            entries.push(LogEntry {
                id,
                timestamp,
                source,
                message,
            });
        }

        Ok(entries)
    }

    fn clear_logs(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM event_log", [])?;
        debug!(removed, "Event log cleared");
        Ok(())
    }

    fn load_schedule(&self, task: &str) -> StoreResult<Option<ScheduleSnapshot>> {
        let conn = self.conn()?;

        let json: Option<String> = conn
            .query_row(
                "SELECT snapshot_json FROM schedules WHERE task = ?",
                [task],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    fn save_schedule(&self, task: &str, snapshot: &ScheduleSnapshot) -> StoreResult<()> {
        let conn = self.conn()?;
        let json = serde_json::to_string(snapshot)?;

        conn.execute(
            r#"
            INSERT INTO schedules (task, snapshot_json)
            VALUES (?, ?)
            ON CONFLICT(task)
            DO UPDATE SET snapshot_json = excluded.snapshot_json
            "#,
            params![task, json],
        )?;

        debug!(task, "Schedule snapshot saved");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
