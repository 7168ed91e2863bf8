//! SQLite-backed scoreboard.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::store::{resolve_range, Scoreboard, ScoreboardError};

fn db_err(e: rusqlite::Error) -> ScoreboardError {
    ScoreboardError::Backend(e.to_string())
}

/// Scoreboard persisted to a SQLite database.
///
/// Hashes live in `hashes(key, field, value)`. Lists live in `lists(key, pos, value)`
/// where `pos` grows monotonically so insertion order survives removals.
pub struct SqliteScoreboard {
    conn: Mutex<Connection>,
}

impl SqliteScoreboard {
    /// Open (or create) a scoreboard database at `path`.
    pub fn new(path: &Path) -> Result<Self, ScoreboardError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite scoreboard (useful for testing).
    pub fn in_memory() -> Result<Self, ScoreboardError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ScoreboardError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS hashes (
                key TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (key, field)
            );

            CREATE TABLE IF NOT EXISTS lists (
                key TEXT NOT NULL,
                pos INTEGER NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (key, pos)
            );
            "#,
        )
        .map_err(db_err)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ScoreboardError> {
        self.conn
            .lock()
            .map_err(|e| ScoreboardError::Backend(format!("lock poisoned: {}", e)))
    }

    fn is_list(conn: &Connection, key: &str) -> Result<bool, ScoreboardError> {
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM lists WHERE key = ? LIMIT 1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err)?;
        Ok(found.is_some())
    }

    fn is_hash(conn: &Connection, key: &str) -> Result<bool, ScoreboardError> {
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM hashes WHERE key = ? LIMIT 1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err)?;
        Ok(found.is_some())
    }

    fn ensure_hash(conn: &Connection, key: &str) -> Result<(), ScoreboardError> {
        if Self::is_list(conn, key)? {
            return Err(ScoreboardError::WrongType(key.to_string()));
        }
        Ok(())
    }

    fn ensure_list(conn: &Connection, key: &str) -> Result<(), ScoreboardError> {
        if Self::is_hash(conn, key)? {
            return Err(ScoreboardError::WrongType(key.to_string()));
        }
        Ok(())
    }
}

impl Scoreboard for SqliteScoreboard {
    fn get(&self, key: &str, field: &str) -> Result<Option<String>, ScoreboardError> {
        let conn = self.lock()?;
        Self::ensure_hash(&conn, key)?;
        conn.query_row(
            "SELECT value FROM hashes WHERE key = ? AND field = ?",
            params![key, field],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)
    }

    fn set(&self, key: &str, field: &str, value: &str) -> Result<(), ScoreboardError> {
        let conn = self.lock()?;
        Self::ensure_hash(&conn, key)?;
        conn.execute(
            "INSERT INTO hashes (key, field, value) VALUES (?, ?, ?)
             ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
            params![key, field, value],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn get_all(&self, key: &str) -> Result<BTreeMap<String, String>, ScoreboardError> {
        let conn = self.lock()?;
        Self::ensure_hash(&conn, key)?;
        let mut stmt = conn
            .prepare("SELECT field, value FROM hashes WHERE key = ?")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![key], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(db_err)?;
        rows.collect::<Result<BTreeMap<_, _>, _>>().map_err(db_err)
    }

    fn incr(&self, key: &str, field: &str, delta: i64) -> Result<i64, ScoreboardError> {
        let mut conn = self.lock()?;
        Self::ensure_hash(&conn, key)?;
        let tx = conn.transaction().map_err(db_err)?;
        let current: Option<String> = tx
            .query_row(
                "SELECT value FROM hashes WHERE key = ? AND field = ?",
                params![key, field],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let current = match current {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|e| ScoreboardError::corrupt(key, field, e))?,
            None => 0,
        };
        let next = current + delta;
        tx.execute(
            "INSERT INTO hashes (key, field, value) VALUES (?, ?, ?)
             ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
            params![key, field, next.to_string()],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(next)
    }

    fn delete(&self, key: &str) -> Result<bool, ScoreboardError> {
        let conn = self.lock()?;
        let hashes = conn
            .execute("DELETE FROM hashes WHERE key = ?", params![key])
            .map_err(db_err)?;
        let lists = conn
            .execute("DELETE FROM lists WHERE key = ?", params![key])
            .map_err(db_err)?;
        Ok(hashes + lists > 0)
    }

    fn list_push(&self, key: &str, value: &str) -> Result<usize, ScoreboardError> {
        let mut conn = self.lock()?;
        Self::ensure_list(&conn, key)?;
        let tx = conn.transaction().map_err(db_err)?;
        let next_pos: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(pos), -1) + 1 FROM lists WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        tx.execute(
            "INSERT INTO lists (key, pos, value) VALUES (?, ?, ?)",
            params![key, next_pos, value],
        )
        .map_err(db_err)?;
        let len: i64 = tx
            .query_row("SELECT COUNT(*) FROM lists WHERE key = ?", params![key], |row| {
                row.get(0)
            })
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(len as usize)
    }

    fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, ScoreboardError> {
        let conn = self.lock()?;
        Self::ensure_list(&conn, key)?;
        let mut stmt = conn
            .prepare("SELECT value FROM lists WHERE key = ? ORDER BY pos")
            .map_err(db_err)?;
        let values = stmt
            .query_map(params![key], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(match resolve_range(values.len(), start, stop) {
            Some((from, to)) => values[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    fn list_remove(&self, key: &str, value: &str) -> Result<usize, ScoreboardError> {
        let conn = self.lock()?;
        Self::ensure_list(&conn, key)?;
        let removed = conn
            .execute(
                "DELETE FROM lists WHERE key = ? AND value = ?",
                params![key, value],
            )
            .map_err(db_err)?;
        Ok(removed)
    }
}
