use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

const LAST_SEEN_KEY: &str = "last_seen_time";

/// Persists the single scalar watermark separating previously-viewed from
/// new story content.
pub trait WatermarkStore: Send + Sync {
    fn last_seen(&self) -> Result<Option<i64>>;
    fn set_last_seen(&self, value: i64) -> Result<()>;
}

/// Local username to id index, consulted before the network fallback.
pub trait UserDirectory: Send + Sync {
    fn lookup(&self, username: &str) -> Result<Option<String>>;
    fn record(&self, username: &str, user_id: &str) -> Result<()>;
}

/// In-memory collaborator used by tests and short-lived sessions.
#[derive(Default)]
pub struct MemoryStore {
    last_seen: Mutex<Option<i64>>,
    users: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatermarkStore for MemoryStore {
    fn last_seen(&self) -> Result<Option<i64>> {
        Ok(*self.last_seen.lock())
    }

    fn set_last_seen(&self, value: i64) -> Result<()> {
        *self.last_seen.lock() = Some(value);
        Ok(())
    }
}

impl UserDirectory for MemoryStore {
    fn lookup(&self, username: &str) -> Result<Option<String>> {
        Ok(self.users.lock().get(username).cloned())
    }

    fn record(&self, username: &str, user_id: &str) -> Result<()> {
        self.users
            .lock()
            .insert(username.to_string(), user_id.to_string());
        Ok(())
    }
}

/// SQLite-backed session store: the watermark scalar plus the username
/// index.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("storage: open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS user_index (
            username TEXT PRIMARY KEY,
            user_id TEXT NOT NULL
        );",
    )
    .context("storage: run migrations")?;
    Ok(())
}

impl WatermarkStore for Store {
    fn last_seen(&self) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![LAST_SEEN_KEY],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .context("storage: read watermark")?;
        Ok(value)
    }

    fn set_last_seen(&self, value: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![LAST_SEEN_KEY, value],
        )
        .context("storage: write watermark")?;
        Ok(())
    }
}

impl UserDirectory for Store {
    fn lookup(&self, username: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let id = conn
            .query_row(
                "SELECT user_id FROM user_index WHERE username = ?1",
                params![username],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("storage: read user index")?;
        Ok(id)
    }

    fn record(&self, username: &str, user_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO user_index (username, user_id) VALUES (?1, ?2)
             ON CONFLICT(username) DO UPDATE SET user_id = excluded.user_id",
            params![username, user_id],
        )
        .context("storage: write user index")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn watermark_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.last_seen().unwrap(), None);
        store.set_last_seen(1_700_000_000).unwrap();
        assert_eq!(store.last_seen().unwrap(), Some(1_700_000_000));
        store.set_last_seen(1_700_000_500).unwrap();
        assert_eq!(store.last_seen().unwrap(), Some(1_700_000_500));
    }

    #[test]
    fn user_index_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.lookup("alice").unwrap(), None);
        store.record("alice", "123").unwrap();
        assert_eq!(store.lookup("alice").unwrap().as_deref(), Some("123"));
    }

    #[test]
    fn store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.db");
        {
            let store = Store::open(&path).unwrap();
            store.set_last_seen(42).unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.last_seen().unwrap(), Some(42));
    }
}
