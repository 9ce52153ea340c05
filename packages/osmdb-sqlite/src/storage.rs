use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use osmdb_core::{Error, KeyRange, KvOp, KvStore};
use rusqlite::{params, Connection, OptionalExtension};

/// `KvStore` over a single SQLite table ordered by its text key.
pub struct SqliteKv {
    conn: Mutex<Connection>,
}

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

impl SqliteKv {
    pub fn open(path: impl AsRef<Path>) -> osmdb_core::Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(storage_err)?;
        tracing::debug!(path = %path.as_ref().display(), "opened sqlite kv");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> osmdb_core::Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> osmdb_core::Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );",
        )
        .map_err(storage_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> osmdb_core::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("sqlite connection lock poisoned".into()))
    }
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &str) -> osmdb_core::Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        conn.query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(storage_err)
    }

    async fn batch(&self, ops: Vec<KvOp>) -> osmdb_core::Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;
        {
            let mut put = tx
                .prepare_cached("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")
                .map_err(storage_err)?;
            let mut del = tx
                .prepare_cached("DELETE FROM kv WHERE key = ?1")
                .map_err(storage_err)?;
            for op in &ops {
                let applied = match op {
                    KvOp::Put { key, value } => put.execute(params![key, value]),
                    KvOp::Del { key } => del.execute(params![key]),
                };
                applied.map_err(storage_err)?;
            }
        }
        tx.commit().map_err(storage_err)
    }

    async fn scan(&self, range: KeyRange) -> osmdb_core::Result<Vec<(String, Vec<u8>)>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT key, value FROM kv
                 WHERE key >= ?1 AND (?2 IS NULL OR key < ?2)
                 ORDER BY key ASC",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![range.gte, range.lt], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(storage_err)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(storage_err)?);
        }
        Ok(out)
    }
}
