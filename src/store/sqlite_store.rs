use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::OptionalExtension;
use serde_json::Value;

use super::{DocumentStore, StoreError};

/// All collections share one `documents` table; every call opens its own
/// connection on the blocking pool.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            Ok(())
        })
        .await?
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(
        &self,
        collection: &str,
        id: &str,
        partition_key: &str,
    ) -> Result<Option<Value>, StoreError> {
        let path = self.path.clone();
        let (collection, id, partition_key) =
            (collection.to_string(), id.to_string(), partition_key.to_string());

        tokio::task::spawn_blocking(move || -> Result<Option<Value>, StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            let raw = conn
                .query_row(
                    "SELECT value_json FROM documents
                     WHERE collection=?1 AND id=?2 AND partition_key=?3",
                    rusqlite::params![collection, id, partition_key],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            match raw {
                Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
                None => Ok(None),
            }
        })
        .await?
    }

    async fn find(
        &self,
        collection: &str,
        partition_key: Option<&str>,
    ) -> Result<Vec<Value>, StoreError> {
        let path = self.path.clone();
        let collection = collection.to_string();
        let partition_key = partition_key.map(str::to_string);

        tokio::task::spawn_blocking(move || -> Result<Vec<Value>, StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT value_json FROM documents
                 WHERE collection=?1 AND (?2 IS NULL OR partition_key=?2)
                 ORDER BY id",
            )?;
            let rows = stmt.query_map(rusqlite::params![collection, partition_key], |row| {
                row.get::<_, String>(0)
            })?;

            let mut out = Vec::new();
            for row in rows {
                let raw = row?;
                out.push(serde_json::from_str(&raw)?);
            }
            Ok(out)
        })
        .await?
    }

    async fn save(
        &self,
        collection: &str,
        id: &str,
        partition_key: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        let path = self.path.clone();
        let (collection, id, partition_key) =
            (collection.to_string(), id.to_string(), partition_key.to_string());
        let value_json = serde_json::to_string(&value)?;

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            conn.execute(
                "INSERT INTO documents (collection, id, partition_key, value_json)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(collection, id) DO UPDATE SET
                    partition_key=excluded.partition_key,
                    value_json=excluded.value_json",
                rusqlite::params![collection, id, partition_key, value_json],
            )?;
            Ok(())
        })
        .await?
    }

    async fn delete(
        &self,
        collection: &str,
        id: &str,
        partition_key: &str,
    ) -> Result<bool, StoreError> {
        let path = self.path.clone();
        let (collection, id, partition_key) =
            (collection.to_string(), id.to_string(), partition_key.to_string());

        tokio::task::spawn_blocking(move || -> Result<bool, StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            let removed = conn.execute(
                "DELETE FROM documents WHERE collection=?1 AND id=?2 AND partition_key=?3",
                rusqlite::params![collection, id, partition_key],
            )?;
            Ok(removed > 0)
        })
        .await?
    }
}

fn init_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            partition_key TEXT NOT NULL,
            value_json TEXT NOT NULL,
            PRIMARY KEY (collection, id)
        );
        CREATE INDEX IF NOT EXISTS idx_documents_partition
            ON documents(collection, partition_key);",
    )?;
    Ok(())
}

fn open_connection(path: PathBuf) -> Result<rusqlite::Connection, rusqlite::Error> {
    let conn = rusqlite::Connection::open(path)?;
    let _ = conn.busy_timeout(Duration::from_secs(5));
    let _ = conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
    Ok(conn)
}
