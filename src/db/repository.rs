use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use tokio_rusqlite::Connection;

use crate::error::Result;

use super::kv::KvStore;
use super::schema::SCHEMA;

/// SQLite-backed `KvStore`.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for Repository {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_string();
        let raw = self
            .conn
            .call(move |conn| {
                let raw = conn
                    .query_row(
                        "SELECT value FROM kv WHERE key = ?1",
                        params![key],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(raw)
            })
            .await?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let key = key.to_string();
        let raw = serde_json::to_string(&value)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO kv (key, value, updated_at)
                       VALUES (?1, ?2, datetime('now'))
                       ON CONFLICT(key) DO UPDATE SET
                           value = excluded.value,
                           updated_at = excluded.updated_at"#,
                    params![key, raw],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_string();
        let keys = self
            .conn
            .call(move |conn| {
                // substr() instead of LIKE so '_' and '%' in keys match literally
                let mut stmt = conn.prepare(
                    "SELECT key FROM kv WHERE substr(key, 1, ?2) = ?1 ORDER BY key",
                )?;
                let keys = stmt
                    .query_map(params![prefix, prefix.chars().count() as i64], |row| {
                        row.get::<_, String>(0)
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(keys)
            })
            .await?;
        Ok(keys)
    }
}
