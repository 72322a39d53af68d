//! Expiring key/value store holding lock records.
//!
//! Values are opaque strings; an entry past its expiry reads as absent and is
//! removed lazily on the next lookup (or in bulk by `purge_expired`).

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};

#[async_trait]
pub trait LockStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, sqlx::Error>;

    /// Store `value` under `key` for `ttl`, replacing any previous entry.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), sqlx::Error>;

    /// Store `value` under `key` for `ttl` unless a live entry already holds
    /// the key. Returns whether the value was stored. Check and write are one
    /// atomic step.
    async fn put_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, sqlx::Error>;

    /// Idempotent.
    async fn delete(&self, key: &str) -> Result<(), sqlx::Error>;
}

/// `LockStore` on the `locks` table of the metadata database.
#[derive(Clone)]
pub struct SqliteLockStore {
    pub db: Arc<SqlitePool>,
}

impl SqliteLockStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Drop every expired entry, returning how many were removed.
    pub async fn purge_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM locks WHERE expires_at <= ?")
            .bind(now_millis())
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_after(ttl: Duration) -> i64 {
    let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now_millis().saturating_add(ttl_millis)
}

#[async_trait]
impl LockStore for SqliteLockStore {
    async fn get(&self, key: &str) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT value, expires_at FROM locks WHERE key = ?")
                .bind(key)
                .fetch_optional(&*self.db)
                .await?;

        match row {
            Some((value, expires_at)) if expires_at > now_millis() => Ok(Some(value)),
            Some(_) => {
                tracing::debug!("lock entry `{}` expired", key);
                sqlx::query("DELETE FROM locks WHERE key = ? AND expires_at <= ?")
                    .bind(key)
                    .bind(now_millis())
                    .execute(&*self.db)
                    .await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), sqlx::Error> {
        let expires_at = expiry_after(ttl);
        sqlx::query(
            r#"
            INSERT INTO locks (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, sqlx::Error> {
        // An expired row counts as absent and is taken over in place.
        let result = sqlx::query(
            r#"
            INSERT INTO locks (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
            WHERE locks.expires_at <= ?
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expiry_after(ttl))
        .bind(now_millis())
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, key: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM locks WHERE key = ?")
            .bind(key)
            .execute(&*self.db)
            .await?;
        Ok(())
    }
}
