use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::session::ConversationSession;
use crate::traits::{CacheStore, CallRecord, SessionStore, UsageStore};

/// SQLite-backed implementation of all three storage contracts: cache rows,
/// the API-call ledger, and per-user sessions (stored as JSON blobs with
/// last-write-wins upsert semantics).
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(db_path: &str) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                kind TEXT NOT NULL,
                key TEXT NOT NULL,
                payload TEXT NOT NULL,
                stored_at TEXT NOT NULL,
                PRIMARY KEY (kind, key)
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS api_calls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                api_type TEXT NOT NULL,
                cost REAL NOT NULL DEFAULT 0,
                from_cache INTEGER NOT NULL DEFAULT 0,
                quota_exceeded INTEGER NOT NULL DEFAULT 0,
                day TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_api_calls_provider_day
             ON api_calls(provider, day)",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                user_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get(&self, kind: &str, key: &str) -> anyhow::Result<Option<(String, DateTime<Utc>)>> {
        let row = sqlx::query(
            "SELECT payload, stored_at FROM cache_entries WHERE kind = ? AND key = ?",
        )
        .bind(kind)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let payload: String = row.get("payload");
        let stored_at: String = row.get("stored_at");
        let stored_at = DateTime::parse_from_rfc3339(&stored_at)?.with_timezone(&Utc);
        Ok(Some((payload, stored_at)))
    }

    async fn put(
        &self,
        kind: &str,
        key: &str,
        payload: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO cache_entries (kind, key, payload, stored_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(kind, key) DO UPDATE SET
                payload = excluded.payload,
                stored_at = excluded.stored_at",
        )
        .bind(kind)
        .bind(key)
        .bind(payload)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl UsageStore for SqliteStore {
    async fn global_calls(&self, provider: &str, day: &str) -> anyhow::Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM api_calls
             WHERE provider = ? AND day = ? AND from_cache = 0 AND quota_exceeded = 0",
        )
        .bind(provider)
        .bind(day)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n"))
    }

    async fn user_calls(&self, user_id: &str, provider: &str, day: &str) -> anyhow::Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM api_calls
             WHERE user_id = ? AND provider = ? AND day = ? AND from_cache = 0 AND quota_exceeded = 0",
        )
        .bind(user_id)
        .bind(provider)
        .bind(day)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n"))
    }

    async fn append_call(&self, record: &CallRecord) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO api_calls
                (user_id, provider, api_type, cost, from_cache, quota_exceeded, day, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.user_id)
        .bind(&record.provider)
        .bind(&record.api_type)
        .bind(record.cost)
        .bind(record.from_cache as i64)
        .bind(record.quota_exceeded as i64)
        .bind(&record.day)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn get_session(&self, user_id: &str) -> anyhow::Result<Option<ConversationSession>> {
        let row = sqlx::query("SELECT payload FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let payload: String = row.get("payload");
        Ok(Some(serde_json::from_str(&payload)?))
    }

    async fn put_session(&self, session: &ConversationSession) -> anyhow::Result<()> {
        let payload = serde_json::to_string(session)?;
        sqlx::query(
            "INSERT INTO sessions (user_id, payload, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at",
        )
        .bind(&session.user_id)
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
