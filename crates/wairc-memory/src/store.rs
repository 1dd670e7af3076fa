//! SQLite-backed session store.
//!
//! One row per nickname holding the JSON-encoded [`SessionRecord`]. Reads
//! and writes of the same nickname are serialized through a per-key lock,
//! so concurrent background saves resolve as last-write-wins.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::{collections::HashMap, str::FromStr, sync::Arc};
use tokio::sync::RwLock;
use tracing::{debug, info};
use wairc_core::{
    config::MemoryConfig,
    error::WaircError,
    shellexpand,
    traits::{SessionRecord, SessionStore},
};

/// Per-key reader/writer locks. Keys are never removed, which is fine for
/// the handful of nicknames a bridge serves.
#[derive(Default)]
struct LockMap {
    locks: std::sync::Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl LockMap {
    fn get(&self, key: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.to_string()).or_default().clone()
    }
}

/// Persistent session store backed by SQLite.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    locks: Arc<LockMap>,
}

impl Store {
    /// Open (or create) the database, running migrations on first use.
    pub async fn new(config: &MemoryConfig) -> Result<Self, WaircError> {
        let db_path = shellexpand(&config.db_path);

        if let Some(parent) = std::path::Path::new(&db_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| WaircError::Memory(format!("failed to create data dir: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| WaircError::Memory(format!("invalid db path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| WaircError::Memory(format!("failed to connect to sqlite: {e}")))?;

        Self::run_migrations(&pool).await?;

        info!("Session store initialized at {db_path}");

        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: Arc::new(LockMap::default()),
        }
    }

    /// Number of stored sessions.
    pub async fn session_count(&self) -> Result<i64, WaircError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| WaircError::Memory(format!("count failed: {e}")))?;
        Ok(count)
    }

    /// Run SQL migrations, tracking which have already been applied.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), WaircError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .execute(pool)
        .await
        .map_err(|e| WaircError::Memory(format!("failed to create migrations table: {e}")))?;

        let migrations: &[(&str, &str)] = &[(
            "001_sessions",
            include_str!("../migrations/001_sessions.sql"),
        )];

        for (name, sql) in migrations {
            let applied: Option<(String,)> =
                sqlx::query_as("SELECT name FROM _migrations WHERE name = ?")
                    .bind(name)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        WaircError::Memory(format!("failed to check migration {name}: {e}"))
                    })?;

            if applied.is_some() {
                continue;
            }

            sqlx::raw_sql(sql)
                .execute(pool)
                .await
                .map_err(|e| WaircError::Memory(format!("migration {name} failed: {e}")))?;

            sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
                .bind(name)
                .execute(pool)
                .await
                .map_err(|e| {
                    WaircError::Memory(format!("failed to record migration {name}: {e}"))
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for Store {
    async fn get_item(&self, key: &str) -> Result<Option<SessionRecord>, WaircError> {
        if key.is_empty() {
            return Err(WaircError::Memory("session key is empty".into()));
        }

        let lock = self.locks.get(key);
        let _guard = lock.read().await;

        let row: Option<(String,)> = sqlx::query_as("SELECT record FROM sessions WHERE nickname = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| WaircError::Memory(format!("failed to read session {key}: {e}")))?;

        match row {
            Some((json,)) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save_item(&self, key: &str, record: &SessionRecord) -> Result<(), WaircError> {
        if key.is_empty() {
            return Err(WaircError::Memory("session key is empty".into()));
        }

        let json = serde_json::to_string(record)?;

        let lock = self.locks.get(key);
        let _guard = lock.write().await;

        sqlx::query(
            "INSERT INTO sessions (nickname, record, updated_at)
             VALUES (?, ?, datetime('now'))
             ON CONFLICT(nickname) DO UPDATE SET
                record = excluded.record,
                updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(&json)
        .execute(&self.pool)
        .await
        .map_err(|e| WaircError::Memory(format!("failed to save session {key}: {e}")))?;

        debug!("saved session for {key}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wairc_core::traits::ChatIdentity;

    async fn test_store() -> Store {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .unwrap();
        Store::run_migrations(&pool).await.unwrap();
        Store::from_pool(pool)
    }

    fn record(password: Option<&str>) -> SessionRecord {
        SessionRecord {
            local_storage: HashMap::from([("WABrowserId".to_string(), "abc".to_string())]),
            last_received_receipts: HashMap::from([("123@c.us".to_string(), 1_700_000_000)]),
            chats: vec![ChatIdentity {
                identifier: "bob".into(),
                id: "123@c.us".into(),
                is_group: false,
            }],
            password: password.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = test_store().await;
        assert!(store.get_item("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_get() {
        let store = test_store().await;
        let rec = record(Some("hunter2"));
        store.save_item("alice", &rec).await.unwrap();
        assert_eq!(store.get_item("alice").await.unwrap(), Some(rec));
        assert_eq!(store.session_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let store = test_store().await;
        store.save_item("alice", &record(None)).await.unwrap();
        let mut newer = record(None);
        newer.last_received_receipts.insert("123@c.us".into(), 1_800_000_000);
        store.save_item("alice", &newer).await.unwrap();

        let got = store.get_item("alice").await.unwrap().unwrap();
        assert_eq!(got.last_received_receipts["123@c.us"], 1_800_000_000);
        assert_eq!(store.session_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let store = test_store().await;
        assert!(store.get_item("").await.is_err());
        assert!(store.save_item("", &record(None)).await.is_err());
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let store = test_store().await;
        Store::run_migrations(&store.pool).await.unwrap();
    }
}
