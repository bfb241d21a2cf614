//! SQLite-backed store handle

use std::str::FromStr;
use std::time::Duration;

use dboxed_types::status::ReconcileStatus;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::entity::Entity;
use crate::error::{StorageError, StorageResult};
use crate::{change_tracking, querier, schema, soft_delete};

/// Connection settings for [`Store::connect`]
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// SQLite URL, e.g. `sqlite://dboxed.db` or `sqlite::memory:`
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl StoreOptions {
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            connect_timeout: Duration::from_secs(5),
        }
    }

    fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// Shared handle to the entity store.
///
/// Repository functions take a `&mut SqliteConnection` so they run equally on
/// a pooled connection or inside a transaction from [`Store::begin`]. The
/// convenience methods here acquire their own connection and must not be
/// called while the same task holds an open transaction.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect and apply the schema
    pub async fn connect(options: &StoreOptions) -> StorageResult<Self> {
        let in_memory = options.is_in_memory();
        let mut connect_options = SqliteConnectOptions::from_str(&options.url)
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(options.connect_timeout);
        if !in_memory {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
        }

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .acquire_timeout(options.connect_timeout);
        if in_memory {
            // Every connection to :memory: is its own database
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.initialize_schema().await?;
        info!(url = %options.url, "Store ready");
        Ok(store)
    }

    /// Fresh private in-memory database
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect(&StoreOptions::in_memory()).await
    }

    async fn initialize_schema(&self) -> StorageResult<()> {
        for stmt in schema::statements() {
            sqlx::query(&stmt).execute(&self.pool).await?;
        }
        debug!("Schema applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a transaction. It commits only on an explicit `commit()`;
    /// dropping it rolls back.
    pub async fn begin(&self) -> StorageResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn acquire(&self) -> StorageResult<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn get<E: Entity>(&self, id: E::Id) -> StorageResult<Option<E>> {
        let mut conn = self.acquire().await?;
        querier::get_by_id::<E>(&mut conn, id).await
    }

    pub async fn list_ids<E: Entity>(&self) -> StorageResult<Vec<E::Id>> {
        let mut conn = self.acquire().await?;
        change_tracking::list_ids::<E>(&mut conn).await
    }

    pub async fn max_change_seq<E: Entity>(&self) -> StorageResult<i64> {
        let mut conn = self.acquire().await?;
        change_tracking::max_change_seq::<E>(&mut conn).await
    }

    pub async fn find_changes<E: Entity>(&self, since: i64) -> StorageResult<Vec<(E::Id, i64)>> {
        let mut conn = self.acquire().await?;
        change_tracking::find_changes::<E>(&mut conn, since).await
    }

    pub async fn set_status<E: Entity>(
        &self,
        id: E::Id,
        status: &ReconcileStatus,
        details: &str,
    ) -> StorageResult<()> {
        let mut conn = self.acquire().await?;
        soft_delete::set_status::<E>(&mut conn, id, status, details).await
    }

    pub async fn hard_delete_finalized<E: Entity>(&self, id: E::Id) -> StorageResult<bool> {
        let mut conn = self.acquire().await?;
        soft_delete::hard_delete_finalized::<E>(&mut conn, id).await
    }
}
