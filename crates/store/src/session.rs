//! Database session handle.
//!
//! All normal callers take the read lock to clone the pool; only the
//! credential refresher and the shutdown path take the write lock to close
//! and replace the session.

use std::path::Path;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::info;

use fahrplan_core::config::DatabaseConfig;

use crate::error::StoreError;

pub struct StoreSession {
    pool: RwLock<PgPool>,
}

impl StoreSession {
    /// Connect to the scheduler database and, when enabled, apply pending
    /// migrations from the configured filesystem directory.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = Self::open_pool(config).await?;

        if config.migrations_enabled {
            let migrator = sqlx::migrate::Migrator::new(Path::new(&config.migrations_path)).await?;
            migrator.run(&pool).await?;
            info!(path = %config.migrations_path, "applied database migrations");
        }

        info!(host = %config.host, keyspace = %config.keyspace, "connected to scheduler database");
        Ok(Self {
            pool: RwLock::new(pool),
        })
    }

    /// Wrap an existing pool. Useful for tests and tools that manage their
    /// own connection lifecycle.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool: RwLock::new(pool),
        }
    }

    async fn open_pool(config: &DatabaseConfig) -> Result<PgPool, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.database_url())
            .await?;
        Ok(pool)
    }

    /// Clone the current pool for one operation. `PgPool` is internally
    /// reference-counted, so the read lock is held only for the clone.
    pub async fn pool(&self) -> PgPool {
        self.pool.read().await.clone()
    }

    /// Replace the session with a freshly connected pool. Used by the
    /// credential refresher when database credentials rotate.
    pub async fn refresh(&self, config: &DatabaseConfig) -> Result<(), StoreError> {
        let new_pool = Self::open_pool(config).await?;
        let mut guard = self.pool.write().await;
        let old = std::mem::replace(&mut *guard, new_pool);
        drop(guard);
        old.close().await;
        info!("database session refreshed");
        Ok(())
    }

    /// Close the session. Called last during shutdown.
    pub async fn close(&self) {
        let guard = self.pool.write().await;
        guard.close().await;
        info!("database session closed");
    }
}
