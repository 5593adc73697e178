//! Mutual exclusion around migration workflows
//!
//! The migrator acquires the lock before touching the ledger and releases it
//! on every exit path. Single-process deployments use [`NoopLock`];
//! [`PostgresAdvisoryLock`] serialises migrators sharing one PostgreSQL
//! database using a session-level advisory lock.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, Pool, Postgres};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backends::PostgresConnection;
use crate::error::{MigrationError, MigrationResult};

/// Advisory lock key used when none is configured
pub const DEFAULT_ADVISORY_LOCK_KEY: i64 = 0x5343_4845_4d41; // "SCHEMA"

/// Lock held for the duration of a migration workflow
#[async_trait]
pub trait MigrationLock: Send + Sync {
    async fn acquire(&self) -> MigrationResult<()>;

    async fn release(&self) -> MigrationResult<()>;
}

/// Lock that never blocks
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLock;

#[async_trait]
impl MigrationLock for NoopLock {
    async fn acquire(&self) -> MigrationResult<()> {
        Ok(())
    }

    async fn release(&self) -> MigrationResult<()> {
        Ok(())
    }
}

/// PostgreSQL session advisory lock
///
/// Advisory locks belong to the session that took them, so the lock keeps
/// one pooled connection checked out between `acquire` and `release`.
pub struct PostgresAdvisoryLock {
    pool: Pool<Postgres>,
    key: i64,
    timeout: Duration,
    held: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PostgresAdvisoryLock {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self::with_key(pool, DEFAULT_ADVISORY_LOCK_KEY)
    }

    pub fn with_key(pool: Pool<Postgres>, key: i64) -> Self {
        Self {
            pool,
            key,
            timeout: Duration::from_secs(60),
            held: Mutex::new(None),
        }
    }

    /// Build the lock on the pool behind an existing connection
    pub fn for_connection(connection: &PostgresConnection) -> Self {
        Self::new(connection.pool().clone())
    }

    /// Maximum time to wait for another migrator to finish
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn key(&self) -> i64 {
        self.key
    }
}

#[async_trait]
impl MigrationLock for PostgresAdvisoryLock {
    async fn acquire(&self) -> MigrationResult<()> {
        let mut held = self.held.lock().await;
        if held.is_some() {
            return Err(MigrationError::Lock("advisory lock already held by this migrator".to_string()));
        }

        let mut connection = self.pool.acquire().await?;
        debug!(key = self.key, "acquiring advisory lock");

        let locking = sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(self.key)
            .execute(&mut *connection);

        let outcome = tokio::time::timeout(self.timeout, locking).await;
        match outcome {
            Ok(result) => {
                result?;
            }
            Err(_) => {
                // The lock request may still be queued on this session
                close_session(connection).await;
                return Err(MigrationError::Lock(format!(
                    "failed to acquire advisory lock {} within {} seconds; another migrator may be running",
                    self.key,
                    self.timeout.as_secs()
                )));
            }
        }

        *held = Some(connection);
        Ok(())
    }

    async fn release(&self) -> MigrationResult<()> {
        let Some(mut connection) = self.held.lock().await.take() else {
            warn!(key = self.key, "release called without holding the advisory lock");
            return Ok(());
        };

        debug!(key = self.key, "releasing advisory lock");
        let unlocked: Result<bool, sqlx::Error> = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(&mut *connection)
            .await;

        match unlocked {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(key = self.key, "advisory lock was not held by this session");
                Ok(())
            }
            Err(err) => {
                // Ending the session is the only other way to drop a session lock
                close_session(connection).await;
                Err(err.into())
            }
        }
    }
}

/// Take `connection` out of the pool and close it, ending its session
async fn close_session(connection: PoolConnection<Postgres>) {
    if let Err(err) = connection.detach().close().await {
        warn!(error = %err, "failed to close advisory lock session");
    }
}
