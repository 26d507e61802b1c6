//! The queue table: connection pool, migrations, and the transactional
//! operations on it.
//!
//! Every worker shares nothing but this table. Claims are row locks taken
//! with `FOR UPDATE SKIP LOCKED`, so concurrent workers carve disjoint
//! batches out of the eligible set without waiting on each other.

pub mod claim;
pub mod enqueue;
pub mod process;

use crate::error::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

/// Name of the queue table created by the bundled migration.
pub const TABLE: &str = "postqueue";

/// Queue handle. Owns the connection pool shared by enqueuers and workers.
#[derive(Debug, Clone)]
pub struct Queue {
    pool: PgPool,
}

impl Queue {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool, e.g. one owned by the host application.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check — run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Open a transaction. Dropping it without `commit` rolls back and
    /// releases every lock taken through it.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
