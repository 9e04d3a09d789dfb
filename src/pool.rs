//! Connection pool wrapper.
//!
//! [`Db`] wraps a shared `sqlx::PgPool`. The pool is long-lived and owned by
//! the application; `Db` borrows a connection per operation, or one per
//! transaction for the lifetime of its handle.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Connection;
use tracing::info;

use crate::config::PoolConfig;
use crate::context::{Context, run_bounded};
use crate::error::DbResult;
use crate::transaction::{IsolationLevel, TxHandle};

/// Shared handle to the database.
#[derive(Clone, Debug)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Wrap an externally-owned pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database and build a pool from `config`.
    pub async fn connect(config: &PoolConfig) -> DbResult<Self> {
        config.validate()?;
        let pool = Self::pool_options(config).connect(&config.url).await?;
        info!(
            url = %config.masked_url(),
            max_connections = config.max_connections_or_default(),
            "connected to PostgreSQL"
        );
        Ok(Self { pool })
    }

    /// Build a pool without establishing a connection up front.
    ///
    /// The first operation pays the connection cost instead.
    pub fn connect_lazy(config: &PoolConfig) -> DbResult<Self> {
        config.validate()?;
        let pool = Self::pool_options(config).connect_lazy(&config.url)?;
        Ok(Self { pool })
    }

    fn pool_options(config: &PoolConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .min_connections(config.min_connections_or_default())
            .max_connections(config.max_connections_or_default())
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_or_default()))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_or_default())))
            .test_before_acquire(config.test_before_acquire_or_default())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check the connection by round-tripping on a pooled connection.
    pub async fn ping(&self, ctx: &Context) -> DbResult<()> {
        run_bounded(ctx, "ping", async {
            let mut conn = self.pool.acquire().await?;
            conn.ping().await
        })
        .await
    }

    /// Close the pool and all its connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Begin a transaction at the given isolation level.
    ///
    /// Honors the context deadline. The returned handle ties up one pooled
    /// connection until its terminal action.
    pub(crate) async fn begin(
        &self,
        ctx: &Context,
        isolation: IsolationLevel,
    ) -> DbResult<TxHandle> {
        let mut tx = run_bounded(ctx, "begin transaction", self.pool.begin()).await?;
        // An unfinished sqlx transaction rolls back when dropped, so bailing
        // out here leaks nothing.
        run_bounded(
            ctx,
            "set transaction isolation",
            sqlx::query(isolation.set_statement()).execute(&mut *tx),
        )
        .await?;
        Ok(TxHandle::new(tx))
    }
}
