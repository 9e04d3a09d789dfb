//! Query execution.
//!
//! Every primitive takes the ambient context, a query descriptor, and bind
//! parameters. When the context carries a transaction handle the statement
//! runs on that handle's connection; otherwise it runs against the pool
//! directly. The executor never begins or ends a transaction itself.

use sqlx::FromRow;
use sqlx::postgres::PgRow;
use tracing::debug;

use crate::context::{Context, run_bounded};
use crate::error::{DbError, DbResult};
use crate::pool::Db;
use crate::pretty;
use crate::query::{Query, QueryParam, bind_param};

impl Db {
    /// Execute a statement and return the number of affected rows.
    pub async fn exec(&self, ctx: &Context, q: &Query, params: &[QueryParam]) -> DbResult<u64> {
        log_query(q, params);
        let query = build(q, params);
        let done = match ctx.transaction() {
            Some(handle) => {
                let mut slot = handle.slot().await;
                let tx = slot.as_mut().ok_or_else(|| DbError::spent(handle.id()))?;
                run_bounded(ctx, &q.name, query.execute(&mut **tx)).await?
            }
            None => run_bounded(ctx, &q.name, query.execute(self.pool())).await?,
        };
        Ok(done.rows_affected())
    }

    /// Execute a statement and return the full result set.
    pub async fn query(
        &self,
        ctx: &Context,
        q: &Query,
        params: &[QueryParam],
    ) -> DbResult<Vec<PgRow>> {
        log_query(q, params);
        let query = build(q, params);
        match ctx.transaction() {
            Some(handle) => {
                let mut slot = handle.slot().await;
                let tx = slot.as_mut().ok_or_else(|| DbError::spent(handle.id()))?;
                run_bounded(ctx, &q.name, query.fetch_all(&mut **tx)).await
            }
            None => run_bounded(ctx, &q.name, query.fetch_all(self.pool())).await,
        }
    }

    /// Execute a statement expected to return one row.
    ///
    /// Zero rows surfaces the driver's row-not-found error unchanged.
    pub async fn query_row(
        &self,
        ctx: &Context,
        q: &Query,
        params: &[QueryParam],
    ) -> DbResult<PgRow> {
        log_query(q, params);
        let query = build(q, params);
        match ctx.transaction() {
            Some(handle) => {
                let mut slot = handle.slot().await;
                let tx = slot.as_mut().ok_or_else(|| DbError::spent(handle.id()))?;
                run_bounded(ctx, &q.name, query.fetch_one(&mut **tx)).await
            }
            None => run_bounded(ctx, &q.name, query.fetch_one(self.pool())).await,
        }
    }

    /// Execute a statement and scan its single row into `T`.
    ///
    /// Fails with a cardinality error when the query returns zero or more
    /// than one row, and with a scan error when the row shape does not match
    /// the destination.
    pub async fn scan_one<T>(&self, ctx: &Context, q: &Query, params: &[QueryParam]) -> DbResult<T>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let rows = self.query(ctx, q, params).await?;
        match rows.len() {
            0 => Err(DbError::no_rows(&q.name)),
            1 => T::from_row(&rows[0]).map_err(|e| DbError::scan(&q.name, e)),
            n => Err(DbError::many_rows(&q.name, n)),
        }
    }

    /// Execute a statement and scan every row into `T`.
    pub async fn scan_all<T>(
        &self,
        ctx: &Context,
        q: &Query,
        params: &[QueryParam],
    ) -> DbResult<Vec<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let rows = self.query(ctx, q, params).await?;
        rows.iter()
            .map(|row| T::from_row(row).map_err(|e| DbError::scan(&q.name, e)))
            .collect()
    }
}

fn build<'q>(
    q: &'q Query,
    params: &'q [QueryParam],
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    let mut query = sqlx::query(&q.sql);
    for param in params {
        query = bind_param(query, param);
    }
    query
}

/// Emit the observability log line for a statement.
///
/// Rendering is best-effort and infallible; it can never fail the query.
fn log_query(q: &Query, params: &[QueryParam]) {
    debug!(
        sql = %q.name,
        query = %pretty::pretty(&q.sql, params),
        "executing query"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use std::time::Duration;

    fn lazy_db() -> Db {
        Db::connect_lazy(&PoolConfig::new("postgres://localhost:5432/app")).unwrap()
    }

    #[tokio::test]
    async fn test_exec_honors_expired_deadline_before_io() {
        let db = lazy_db();
        let ctx = Context::new().with_timeout(Duration::ZERO);
        let q = Query::new("noop", "SELECT 1");
        let result = db.exec(&ctx, &q, &[]).await;
        assert!(matches!(result, Err(DbError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_spent_handle_rejected_without_touching_pool() {
        let ctx = Context::new().with_transaction(crate::transaction::TxHandle::dangling());
        let db = lazy_db();
        let q = Query::new("noop", "SELECT 1");
        let result = db.exec(&ctx, &q, &[]).await;
        assert!(matches!(result, Err(DbError::TransactionSpent { .. })));
    }
}
