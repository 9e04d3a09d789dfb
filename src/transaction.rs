//! Transaction handle and transaction manager.
//!
//! [`TxManager`] is the single entry point for running a closure under
//! transactional guarantees. It checks the ambient context for an active
//! transaction, begins one when none is present, hands the closure a child
//! context carrying the handle, and resolves the outcome: commit on success,
//! rollback on error or panic. Every handle it begins receives exactly one
//! terminal action, on every path.
//!
//! Nested invocations that share a context join the enclosing transaction
//! (no savepoint); the presence check is a context lookup and costs no
//! database round trip.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use sqlx::{Postgres, Transaction};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::Context;
use crate::error::{DbError, DbResult};
use crate::pool::Db;

type PgTransaction = Transaction<'static, Postgres>;

/// Transaction isolation level.
///
/// Only read-committed is exposed through the public manager surface; the
/// internal machinery is generic over the level so widening the surface
/// later does not change any contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IsolationLevel {
    ReadCommitted,
}

impl IsolationLevel {
    /// The statement establishing this level, valid as the first statement
    /// of a transaction.
    pub(crate) fn set_statement(&self) -> &'static str {
        match self {
            Self::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadCommitted => write!(f, "read committed"),
        }
    }
}

/// A live binding to one in-progress database transaction.
///
/// The handle is shared between the manager that began it and the contexts
/// it is attached to. The inner transaction sits behind a slot that the
/// terminal actions empty; any use after commit or rollback observes the
/// empty slot and fails instead of reaching the database.
#[derive(Clone)]
pub struct TxHandle {
    id: Arc<str>,
    slot: Arc<Mutex<Option<PgTransaction>>>,
}

impl TxHandle {
    pub(crate) fn new(tx: PgTransaction) -> Self {
        Self {
            id: format!("tx_{}", Uuid::new_v4().simple()).into(),
            slot: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// A handle whose transaction is already spent. Unit tests use this to
    /// exercise join and terminal-action paths without a database.
    #[cfg(test)]
    pub(crate) fn dangling() -> Self {
        Self {
            id: Arc::from("tx_dangling"),
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Identifier for log correlation.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) async fn slot(&self) -> MutexGuard<'_, Option<PgTransaction>> {
        self.slot.lock().await
    }

    /// Commit the transaction. Valid exactly once.
    pub(crate) async fn commit(&self) -> DbResult<()> {
        let tx = self
            .slot
            .lock()
            .await
            .take()
            .ok_or_else(|| DbError::spent(&*self.id))?;
        tx.commit().await.map_err(DbError::from)
    }

    /// Roll the transaction back. Valid exactly once.
    pub(crate) async fn rollback(&self) -> DbResult<()> {
        let tx = self
            .slot
            .lock()
            .await
            .take()
            .ok_or_else(|| DbError::spent(&*self.id))?;
        tx.rollback().await.map_err(DbError::from)
    }
}

impl fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxHandle").field("id", &self.id).finish()
    }
}

/// Transaction manager: runs work units under transactional guarantees.
#[derive(Clone, Debug)]
pub struct TxManager {
    db: Db,
}

impl TxManager {
    /// Create a manager over `db`.
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Run `f` inside a read-committed transaction.
    ///
    /// If the context already carries a transaction, `f` joins it and this
    /// call neither begins nor terminates anything. Otherwise a transaction
    /// is begun, `f` receives a child context carrying it, and the manager
    /// commits on success or rolls back on error or panic.
    pub async fn read_committed<F, Fut>(&self, ctx: &Context, f: F) -> DbResult<()>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = DbResult<()>>,
    {
        self.transaction(ctx, IsolationLevel::ReadCommitted, f).await
    }

    async fn transaction<F, Fut>(
        &self,
        ctx: &Context,
        isolation: IsolationLevel,
        f: F,
    ) -> DbResult<()>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = DbResult<()>>,
    {
        if ctx.in_transaction() {
            return f(ctx.clone()).await;
        }

        let handle = self
            .db
            .begin(ctx, isolation)
            .await
            .map_err(DbError::begin)?;
        info!(tx = %handle.id(), isolation = %isolation, "transaction started");

        let tx_ctx = ctx.with_transaction(handle.clone());
        let outcome = match AssertUnwindSafe(f(tx_ctx)).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(DbError::handler(err)),
            Err(payload) => Err(DbError::handler_panic(panic_message(&*payload))),
        };

        match outcome {
            Ok(()) => match handle.commit().await {
                Ok(()) => {
                    info!(tx = %handle.id(), "transaction committed");
                    Ok(())
                }
                Err(err) => Err(DbError::commit(err)),
            },
            Err(cause) => {
                info!(tx = %handle.id(), error = %cause, "rolling back transaction");
                match handle.rollback().await {
                    Ok(()) => Err(cause),
                    Err(rollback) => {
                        warn!(tx = %handle.id(), error = %rollback, "rollback failed");
                        Err(DbError::rollback_failed(cause, rollback))
                    }
                }
            }
        }
    }
}

/// Describe a panic payload for the error channel.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn manager(url: &str) -> TxManager {
        let db = Db::connect_lazy(&PoolConfig::new(url)).unwrap();
        TxManager::new(db)
    }

    #[tokio::test]
    async fn test_join_runs_work_unit_without_begin() {
        // The lazy pool points nowhere; a begin attempt would error. Success
        // here proves the join path never touched the database.
        let manager = manager("postgres://127.0.0.1:1/nowhere");
        let ctx = Context::new().with_transaction(TxHandle::dangling());

        let ran = AtomicBool::new(false);
        let ran_ref = &ran;
        let result = manager
            .read_committed(&ctx, |inner| async move {
                assert!(inner.in_transaction());
                ran_ref.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(result.is_ok());
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_join_returns_work_unit_error_unwrapped() {
        let manager = manager("postgres://127.0.0.1:1/nowhere");
        let ctx = Context::new().with_transaction(TxHandle::dangling());

        let result = manager
            .read_committed(&ctx, |_| async { Err(DbError::no_rows("probe")) })
            .await;
        // The enclosing invocation owns wrapping and finalization.
        assert!(matches!(result, Err(DbError::NoRows { .. })));
    }

    #[tokio::test]
    async fn test_begin_failure_is_wrapped_and_work_unit_never_runs() {
        let db = Db::connect_lazy(&PoolConfig {
            acquire_timeout_secs: Some(1),
            ..PoolConfig::new("postgres://127.0.0.1:1/nowhere")
        })
        .unwrap();
        let manager = TxManager::new(db);

        let ran = AtomicBool::new(false);
        let ran_ref = &ran;
        let result = manager
            .read_committed(&Context::new(), |_| async move {
                ran_ref.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(DbError::Begin { .. })));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_begin_honors_expired_deadline() {
        let manager = manager("postgres://127.0.0.1:1/nowhere");
        let ctx = Context::new().with_timeout(Duration::ZERO);
        let result = manager.read_committed(&ctx, |_| async { Ok(()) }).await;
        let err = result.unwrap_err();
        assert!(matches!(err, DbError::Begin { .. }));
        assert!(matches!(err.cause(), Some(DbError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_terminal_action_valid_exactly_once() {
        let handle = TxHandle::dangling();
        assert!(matches!(
            handle.commit().await,
            Err(DbError::TransactionSpent { .. })
        ));
        assert!(matches!(
            handle.rollback().await,
            Err(DbError::TransactionSpent { .. })
        ));
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(&*payload), "boom");

        let payload =
            std::panic::catch_unwind(|| std::panic::panic_any(format!("id = {}", 7))).unwrap_err();
        assert_eq!(panic_message(&*payload), "id = 7");

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(42u32)).unwrap_err();
        assert_eq!(panic_message(&*payload), "non-string panic payload");
    }

    #[test]
    fn test_isolation_statement() {
        assert_eq!(
            IsolationLevel::ReadCommitted.set_statement(),
            "SET TRANSACTION ISOLATION LEVEL READ COMMITTED"
        );
    }
}
