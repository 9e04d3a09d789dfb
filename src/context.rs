//! Ambient call context.
//!
//! A [`Context`] is an immutable carrier of request-scoped values: the active
//! transaction handle and an optional deadline. Deriving a child context never
//! mutates the parent, so a caller's context stays transaction-free after the
//! manager injects a handle into the child it hands to the work unit.
//!
//! The transaction slot is a private typed field. Foreign code cannot attach
//! to it or shadow it with an unrelated value, which removes the whole class
//! of key-collision and type-confusion bugs that untyped context maps invite.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::{DbError, DbResult};
use crate::transaction::TxHandle;

/// Request-scoped call context, cheap to clone and never mutated in place.
#[derive(Clone, Default)]
pub struct Context {
    tx: Option<TxHandle>,
    deadline: Option<Instant>,
}

impl Context {
    /// Create an empty context: no transaction, no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a child context that expires `timeout` from now.
    ///
    /// If the parent already has an earlier deadline, the earlier one wins.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child context that expires at `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let effective = match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        };
        Self {
            tx: self.tx.clone(),
            deadline: Some(effective),
        }
    }

    /// Derive a child context carrying `handle`. The parent is untouched.
    pub(crate) fn with_transaction(&self, handle: TxHandle) -> Self {
        Self {
            tx: Some(handle),
            deadline: self.deadline,
        }
    }

    /// Look up the transaction handle attached to this context, if any.
    pub(crate) fn transaction(&self) -> Option<&TxHandle> {
        self.tx.as_ref()
    }

    /// Check whether a transaction is active on this context.
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// The absolute deadline, if one was set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` means no deadline; a zero
    /// duration means the deadline has already passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("transaction", &self.tx.as_ref().map(|tx| tx.id().to_string()))
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Run a database future under the context's deadline.
///
/// With no deadline the future runs to completion. An already-expired
/// deadline fails before the future is polled.
pub(crate) async fn run_bounded<T, F>(ctx: &Context, operation: &str, fut: F) -> DbResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match ctx.remaining() {
        None => fut.await.map_err(DbError::from),
        Some(remaining) if remaining.is_zero() => Err(DbError::timeout(operation, 0)),
        Some(remaining) => match tokio::time::timeout(remaining, fut).await {
            Ok(result) => result.map_err(DbError::from),
            Err(_) => Err(DbError::timeout(operation, remaining.as_millis() as u64)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_context() {
        let ctx = Context::new();
        assert!(!ctx.in_transaction());
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());
    }

    #[test]
    fn test_attach_does_not_mutate_parent() {
        let parent = Context::new();
        let child = parent.with_transaction(TxHandle::dangling());
        assert!(child.in_transaction());
        assert!(!parent.in_transaction());
    }

    #[test]
    fn test_lookup_sees_ancestry() {
        let ctx = Context::new().with_transaction(TxHandle::dangling());
        let grandchild = ctx.with_timeout(Duration::from_secs(5));
        assert!(grandchild.in_transaction());
        assert!(grandchild.transaction().is_some());
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let near = Instant::now() + Duration::from_secs(1);
        let ctx = Context::new().with_deadline(near);
        let child = ctx.with_timeout(Duration::from_secs(3600));
        assert_eq!(child.deadline(), Some(near));
    }

    #[test]
    fn test_remaining_saturates_at_zero() {
        let ctx = Context::new().with_deadline(Instant::now() - Duration::from_secs(1));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_run_bounded_expired_deadline_short_circuits() {
        let ctx = Context::new().with_timeout(Duration::ZERO);
        let result = run_bounded(&ctx, "probe", async {
            Ok::<_, sqlx::Error>("never reached")
        })
        .await;
        // The future is ready, but the deadline check comes first.
        assert!(matches!(result, Err(DbError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_run_bounded_no_deadline_passes_through() {
        let ctx = Context::new();
        let value = run_bounded(&ctx, "probe", async { Ok::<_, sqlx::Error>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
