//! pg-access
//!
//! A thin transactional access layer over a PostgreSQL connection pool:
//! query execution, result scanning, and transaction demarcation with
//! guaranteed commit-or-rollback, including panic recovery inside the
//! transactional closure.
//!
//! ```no_run
//! use pg_access::{Context, Db, PoolConfig, Query, TxManager, params};
//!
//! # async fn demo() -> pg_access::DbResult<()> {
//! let db = Db::connect(&PoolConfig::from_env()?).await?;
//! let manager = TxManager::new(db.clone());
//!
//! let insert = Query::new("user.create", "INSERT INTO users (name) VALUES ($1)");
//! manager
//!     .read_committed(&Context::new(), |ctx| {
//!         let db = db.clone();
//!         let insert = insert.clone();
//!         async move {
//!             db.exec(&ctx, &insert, &params!["alice"]).await?;
//!             db.exec(&ctx, &insert, &params!["bob"]).await?;
//!             Ok(())
//!         }
//!     })
//!     .await
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod pool;
pub mod pretty;
pub mod query;
pub mod transaction;

mod executor;

pub use config::{ConfigError, PoolConfig};
pub use context::Context;
pub use error::{DbError, DbResult};
pub use pool::Db;
pub use query::{Query, QueryParam};
pub use transaction::{TxHandle, TxManager};
