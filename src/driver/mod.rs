//! Database access seam.
//!
//! Everything above this module talks to the database through [`Driver`]:
//! SQL text with `$n` placeholders plus the values bound to them.

pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{DriverError, Value};
use crate::result::QueryResult;

pub use postgres::{PgDriver, PgTransaction};

pub type DriverResult<T> = std::result::Result<T, DriverError>;

#[async_trait]
pub trait Driver: Send + Sync {
    /// Runs a statement that returns rows.
    async fn query(&self, sql: &str, params: &[Value]) -> DriverResult<QueryResult>;

    /// Runs a statement and returns the number of affected rows.
    async fn execute(&self, sql: &str, params: &[Value]) -> DriverResult<u64>;

    /// Starts a transaction; statements sent through the returned handle run inside it.
    async fn begin(&self) -> DriverResult<Arc<dyn Transaction>>;
}

/// Open transaction. Dropping it without committing rolls it back.
#[async_trait]
pub trait Transaction: Driver {
    async fn commit(&self) -> DriverResult<()>;

    async fn rollback(&self) -> DriverResult<()>;

    fn as_driver(&self) -> &dyn Driver;
}
