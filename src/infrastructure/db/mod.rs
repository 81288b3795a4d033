pub mod pool;
pub mod postgres;

use crate::domain::error::DbFailure;
use crate::domain::query::QueryResult;
use async_trait::async_trait;
use serde_json::Value;

pub use pool::{ConnectionPool, Lease, PoolSettings, PoolSize, PoolStats};

/// A single live database connection. Only the pool creates or destroys these.
#[async_trait]
pub trait SqlConnection: Send {
    /// Lightweight liveness probe.
    async fn ping(&mut self) -> Result<(), DbFailure>;

    /// Run one read-only statement with positional parameters, reading at
    /// most `max_rows` rows. `truncated` is set when more were available.
    async fn fetch_rows(
        &mut self,
        sql: &str,
        params: &[Value],
        max_rows: usize,
    ) -> Result<QueryResult, DbFailure>;
}

#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn SqlConnection>, DbFailure>;

    /// Target description for logs (never includes credentials).
    fn describe(&self) -> String {
        "database".to_string()
    }
}
