//! Query Executor
//!
//! Runs one validated statement on a pooled connection. The lease is dropped
//! on every exit path, which hands the connection back to the pool (or
//! discards it when it can no longer be trusted).

use crate::domain::error::{DbFailure, ExecError};
use crate::domain::query::{GeneratedSql, QueryResult};
use crate::infrastructure::db::ConnectionPool;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// SQLSTATE 57014: statement cancelled by the server's statement_timeout.
const QUERY_CANCELED: &str = "57014";

enum Interrupted {
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct QueryExecutor {
    /// Hard cap on rows read, whatever LIMIT the SQL carries.
    max_rows: usize,
}

impl QueryExecutor {
    pub fn new(max_rows: usize) -> Self {
        Self {
            max_rows: max_rows.max(1),
        }
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    pub async fn execute(
        &self,
        sql: &GeneratedSql,
        pool: &ConnectionPool,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, ExecError> {
        let acquire_timeout = pool.settings().acquire_timeout;
        let mut lease = tokio::select! {
            _ = cancel.cancelled() => return Err(ExecError::Cancelled),
            lease = pool.acquire(acquire_timeout) => lease?,
        };

        let started = Instant::now();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(Interrupted::Cancelled),
            fetched = tokio::time::timeout(
                timeout,
                lease.fetch_rows(&sql.text, &sql.params, self.max_rows),
            ) => fetched.map_err(|_| Interrupted::Timeout),
        };

        let result = match outcome {
            Ok(Ok(mut result)) => {
                if result.rows.len() > self.max_rows {
                    result.rows.truncate(self.max_rows);
                    result.truncated = true;
                }
                result.row_count = result.rows.len();
                debug!(
                    rows = result.row_count,
                    truncated = result.truncated,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Query executed"
                );
                Ok(result)
            }
            Ok(Err(failure)) => {
                if failure.connection_lost {
                    lease.mark_broken();
                }
                Err(Self::classify(failure))
            }
            // The statement may still be running server-side; the
            // connection is not reused.
            Err(Interrupted::Timeout) => {
                lease.mark_broken();
                warn!(timeout_ms = timeout.as_millis() as u64, "Query timed out");
                Err(ExecError::Timeout)
            }
            Err(Interrupted::Cancelled) => {
                lease.mark_broken();
                debug!("Query cancelled by caller");
                Err(ExecError::Cancelled)
            }
        };

        drop(lease);
        result
    }

    fn classify(failure: DbFailure) -> ExecError {
        if failure.code.as_deref() == Some(QUERY_CANCELED) {
            warn!("Query cancelled by server statement timeout");
            return ExecError::Timeout;
        }

        error!(
            code = failure.code.as_deref().unwrap_or("none"),
            connection_lost = failure.connection_lost,
            error = %failure.message,
            "Query execution failed"
        );
        ExecError::DbError {
            code: failure.code,
            message: failure.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::query::SqlSource;
    use crate::infrastructure::db::{ConnectionFactory, PoolSettings, SqlConnection};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Arc;

    /// Behaviour is keyed off the SQL text.
    struct ScriptedConn;

    #[async_trait]
    impl SqlConnection for ScriptedConn {
        async fn ping(&mut self) -> Result<(), DbFailure> {
            Ok(())
        }

        async fn fetch_rows(
            &mut self,
            sql: &str,
            _params: &[Value],
            max_rows: usize,
        ) -> Result<QueryResult, DbFailure> {
            match sql {
                "SELECT slow" => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(QueryResult::default())
                }
                "SELECT missing" => Err(DbFailure::statement(
                    Some("42P01".to_string()),
                    "relation \"missing\" does not exist",
                )),
                "SELECT server_timeout" => Err(DbFailure::statement(
                    Some(QUERY_CANCELED.to_string()),
                    "canceling statement due to statement timeout",
                )),
                "SELECT lost" => Err(DbFailure::connection("connection reset by peer")),
                "SELECT panic" => panic!("driver bug"),
                "SELECT oversized" => {
                    // Ignores max_rows
                    let rows: Vec<Vec<Value>> = (0..20).map(|i| vec![json!(i)]).collect();
                    Ok(QueryResult {
                        columns: vec!["n".to_string()],
                        row_count: rows.len(),
                        rows,
                        truncated: false,
                    })
                }
                _ => {
                    let available = 8;
                    let rows: Vec<Vec<Value>> = (0..available.min(max_rows))
                        .map(|i| vec![json!(i), json!(format!("row {}", i))])
                        .collect();
                    Ok(QueryResult {
                        columns: vec!["id".to_string(), "label".to_string()],
                        row_count: rows.len(),
                        truncated: available > max_rows,
                        rows,
                    })
                }
            }
        }
    }

    struct ScriptedFactory;

    #[async_trait]
    impl ConnectionFactory for ScriptedFactory {
        async fn connect(&self) -> Result<Box<dyn SqlConnection>, DbFailure> {
            Ok(Box::new(ScriptedConn))
        }
    }

    async fn pool(max: usize) -> ConnectionPool {
        let settings = PoolSettings {
            max_connections: max,
            acquire_timeout: Duration::from_millis(50),
            ..PoolSettings::default()
        };
        ConnectionPool::connect(Arc::new(ScriptedFactory), settings)
            .await
            .unwrap()
    }

    fn sql(text: &str) -> GeneratedSql {
        GeneratedSql::new(text, SqlSource::Fallback).into_validated(text.to_string())
    }

    fn assert_balanced(pool: &ConnectionPool) {
        let stats = pool.stats();
        assert_eq!(stats.total_acquired, stats.total_released);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn test_execute_returns_rows_and_releases() {
        let pool = pool(2).await;
        let executor = QueryExecutor::new(500);
        let result = executor
            .execute(&sql("SELECT 1"), &pool, Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.row_count, 8);
        assert!(!result.truncated);
        assert_eq!(result.columns, vec!["id", "label"]);
        assert_balanced(&pool);
        assert_eq!(pool.size().idle, 1);
    }

    #[tokio::test]
    async fn test_row_cap_sets_truncated() {
        let pool = pool(1).await;
        let executor = QueryExecutor::new(5);
        let cancel = CancellationToken::new();

        let capped = executor
            .execute(&sql("SELECT 1"), &pool, Duration::from_secs(1), &cancel)
            .await
            .unwrap();
        assert_eq!(capped.row_count, 5);
        assert!(capped.truncated);

        let oversized = executor
            .execute(&sql("SELECT oversized"), &pool, Duration::from_secs(1), &cancel)
            .await
            .unwrap();
        assert_eq!(oversized.rows.len(), 5);
        assert!(oversized.truncated);
        assert_balanced(&pool);
    }

    #[tokio::test]
    async fn test_timeout_discards_connection() {
        let pool = pool(1).await;
        let result = QueryExecutor::new(500)
            .execute(
                &sql("SELECT slow"),
                &pool,
                Duration::from_millis(20),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result, Err(ExecError::Timeout));
        assert_balanced(&pool);
        assert_eq!(pool.stats().total_discarded, 1);
    }

    #[tokio::test]
    async fn test_server_statement_timeout_maps_to_timeout() {
        let pool = pool(1).await;
        let result = QueryExecutor::new(500)
            .execute(
                &sql("SELECT server_timeout"),
                &pool,
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result, Err(ExecError::Timeout));
        assert_balanced(&pool);
        // Connection itself is fine
        assert_eq!(pool.stats().total_discarded, 0);
    }

    #[tokio::test]
    async fn test_statement_error_keeps_connection() {
        let pool = pool(1).await;
        let result = QueryExecutor::new(500)
            .execute(
                &sql("SELECT missing"),
                &pool,
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await;

        let err = result.unwrap_err();
        assert!(err.is_invalid_statement());
        assert_balanced(&pool);
        assert_eq!(pool.size().idle, 1);
    }

    #[tokio::test]
    async fn test_lost_connection_is_discarded() {
        let pool = pool(1).await;
        let result = QueryExecutor::new(500)
            .execute(
                &sql("SELECT lost"),
                &pool,
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(ExecError::DbError { code: None, .. })));
        assert_balanced(&pool);
        assert_eq!(pool.size().idle, 0);
        assert_eq!(pool.stats().total_discarded, 1);
    }

    #[tokio::test]
    async fn test_cancellation_releases_lease() {
        let pool = pool(1).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = QueryExecutor::new(500)
            .execute(&sql("SELECT slow"), &pool, Duration::from_secs(30), &cancel)
            .await;

        assert_eq!(result, Err(ExecError::Cancelled));
        assert_balanced(&pool);
    }

    #[tokio::test]
    async fn test_busy_pool_reports_exhausted() {
        let pool = pool(1).await;
        let _held = pool.acquire(Duration::from_millis(50)).await.unwrap();

        let result = QueryExecutor::new(500)
            .execute(&sql("SELECT 1"), &pool, Duration::from_secs(1), &CancellationToken::new())
            .await;
        assert_eq!(result, Err(ExecError::PoolExhausted));
    }

    #[tokio::test]
    async fn test_panic_still_releases() {
        let pool = pool(1).await;
        let task_pool = pool.clone();
        let joined = tokio::spawn(async move {
            QueryExecutor::new(500)
                .execute(
                    &sql("SELECT panic"),
                    &task_pool,
                    Duration::from_secs(1),
                    &CancellationToken::new(),
                )
                .await
        })
        .await;

        assert!(joined.is_err());
        assert_balanced(&pool);

        // Pool is still usable afterwards
        let ok = QueryExecutor::new(500)
            .execute(&sql("SELECT 1"), &pool, Duration::from_secs(1), &CancellationToken::new())
            .await;
        assert!(ok.is_ok());
    }
}
