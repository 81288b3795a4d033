//! PostgreSQL adapter for the connection pool
//!
//! Opens single `PgConnection`s (pooling is done by [`super::ConnectionPool`])
//! and materializes rows as JSON values.

use super::{ConnectionFactory, SqlConnection};
use crate::domain::error::{AppError, DbFailure, Result};
use crate::domain::query::QueryResult;
use crate::infrastructure::config::DatabaseConfig;
use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::{Column, Connection, Row};
use std::time::Duration;

pub struct PgConnectionFactory {
    options: PgConnectOptions,
    statement_timeout: Duration,
    target: String,
}

impl PgConnectionFactory {
    pub fn from_config(
        config: &DatabaseConfig,
        password: &str,
        statement_timeout: Duration,
    ) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(AppError::ValidationError(
                "PostgreSQL host is required".to_string(),
            ));
        }
        if config.database.trim().is_empty() {
            return Err(AppError::ValidationError(
                "PostgreSQL database name is required".to_string(),
            ));
        }

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.username)
            .password(password)
            .ssl_mode(parse_ssl_mode(&config.ssl_mode))
            .application_name("wardroute");

        Ok(Self {
            options,
            statement_timeout,
            target: format!("{}:{}/{}", config.host, config.port, config.database),
        })
    }
}

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self) -> std::result::Result<Box<dyn SqlConnection>, DbFailure> {
        let mut conn = PgConnection::connect_with(&self.options)
            .await
            .map_err(classify_error)?;

        // Server-side bound on every statement run over this connection
        let set_timeout = format!(
            "SET statement_timeout = {}",
            self.statement_timeout.as_millis()
        );
        sqlx::query(&set_timeout)
            .execute(&mut conn)
            .await
            .map_err(classify_error)?;

        Ok(Box::new(PgSqlConnection { conn }))
    }

    fn describe(&self) -> String {
        self.target.clone()
    }
}

pub struct PgSqlConnection {
    conn: PgConnection,
}

#[async_trait]
impl SqlConnection for PgSqlConnection {
    async fn ping(&mut self) -> std::result::Result<(), DbFailure> {
        self.conn.ping().await.map_err(classify_error)
    }

    async fn fetch_rows(
        &mut self,
        sql: &str,
        params: &[Value],
        max_rows: usize,
    ) -> std::result::Result<QueryResult, DbFailure> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                Value::String(s) => query.bind(s.clone()),
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        query.bind(i)
                    } else if let Some(f) = n.as_f64() {
                        query.bind(f)
                    } else {
                        query.bind(n.to_string())
                    }
                }
                Value::Bool(b) => query.bind(*b),
                Value::Null => query.bind(Option::<String>::None),
                _ => query.bind(param.clone()),
            };
        }

        let mut stream = query.fetch(&mut self.conn);
        let mut columns: Vec<String> = Vec::new();
        let mut rows: Vec<Vec<Value>> = Vec::new();
        let mut truncated = false;

        while let Some(row) = stream.try_next().await.map_err(classify_error)? {
            if columns.is_empty() {
                columns = row.columns().iter().map(|c| c.name().to_string()).collect();
            }
            if rows.len() >= max_rows {
                truncated = true;
                break;
            }
            rows.push((0..row.columns().len()).map(|i| decode_value(&row, i)).collect());
        }

        Ok(QueryResult {
            columns,
            row_count: rows.len(),
            rows,
            truncated,
        })
    }
}

/// Parse SSL mode string to PgSslMode
pub fn parse_ssl_mode(ssl_mode: &str) -> PgSslMode {
    match ssl_mode.to_lowercase().as_str() {
        "disable" => PgSslMode::Disable,
        "allow" => PgSslMode::Allow,
        "prefer" => PgSslMode::Prefer,
        "require" => PgSslMode::Require,
        "verify-ca" => PgSslMode::VerifyCa,
        "verify-full" => PgSslMode::VerifyFull,
        _ => PgSslMode::Prefer,
    }
}

/// Errors carrying a SQLSTATE are statement failures and leave the
/// connection usable; transport and protocol failures do not.
pub fn classify_error(err: sqlx::Error) -> DbFailure {
    match err {
        sqlx::Error::Database(db) => {
            DbFailure::statement(db.code().map(|c| c.into_owned()), db.message().to_string())
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => DbFailure::connection(err.to_string()),
        other => DbFailure::statement(None, other.to_string()),
    }
}

/// Extract a column value from a row as serde_json::Value
fn decode_value(row: &PgRow, index: usize) -> Value {
    // Try different types in order of likelihood
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map(Value::String).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(index) {
        return v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(index) {
        return v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(index) {
        return v
            .and_then(|n| serde_json::Number::from_f64(n as f64))
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return v.map(Value::Bool).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bigdecimal::BigDecimal>, _>(index) {
        return v.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index) {
        return v
            .map(|dt| Value::String(dt.to_rfc3339()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(index) {
        return v
            .map(|dt| Value::String(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(index) {
        return v.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Value>, _>(index) {
        return v.unwrap_or(Value::Null);
    }

    // Default to null for unsupported types
    Value::Null
}
