//! Layered application configuration
//!
//! Sources, later ones win:
//! 1. compiled defaults
//! 2. `wardroute.toml` (optional)
//! 3. `WARDROUTE_*` environment variables, `__` separating nested keys
//!    (`WARDROUTE_POOL__MAX_CONNECTIONS=20`)
//!
//! A `.env` file is loaded into the environment first when present.

use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use crate::infrastructure::db::PoolSettings;
use crate::infrastructure::security::keyring::resolve_secret;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::{Validate, ValidationError};

pub const CONFIG_FILE: &str = "wardroute.toml";
pub const ENV_PREFIX: &str = "WARDROUTE_";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    #[validate(length(min = 1))]
    pub host: String,
    pub port: u16,
    #[validate(length(min = 1))]
    pub database: String,
    #[validate(length(min = 1))]
    pub username: String,
    /// `env:NAME`, `keychain:NAME`, `plain:VALUE` or a bare value.
    pub password_ref: Option<String>,
    pub ssl_mode: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "hospital".to_string(),
            username: "postgres".to_string(),
            password_ref: Some("env:DB_PASSWORD".to_string()),
            ssl_mode: "prefer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_pool_bounds"))]
pub struct PoolConfig {
    pub min_connections: u32,
    #[validate(range(min = 1, max = 100))]
    pub max_connections: u32,
    #[validate(range(min = 1))]
    pub acquire_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u64,
    #[validate(range(max = 10))]
    pub connect_retries: u32,
    pub retry_backoff_ms: u64,
    pub health_check_on_acquire: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            acquire_timeout_ms: 5000,
            connect_timeout_ms: 10000,
            connect_retries: 3,
            retry_backoff_ms: 200,
            health_check_on_acquire: true,
        }
    }
}

impl PoolConfig {
    pub fn to_settings(&self) -> PoolSettings {
        PoolSettings {
            min_connections: self.min_connections as usize,
            max_connections: self.max_connections as usize,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            connect_retries: self.connect_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            health_check_on_acquire: self.health_check_on_acquire,
        }
    }
}

fn validate_pool_bounds(pool: &PoolConfig) -> std::result::Result<(), ValidationError> {
    if pool.min_connections > pool.max_connections {
        return Err(ValidationError::new("min_connections_exceeds_max"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_row_limits"))]
pub struct QueryConfig {
    #[validate(range(min = 1))]
    pub default_limit: u32,
    #[validate(range(min = 1))]
    pub max_limit: u32,
    /// Hard cap on rows read per statement, whatever the SQL says.
    #[validate(range(min = 1, max = 100000))]
    pub max_rows: u32,
    #[validate(range(min = 1))]
    pub statement_timeout_ms: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 200,
            max_rows: 500,
            statement_timeout_ms: 30000,
        }
    }
}

impl QueryConfig {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

fn validate_row_limits(query: &QueryConfig) -> std::result::Result<(), ValidationError> {
    if query.default_limit > query.max_limit || query.max_limit > query.max_rows {
        return Err(ValidationError::new("row_limits_out_of_order"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub results_dir: PathBuf,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("backend/result"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HttpConfig {
    #[validate(length(min = 1))]
    pub bind_address: String,
    #[validate(range(min = 1))]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AppConfig {
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[validate(nested)]
    pub pool: PoolConfig,
    #[validate(nested)]
    pub query: QueryConfig,
    #[validate(nested)]
    pub llm: LLMConfig,
    pub analysis: AnalysisConfig,
    #[validate(nested)]
    pub http: HttpConfig,
    pub log_filter: LogFilter,
}

/// `tracing-subscriber` env-filter directive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct LogFilter(pub String);

impl Default for LogFilter {
    fn default() -> Self {
        Self("info".to_string())
    }
}

pub struct ConfigService;

impl ConfigService {
    /// Load from `wardroute.toml` in the working directory plus environment.
    pub fn load() -> Result<AppConfig> {
        let _ = dotenvy::dotenv();
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<AppConfig> {
        let config: AppConfig = Self::figment(path)
            .extract()
            .map_err(|e| AppError::ConfigError(format!("Failed to load configuration: {}", e)))?;

        config
            .validate()
            .map_err(|e| AppError::ConfigError(format!("Invalid configuration: {}", e)))?;

        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn database_password(config: &DatabaseConfig) -> Result<String> {
        match config.password_ref.as_deref() {
            Some(reference) => resolve_secret(reference),
            None => Ok(String::new()),
        }
    }

    /// Resolve the LLM API key reference in place.
    pub fn resolve_llm_key(llm: &mut LLMConfig) -> Result<()> {
        if let Some(reference) = llm.api_key_ref.as_deref() {
            llm.api_key = Some(resolve_secret(reference)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool.max_connections, 10);
        assert_eq!(config.query.max_rows, 500);
        assert_eq!(config.llm.generation_timeout_ms, 8000);
        assert_eq!(config.log_filter, LogFilter("info".to_string()));
    }

    #[test]
    fn test_toml_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "wardroute.toml",
                r#"
                log_filter = "debug"

                [database]
                host = "db.internal"

                [pool]
                max_connections = 4
                "#,
            )?;
            jail.set_env("WARDROUTE_POOL__MAX_CONNECTIONS", "6");
            jail.set_env("WARDROUTE_QUERY__DEFAULT_LIMIT", "25");

            let config = ConfigService::load_from(Path::new("wardroute.toml"))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.database.host, "db.internal");
            assert_eq!(config.pool.max_connections, 6);
            assert_eq!(config.query.default_limit, 25);
            assert_eq!(config.log_filter.0, "debug");
            Ok(())
        });
    }

    #[test]
    fn test_min_above_max_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("WARDROUTE_POOL__MIN_CONNECTIONS", "8");
            jail.set_env("WARDROUTE_POOL__MAX_CONNECTIONS", "2");
            let result = ConfigService::load_from(Path::new("missing.toml"));
            assert!(matches!(result, Err(AppError::ConfigError(_))));
            Ok(())
        });
    }

    #[test]
    fn test_row_limits_must_be_ordered() {
        let query = QueryConfig {
            default_limit: 300,
            max_limit: 200,
            ..QueryConfig::default()
        };
        assert!(query.validate().is_err());
    }

    #[test]
    fn test_pool_settings_conversion() {
        let settings = PoolConfig::default().to_settings();
        assert_eq!(settings.max_connections, 10);
        assert_eq!(settings.acquire_timeout, Duration::from_millis(5000));
    }
}
