//! Configuration for the balance ledger service
//!
//! Sources, lowest precedence first: built-in defaults, an optional config
//! file (`CONFIG_FILE` or `config/{ENVIRONMENT}`), `BALANCE_LEDGER__*`
//! variables, then the flat `DB_*` / `SERVER_PORT` variables used by
//! container deployments.

use crate::error::{LedgerError, Result};
use crate::types::STORED_SCALE;
use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub retry: RetryConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    /// Deadline applied to every engine call
    pub request_timeout_ms: u64,
    /// Requests slower than this are logged with `slow = true`
    pub slow_request_ms: u64,
}

/// PostgreSQL connection parameters and pool tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    /// One of disable, allow, prefer, require, verify-ca, verify-full
    pub ssl_mode: String,
    pub max_open_connections: u32,
    pub max_idle_connections: u32,
    pub max_lifetime_secs: u64,
    pub max_idle_time_secs: u64,
    /// Bound on a single connect-and-ping attempt
    pub connect_timeout_secs: u64,
    pub run_migrations: bool,
}

/// Startup retry budget for the connection supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Fractional digits accepted in transaction amounts
    pub decimal_places: u32,
    pub duplicate_policy: DuplicatePolicy,
}

/// How the HTTP layer answers a replayed transaction ID.
///
/// The engine always reports the duplicate; this only changes the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// 409 Conflict
    Reject,
    /// 200 OK, "transaction already processed"
    Acknowledge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

const SSL_MODES: &[&str] = &["disable", "allow", "prefer", "require", "verify-ca", "verify-full"];

/// Flat deployment variables and the keys they override
const FLAT_OVERRIDES: &[(&str, &str)] = &[
    ("DB_HOST", "database.host"),
    ("DB_PORT", "database.port"),
    ("DB_NAME", "database.name"),
    ("DB_SSLMODE", "database.ssl_mode"),
    ("DB_MAX_OPEN_CONNS", "database.max_open_connections"),
    ("DB_MAX_IDLE_CONNS", "database.max_idle_connections"),
    ("DB_CONN_MAX_LIFETIME", "database.max_lifetime_secs"),
    ("DB_CONN_MAX_IDLE_TIME", "database.max_idle_time_secs"),
    ("SERVER_PORT", "server.port"),
];

/// Credentials that may also come from a `<NAME>_FILE` secret
const SECRET_OVERRIDES: &[(&str, &str)] = &[
    ("DB_USER", "database.user"),
    ("DB_PASSWORD", "database.password"),
];

impl Config {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::load(std::env::vars().collect())
    }

    /// Load from an explicit variable map
    pub fn load(vars: HashMap<String, String>) -> Result<Self> {
        let environment = vars
            .get("ENVIRONMENT")
            .cloned()
            .unwrap_or_else(|| "development".to_string());

        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", 4)?
            .set_default("server.request_timeout_ms", 10_000)?
            .set_default("server.slow_request_ms", 500)?
            .set_default("database.host", "localhost")?
            .set_default("database.port", 5432)?
            .set_default("database.user", "postgres")?
            .set_default("database.password", "")?
            .set_default("database.name", "balance")?
            .set_default("database.ssl_mode", "disable")?
            .set_default("database.max_open_connections", 10)?
            .set_default("database.max_idle_connections", 5)?
            .set_default("database.max_lifetime_secs", 1800)?
            .set_default("database.max_idle_time_secs", 600)?
            .set_default("database.connect_timeout_secs", 10)?
            .set_default("database.run_migrations", false)?
            .set_default("retry.max_retries", 30)?
            .set_default("retry.initial_delay_ms", 1_000)?
            .set_default("retry.max_delay_ms", 30_000)?
            .set_default("ledger.decimal_places", 2)?
            .set_default("ledger.duplicate_policy", "reject")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "text")?;

        if let Some(config_file) = vars.get("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("BALANCE_LEDGER")
                .separator("__")
                .source(Some(vars.clone())),
        );

        for (var, key) in FLAT_OVERRIDES {
            if let Some(value) = vars.get(*var).filter(|v| !v.is_empty()) {
                builder = builder.set_override(*key, value.as_str())?;
            }
        }

        for (var, key) in SECRET_OVERRIDES {
            if let Some(secret) = read_env_or_file(&vars, var)? {
                builder = builder.set_override(*key, secret)?;
            }
        }

        let config: Config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(LedgerError::Config("Server port cannot be 0".to_string()));
        }

        if self.server.request_timeout_ms == 0 {
            return Err(LedgerError::Config(
                "Request timeout must be positive".to_string(),
            ));
        }

        let db = &self.database;
        if db.host.is_empty() {
            return Err(LedgerError::Config("Database host is required".to_string()));
        }

        if db.port == 0 {
            return Err(LedgerError::Config("Database port cannot be 0".to_string()));
        }

        if db.name.is_empty() {
            return Err(LedgerError::Config("Database name is required".to_string()));
        }

        if !SSL_MODES.contains(&db.ssl_mode.as_str()) {
            return Err(LedgerError::Config(format!(
                "Unknown SSL mode '{}'",
                db.ssl_mode
            )));
        }

        if db.max_open_connections == 0 {
            return Err(LedgerError::Config(
                "At least one open connection is required".to_string(),
            ));
        }

        if db.max_idle_connections > db.max_open_connections {
            return Err(LedgerError::Config(format!(
                "max idle connections ({}) exceeds max open connections ({})",
                db.max_idle_connections, db.max_open_connections
            )));
        }

        if self.retry.max_retries == 0 || self.retry.initial_delay_ms == 0 {
            return Err(LedgerError::Config(
                "Retry budget must allow at least one attempt with a positive delay".to_string(),
            ));
        }

        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(LedgerError::Config(
                "Maximum retry delay is below the initial delay".to_string(),
            ));
        }

        // Balances are stored at a fixed scale; finer amounts would be rounded on write
        if self.ledger.decimal_places > STORED_SCALE {
            return Err(LedgerError::Config(format!(
                "ledger.decimal_places ({}) exceeds the stored scale of {}",
                self.ledger.decimal_places, STORED_SCALE
            )));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    pub fn slow_request_threshold(&self) -> Duration {
        Duration::from_millis(self.server.slow_request_ms)
    }
}

impl DatabaseConfig {
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    pub fn max_idle_time(&self) -> Duration {
        Duration::from_secs(self.max_idle_time_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Value of `key`, or the trimmed contents of the file named by `<key>_FILE`
fn read_env_or_file(vars: &HashMap<String, String>, key: &str) -> Result<Option<String>> {
    if let Some(value) = vars.get(key).filter(|v| !v.is_empty()) {
        return Ok(Some(value.clone()));
    }

    let file_key = format!("{}_FILE", key);
    match vars.get(&file_key).filter(|v| !v.is_empty()) {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| {
                LedgerError::Config(format!("Failed to read secret file {}: {}", path, e))
            })?;
            Ok(Some(content.trim().to_string()))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = Config::load(HashMap::new()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.max_open_connections, 10);
        assert_eq!(config.database.max_idle_connections, 5);
        assert_eq!(config.retry.max_retries, 30);
        assert_eq!(config.ledger.decimal_places, 2);
        assert_eq!(config.ledger.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.slow_request_threshold(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flat_variables_override_defaults() {
        let config = Config::load(vars(&[
            ("DB_HOST", "postgres"),
            ("DB_PORT", "6543"),
            ("DB_NAME", "wallets"),
            ("DB_SSLMODE", "require"),
            ("DB_MAX_OPEN_CONNS", "20"),
            ("DB_CONN_MAX_LIFETIME", "60"),
            ("SERVER_PORT", "9000"),
        ]))
        .unwrap();

        assert_eq!(config.database.host, "postgres");
        assert_eq!(config.database.port, 6543);
        assert_eq!(config.database.name, "wallets");
        assert_eq!(config.database.ssl_mode, "require");
        assert_eq!(config.database.max_open_connections, 20);
        assert_eq!(config.database.max_lifetime(), Duration::from_secs(60));
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_prefixed_variables() {
        let config = Config::load(vars(&[
            ("BALANCE_LEDGER__LEDGER__DUPLICATE_POLICY", "acknowledge"),
            ("BALANCE_LEDGER__LOGGING__FORMAT", "json"),
        ]))
        .unwrap();

        assert_eq!(config.ledger.duplicate_policy, DuplicatePolicy::Acknowledge);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_password_from_secret_file() {
        let mut secret = tempfile::NamedTempFile::new().unwrap();
        writeln!(secret, "  s3cret  ").unwrap();
        let path = secret.path().to_string_lossy().to_string();

        let config = Config::load(vars(&[("DB_PASSWORD_FILE", path.as_str())])).unwrap();
        assert_eq!(config.database.password, "s3cret");
    }

    #[test]
    fn test_plain_variable_wins_over_secret_file() {
        let config = Config::load(vars(&[
            ("DB_USER", "ledger"),
            ("DB_USER_FILE", "/nonexistent/secret"),
        ]))
        .unwrap();
        assert_eq!(config.database.user, "ledger");
    }

    #[test]
    fn test_missing_secret_file_is_an_error() {
        let err = Config::load(vars(&[("DB_PASSWORD_FILE", "/nonexistent/secret")])).unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_idle_above_open() {
        let mut config = Config::load(HashMap::new()).unwrap();
        config.database.max_idle_connections = config.database.max_open_connections + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_ssl_mode() {
        let mut config = Config::load(HashMap::new()).unwrap();
        config.database.ssl_mode = "sometimes".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_decimal_places_beyond_stored_scale() {
        let config = Config::load(vars(&[("BALANCE_LEDGER__LEDGER__DECIMAL_PLACES", "3")])).unwrap();
        assert_eq!(config.ledger.decimal_places, 3);
        assert!(matches!(config.validate(), Err(LedgerError::Config(_))));

        let config = Config::load(vars(&[("BALANCE_LEDGER__LEDGER__DECIMAL_PLACES", "1")])).unwrap();
        assert!(config.validate().is_ok());
    }
}
