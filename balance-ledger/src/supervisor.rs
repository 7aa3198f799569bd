//! Connection supervisor
//!
//! Opens the PostgreSQL pool at startup. The database is often started
//! alongside the service, so failed attempts are retried with exponential
//! backoff until the budget runs out, at which point startup is fatal.

use crate::backoff::{retry_with_backoff, BackoffPolicy};
use crate::config::{DatabaseConfig, RetryConfig};
use crate::error::{LedgerError, Result};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use std::str::FromStr;
use tracing::{error, info};

pub type DbPool = PgPool;

/// Connection options for the configured server
pub fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions> {
    let ssl_mode = PgSslMode::from_str(&config.ssl_mode)
        .map_err(|e| LedgerError::Config(format!("Invalid SSL mode '{}': {}", config.ssl_mode, e)))?;

    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .database(&config.name)
        .ssl_mode(ssl_mode);

    if !config.password.is_empty() {
        options = options.password(&config.password);
    }

    Ok(options)
}

/// Pool sizing policy
pub fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_open_connections)
        // sqlx has no idle ceiling; keep that many connections warm instead
        .min_connections(config.max_idle_connections)
        .max_lifetime(config.max_lifetime())
        .idle_timeout(config.max_idle_time())
        .acquire_timeout(config.connect_timeout())
}

/// One connect-and-ping attempt
async fn connect_once(config: &DatabaseConfig, options: PgConnectOptions) -> Result<DbPool> {
    let attempt = async {
        let pool = pool_options(config).connect_with(options).await?;

        sqlx::query("SELECT 1").fetch_one(&pool).await?;

        Ok::<_, sqlx::Error>(pool)
    };

    match tokio::time::timeout(config.connect_timeout(), attempt).await {
        Ok(result) => result.map_err(LedgerError::from),
        Err(_) => Err(LedgerError::DeadlineExceeded(config.connect_timeout())),
    }
}

/// Establish a verified, pool-configured handle or fail with `StorageUnreachable`.
pub async fn establish(config: &DatabaseConfig, retry: &RetryConfig) -> Result<DbPool> {
    let options = connect_options(config)?;
    let policy = BackoffPolicy::from(retry);

    info!(
        host = %config.host,
        port = config.port,
        database = %config.name,
        max_attempts = policy.max_retries,
        "Connecting to database..."
    );

    let pool = retry_with_backoff(&policy, "database connect", |_| {
        connect_once(config, options.clone())
    })
    .await
    .map_err(|exhausted| {
        error!(
            attempts = exhausted.attempts,
            error = %exhausted.last_error,
            "Failed to connect to database after max retries"
        );
        LedgerError::StorageUnreachable {
            attempts: exhausted.attempts,
            last_error: exhausted.last_error.to_string(),
        }
    })?;

    info!(
        max_open = config.max_open_connections,
        max_idle = config.max_idle_connections,
        "Database connection pool created successfully"
    );

    Ok(pool)
}

/// Apply the bundled schema migrations
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}
