//! Balance ledger HTTP server binary

use actix_web::{middleware, web, App, HttpServer};
use balance_ledger::config::{LogFormat, LoggingConfig};
use balance_ledger::handlers::{self, AppState};
use balance_ledger::metrics::Metrics;
use balance_ledger::middleware::RequestLog;
use balance_ledger::{supervisor, Config, ErrorKind, LedgerEngine, PgStore};
use dotenv::dotenv;
use std::sync::Arc;
use tracing::{error, info, info_span};
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env()?;
    config.validate()?;

    init_tracing(&config.logging);

    info!("Starting balance ledger on port {}", config.server.port);

    let pool = match supervisor::establish(&config.database, &config.retry).await {
        Ok(pool) => pool,
        Err(e) if e.kind() == ErrorKind::StorageUnreachable => {
            error!(error = %e, "Database unreachable, shutting down");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    if config.database.run_migrations {
        supervisor::run_migrations(&pool).await?;
    }

    let store = PgStore::new(pool.clone()).with_span(info_span!("store"));
    let engine = LedgerEngine::new(Arc::new(store), config.ledger.decimal_places)
        .with_span(info_span!("ledger"));

    let state = web::Data::new(AppState {
        engine,
        metrics: Metrics::new()?,
        duplicate_policy: config.ledger.duplicate_policy,
        request_timeout: config.request_timeout(),
    });

    let request_log = RequestLog::new(config.slow_request_threshold());

    HttpServer::new(move || {
        App::new()
            .wrap(request_log)
            .wrap(middleware::NormalizePath::trim())
            .app_data(state.clone())
            .configure(handlers::configure_routes)
    })
    .workers(config.server.workers)
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    info!("Server stopped, closing database pool");
    pool.close().await;

    Ok(())
}
