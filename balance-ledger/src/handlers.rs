use crate::config::DuplicatePolicy;
use crate::engine::LedgerEngine;
use crate::error::{ErrorKind, LedgerError};
use crate::metrics::Metrics;
use crate::types::{AppliedTransaction, TransactionInput, UserId};
use actix_web::{web, HttpRequest, HttpResponse};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant as StdInstant};
use tokio::time::Instant;

pub const SOURCE_TYPE_HEADER: &str = "Source-Type";

/// Shared state handed to every handler
pub struct AppState {
    pub engine: LedgerEngine,
    pub metrics: Metrics,
    pub duplicate_policy: DuplicatePolicy,
    pub request_timeout: Duration,
}

impl AppState {
    fn deadline(&self) -> Instant {
        Instant::now() + self.request_timeout
    }

    fn format_amount(&self, amount: Decimal) -> String {
        format!("{:.*}", self.engine.decimal_places() as usize, amount)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPayload {
    pub state: String,
    pub amount: String,
    pub transaction_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_balance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub user_id: UserId,
    pub balance: String,
}

fn parse_user_id(raw: &str) -> Result<UserId, LedgerError> {
    raw.parse::<UserId>()
        .map_err(|_| LedgerError::invalid("userId must be a non-negative integer"))
}

/// Liveness probe
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().timestamp(),
        "service": "balance-ledger"
    }))
}

/// Readiness probe: the pool must answer
pub async fn readiness(state: web::Data<AppState>) -> HttpResponse {
    match state.engine.ping(state.deadline()).await {
        Ok(()) => HttpResponse::Ok().json(json!({
            "status": "ready",
            "timestamp": chrono::Utc::now().timestamp()
        })),
        Err(e) => HttpResponse::ServiceUnavailable().json(json!({
            "status": "unavailable",
            "type": e.kind().as_str()
        })),
    }
}

/// GET /user/{user_id}/balance
pub async fn get_balance(
    state: web::Data<AppState>,
    user_id: web::Path<String>,
) -> Result<HttpResponse, LedgerError> {
    let user_id = parse_user_id(&user_id)?;

    let balance = state.engine.get_balance(user_id, state.deadline()).await?;
    state.metrics.record_balance_read();

    Ok(HttpResponse::Ok().json(BalanceResponse {
        user_id,
        balance: state.format_amount(balance),
    }))
}

/// POST /user/{user_id}/transaction
pub async fn apply_transaction(
    state: web::Data<AppState>,
    user_id: web::Path<String>,
    request: HttpRequest,
    payload: web::Json<TransactionPayload>,
) -> Result<HttpResponse, LedgerError> {
    let started = StdInstant::now();

    let result = apply(&state, &user_id, &request, payload.into_inner()).await;

    match result {
        Ok(applied) => {
            state.metrics.record_applied(
                applied.transaction.direction,
                started.elapsed().as_secs_f64(),
            );

            Ok(HttpResponse::Ok().json(TransactionResponse {
                message: "transaction processed successfully".to_string(),
                old_balance: Some(state.format_amount(applied.old_balance)),
                new_balance: Some(state.format_amount(applied.new_balance)),
            }))
        }
        Err(e) => {
            state.metrics.record_rejected(e.kind());

            if e.kind() == ErrorKind::DuplicateTransaction
                && state.duplicate_policy == DuplicatePolicy::Acknowledge
            {
                return Ok(HttpResponse::Ok().json(TransactionResponse {
                    message: "transaction already processed".to_string(),
                    old_balance: None,
                    new_balance: None,
                }));
            }

            Err(e)
        }
    }
}

async fn apply(
    state: &AppState,
    raw_user_id: &str,
    request: &HttpRequest,
    payload: TransactionPayload,
) -> Result<AppliedTransaction, LedgerError> {
    let user_id = parse_user_id(raw_user_id)?;

    let source_type = request
        .headers()
        .get(SOURCE_TYPE_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| LedgerError::invalid("missing Source-Type header"))?;

    let input = TransactionInput {
        transaction_id: payload.transaction_id,
        direction: payload.state,
        source_type: source_type.to_string(),
        amount: payload.amount,
    };

    state
        .engine
        .apply_transaction(user_id, &input, state.deadline())
        .await
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint(state: web::Data<AppState>) -> HttpResponse {
    match state.metrics.render() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "error": "Failed to gather metrics",
            "details": e.to_string()
        })),
    }
}

/// Malformed JSON bodies get the same error shape as every other rejection
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(64 * 1024)
        .error_handler(|err, _req| LedgerError::invalid(format!("invalid JSON payload: {}", err)).into())
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .route("/health", web::get().to(health_check))
        .route("/ready", web::get().to(readiness))
        .route("/metrics", web::get().to(metrics_endpoint))
        .service(
            web::scope("/user/{user_id}")
                .route("/balance", web::get().to(get_balance))
                .route("/transaction", web::post().to(apply_transaction)),
        );
}
