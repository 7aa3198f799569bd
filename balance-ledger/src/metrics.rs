//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `balance_ledger_transactions_applied_total{direction}` - Committed transactions
//! - `balance_ledger_transactions_rejected_total{kind}` - Rejections by error kind
//! - `balance_ledger_balance_reads_total` - Balance lookups served
//! - `balance_ledger_apply_duration_seconds` - Apply latency, including lock wait

use crate::error::ErrorKind;
use crate::types::Direction;
use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, Encoder, Histogram, HistogramOpts, IntCounter,
    IntCounterVec, Opts, Registry, TextEncoder,
};

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed transactions by direction
    pub transactions_applied: IntCounterVec,

    /// Rejected transactions by error kind
    pub transactions_rejected: IntCounterVec,

    /// Balance lookups
    pub balance_reads: IntCounter,

    /// Apply duration histogram
    pub apply_duration: Histogram,

    registry: Registry,
}

impl Metrics {
    /// Create a collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let transactions_applied = register_int_counter_vec_with_registry!(
            Opts::new(
                "balance_ledger_transactions_applied_total",
                "Transactions committed to the ledger"
            ),
            &["direction"],
            registry
        )?;

        let transactions_rejected = register_int_counter_vec_with_registry!(
            Opts::new(
                "balance_ledger_transactions_rejected_total",
                "Transactions rejected, by error kind"
            ),
            &["kind"],
            registry
        )?;

        let balance_reads = register_int_counter_with_registry!(
            Opts::new("balance_ledger_balance_reads_total", "Balance lookups served"),
            registry
        )?;

        let apply_duration = register_histogram_with_registry!(
            HistogramOpts::new(
                "balance_ledger_apply_duration_seconds",
                "Transaction apply latency"
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 5.0]),
            registry
        )?;

        Ok(Self {
            transactions_applied,
            transactions_rejected,
            balance_reads,
            apply_duration,
            registry,
        })
    }

    pub fn record_applied(&self, direction: Direction, duration_seconds: f64) {
        self.transactions_applied
            .with_label_values(&[direction.as_str()])
            .inc();
        self.apply_duration.observe(duration_seconds);
    }

    pub fn record_rejected(&self, kind: ErrorKind) {
        self.transactions_rejected
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub fn record_balance_read(&self) {
        self.balance_reads.inc();
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
