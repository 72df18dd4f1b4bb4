use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, TextEncoder};

lazy_static! {
    pub static ref SHARES_SUBMITTED: IntCounter = IntCounter::new(
        "pool_shares_submitted_total",
        "Total number of shares submitted"
    ).unwrap();

    pub static ref SHARES_ACCEPTED: IntCounter = IntCounter::new(
        "pool_shares_accepted_total",
        "Total number of shares accepted, repetitious ones included"
    ).unwrap();

    pub static ref SHARES_REJECTED: IntCounter = IntCounter::new(
        "pool_shares_rejected_total",
        "Total number of shares rejected"
    ).unwrap();

    pub static ref SHARES_REPETITIOUS: IntCounter = IntCounter::new(
        "pool_shares_repetitious_total",
        "Total number of shares flagged as repetitious"
    ).unwrap();

    pub static ref BLOCKS_FOUND: IntCounter = IntCounter::new(
        "pool_blocks_found_total",
        "Total number of blocks found"
    ).unwrap();

    pub static ref WINDOWS_SETTLED: IntCounter = IntCounter::new(
        "pool_windows_settled_total",
        "Total number of windows settled"
    ).unwrap();

    pub static ref WINDOWS_VOIDED: IntCounter = IntCounter::new(
        "pool_windows_voided_total",
        "Total number of windows voided by orphaned blocks"
    ).unwrap();

    pub static ref ORACLE_FAILURES: IntCounter = IntCounter::new(
        "pool_oracle_failures_total",
        "Total number of failed block confirmation checks"
    ).unwrap();

    pub static ref AMOUNT_CREDITED: IntCounter = IntCounter::new(
        "pool_amount_credited_total",
        "Total amount credited to miners, in atomic units"
    ).unwrap();

    pub static ref AMOUNT_WITHDRAWN: IntCounter = IntCounter::new(
        "pool_amount_withdrawn_total",
        "Total amount withdrawn by miners, in atomic units"
    ).unwrap();

    pub static ref OPEN_WINDOW_ID: IntGauge = IntGauge::new(
        "pool_open_window_id",
        "Id of the currently open accounting window"
    ).unwrap();
}

pub fn register_metrics() -> prometheus::Result<()> {
    prometheus::register(Box::new(SHARES_SUBMITTED.clone()))?;
    prometheus::register(Box::new(SHARES_ACCEPTED.clone()))?;
    prometheus::register(Box::new(SHARES_REJECTED.clone()))?;
    prometheus::register(Box::new(SHARES_REPETITIOUS.clone()))?;
    prometheus::register(Box::new(BLOCKS_FOUND.clone()))?;
    prometheus::register(Box::new(WINDOWS_SETTLED.clone()))?;
    prometheus::register(Box::new(WINDOWS_VOIDED.clone()))?;
    prometheus::register(Box::new(ORACLE_FAILURES.clone()))?;
    prometheus::register(Box::new(AMOUNT_CREDITED.clone()))?;
    prometheus::register(Box::new(AMOUNT_WITHDRAWN.clone()))?;
    prometheus::register(Box::new(OPEN_WINDOW_ID.clone()))?;
    Ok(())
}

pub fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
