//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Deployments (newly deployed vs reused)
//! - Transaction submissions
//! - Receipt polling
//! - Transactions handed off for manual signing

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec,
    TextEncoder,
};

lazy_static! {
    pub static ref DEPLOYMENTS: CounterVec = register_counter_vec!(
        "tesseract_deployer_deployments_total",
        "Deploy calls by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "tesseract_deployer_transactions_submitted_total",
        "Total transactions submitted",
        &["kind"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "tesseract_deployer_transactions_failed_total",
        "Total transactions that failed to submit or confirm",
        &["kind"]
    ).unwrap();

    pub static ref RECEIPT_POLLS: CounterVec = register_counter_vec!(
        "tesseract_deployer_receipt_polls_total",
        "Total receipt polls issued",
        &[]
    ).unwrap();

    pub static ref RECEIPT_LATENCY: HistogramVec = register_histogram_vec!(
        "tesseract_deployer_receipt_latency_seconds",
        "Time from first receipt poll to confirmation",
        &[],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    pub static ref MANUAL_ACTIONS: CounterVec = register_counter_vec!(
        "tesseract_deployer_manual_actions_total",
        "Transactions surfaced for out-of-band signing",
        &["skipped"]
    ).unwrap();
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_deployed() {
    DEPLOYMENTS.with_label_values(&["deployed"]).inc();
}

pub fn record_reused() {
    DEPLOYMENTS.with_label_values(&["reused"]).inc();
}

pub fn record_deploy_failed() {
    DEPLOYMENTS.with_label_values(&["failed"]).inc();
}

pub fn record_tx_submitted(kind: &str) {
    TX_SUBMITTED.with_label_values(&[kind]).inc();
}

pub fn record_tx_failed(kind: &str) {
    TX_FAILED.with_label_values(&[kind]).inc();
}

pub fn record_receipt_poll() {
    RECEIPT_POLLS.with_label_values(&[]).inc();
}

pub fn record_receipt_latency(latency_secs: f64) {
    RECEIPT_LATENCY.with_label_values(&[]).observe(latency_secs);
}

pub fn record_manual_action(skipped: bool) {
    MANUAL_ACTIONS
        .with_label_values(&[if skipped { "true" } else { "false" }])
        .inc();
}
