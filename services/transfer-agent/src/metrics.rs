// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Prometheus metrics for the transfer agent
//!
//! Exports metrics for monitoring server transfers including:
//! - Archive bytes downloaded
//! - Transfers by direction and outcome
//! - Errors by type, checksum mismatches
//! - Session duration

use std::sync::Once;

use prometheus::{
    Counter, CounterVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

use transfer_types::TransferDirection;

// Static metric initialization uses expect because these are compile-time
// constant definitions that cannot fail in practice. If they do fail, it indicates
// a programming error (e.g., invalid metric name) that should cause a panic at startup.
#[allow(clippy::expect_used)]
mod metrics_impl {
    use super::*;
    use lazy_static::lazy_static;

    lazy_static! {
        /// Registry for all agent metrics
        pub static ref REGISTRY: Registry = Registry::new();

        /// Archive bytes written to disk by incoming transfers
        pub static ref BYTES_DOWNLOADED: Counter = Counter::with_opts(
            Opts::new("transfer_agent_bytes_downloaded_total", "Total archive bytes downloaded")
        ).expect("valid metric name");

        /// Transfers by direction (outgoing, incoming) and outcome (success, failure)
        pub static ref TRANSFERS_TOTAL: CounterVec = CounterVec::new(
            Opts::new("transfer_agent_transfers_total", "Transfers by direction and outcome"),
            &["direction", "outcome"]
        ).expect("valid metric name and labels");

        /// Errors by type
        pub static ref ERRORS_TOTAL: CounterVec = CounterVec::new(
            Opts::new("transfer_agent_errors_total", "Transfer errors by type"),
            &["error_type"]
        ).expect("valid metric name and labels");

        /// Downloads rejected because the computed checksum did not match
        pub static ref CHECKSUM_MISMATCHES: Counter = Counter::with_opts(
            Opts::new(
                "transfer_agent_checksum_mismatches_total",
                "Downloaded archives whose checksum did not match the source"
            )
        ).expect("valid metric name");

        /// Failures to remove downloaded archives or partially extracted data
        pub static ref CLEANUP_FAILURES: Counter = Counter::with_opts(
            Opts::new(
                "transfer_agent_cleanup_failures_total",
                "Total cleanup failures (e.g., failed to remove archive files)"
            )
        ).expect("valid metric name");

        /// Session duration by direction
        pub static ref TRANSFER_DURATION: HistogramVec = HistogramVec::new(
            HistogramOpts::new(
                "transfer_agent_transfer_duration_seconds",
                "Transfer session duration in seconds"
            )
            // Buckets: 1s, 5s, 10s, 30s, 1m, 5m, 15m, 30m, 1h, 2h
            .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0]),
            &["direction"]
        ).expect("valid histogram opts");
    }
}

pub use metrics_impl::{
    BYTES_DOWNLOADED, CHECKSUM_MISMATCHES, CLEANUP_FAILURES, ERRORS_TOTAL, REGISTRY,
    TRANSFER_DURATION, TRANSFERS_TOTAL,
};

static REGISTER: Once = Once::new();

/// Register all metrics with the registry
///
/// Safe to call more than once; only the first call registers.
/// Panics if registration fails (indicates a programming error).
#[allow(clippy::expect_used)]
pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(BYTES_DOWNLOADED.clone()))
            .expect("Failed to register BYTES_DOWNLOADED");
        REGISTRY
            .register(Box::new(TRANSFERS_TOTAL.clone()))
            .expect("Failed to register TRANSFERS_TOTAL");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("Failed to register ERRORS_TOTAL");
        REGISTRY
            .register(Box::new(CHECKSUM_MISMATCHES.clone()))
            .expect("Failed to register CHECKSUM_MISMATCHES");
        REGISTRY
            .register(Box::new(CLEANUP_FAILURES.clone()))
            .expect("Failed to register CLEANUP_FAILURES");
        REGISTRY
            .register(Box::new(TRANSFER_DURATION.clone()))
            .expect("Failed to register TRANSFER_DURATION");
    });
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

pub fn record_bytes_downloaded(bytes: u64) {
    BYTES_DOWNLOADED.inc_by(bytes as f64);
}

pub fn record_transfer_succeeded(direction: TransferDirection, duration_secs: f64) {
    let direction = direction.to_string();
    TRANSFERS_TOTAL
        .with_label_values(&[direction.as_str(), "success"])
        .inc();
    TRANSFER_DURATION
        .with_label_values(&[direction.as_str()])
        .observe(duration_secs);
}

pub fn record_transfer_failed(direction: TransferDirection, error_type: &str, duration_secs: f64) {
    let direction = direction.to_string();
    TRANSFERS_TOTAL
        .with_label_values(&[direction.as_str(), "failure"])
        .inc();
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
    TRANSFER_DURATION
        .with_label_values(&[direction.as_str()])
        .observe(duration_secs);
}

pub fn record_checksum_mismatch() {
    CHECKSUM_MISMATCHES.inc();
}

/// Record a cleanup failure
///
/// Call this when removing a downloaded archive or partially extracted data
/// fails. The session's outcome is unaffected.
pub fn record_cleanup_failure() {
    CLEANUP_FAILURES.inc();
}
