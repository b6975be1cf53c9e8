//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

static INIT: Once = Once::new();

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedsig_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");

    // Signing Metrics
    pub static ref SIGNED_REQUESTS_TOTAL: IntCounter = IntCounter::new(
        "fedsig_signed_requests_total",
        "Total number of outbound requests signed"
    ).expect("metric can be created");
    pub static ref DELIVERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedsig_deliveries_total", "Total number of delivery attempts"),
        &["status"]
    ).expect("metric can be created");

    // Verification Metrics
    pub static ref VERIFICATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedsig_verifications_total", "Total number of inbound signature verifications"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref FEDERATION_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "fedsig_federation_request_duration_seconds",
            "Federation request duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["direction"]
    ).expect("metric can be created");

    // Key Cache Metrics
    pub static ref KEY_CACHE_LOOKUPS_TOTAL: IntCounter = IntCounter::new(
        "fedsig_key_cache_lookups_total",
        "Total number of public key lookups"
    ).expect("metric can be created");
    pub static ref KEY_FETCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedsig_key_fetches_total", "Total number of remote public key fetches"),
        &["status"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedsig_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
///
/// Registers every instrument exactly once; later calls are no-ops.
pub fn init_metrics() {
    INIT.call_once(register_all);
}

fn register_all() {
    REGISTRY
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("HTTP_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(SIGNED_REQUESTS_TOTAL.clone()))
        .expect("SIGNED_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(DELIVERIES_TOTAL.clone()))
        .expect("DELIVERIES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(VERIFICATIONS_TOTAL.clone()))
        .expect("VERIFICATIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(FEDERATION_REQUEST_DURATION_SECONDS.clone()))
        .expect("FEDERATION_REQUEST_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(KEY_CACHE_LOOKUPS_TOTAL.clone()))
        .expect("KEY_CACHE_LOOKUPS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(KEY_FETCHES_TOTAL.clone()))
        .expect("KEY_FETCHES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}
