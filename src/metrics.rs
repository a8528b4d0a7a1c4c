//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Auto-login metrics
    pub static ref AUTOLOGIN_KEYS_ISSUED: IntCounterVec = IntCounterVec::new(
        Opts::new("examgate_autologin_keys_issued_total", "Total number of auto-login keys issued"),
        &["call_site"]
    ).expect("metric can be created");
    pub static ref AUTOLOGIN_REDEMPTIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("examgate_autologin_redemptions_total", "Total number of auto-login redemption attempts"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref SESSIONS_ESTABLISHED: IntCounter = IntCounter::new(
        "examgate_sessions_established_total",
        "Total number of sessions established by auto-login"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("examgate_errors_total", "Total number of errors"),
        &["error_type", "endpoint"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(AUTOLOGIN_KEYS_ISSUED.clone()))
        .expect("AUTOLOGIN_KEYS_ISSUED can be registered");
    REGISTRY
        .register(Box::new(AUTOLOGIN_REDEMPTIONS.clone()))
        .expect("AUTOLOGIN_REDEMPTIONS can be registered");
    REGISTRY
        .register(Box::new(SESSIONS_ESTABLISHED.clone()))
        .expect("SESSIONS_ESTABLISHED can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");
}
