//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `sonar_controller_reconciliations_total{kind}` - Reconcile passes started
//! - `sonar_controller_reconciliation_errors_total{kind}` - Reconcile passes that failed
//! - `sonar_controller_reconciliation_duration_seconds{kind}` - Duration of reconcile passes
//! - `sonar_controller_permission_changes_total{action}` - Grants and revokes applied to templates

use anyhow::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sonar_controller_reconciliations_total",
            "Total number of reconciliations by resource kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sonar_controller_reconciliation_errors_total",
            "Total number of reconciliation errors by resource kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "sonar_controller_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds by resource kind",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 120.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static PERMISSION_CHANGES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sonar_controller_permission_changes_total",
            "Total number of permission grants and revokes sent to Sonar",
        ),
        &["action"],
    )
    .expect("Failed to create PERMISSION_CHANGES_TOTAL metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(PERMISSION_CHANGES_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(kind: &str, seconds: f64) {
    RECONCILIATION_DURATION.with_label_values(&[kind]).observe(seconds);
}

/// `action` is `grant` or `revoke`.
pub fn record_permission_change(action: &str) {
    PERMISSION_CHANGES_TOTAL.with_label_values(&[action]).inc();
}
