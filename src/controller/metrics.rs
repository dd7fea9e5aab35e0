//! Prometheus metrics for the mesh-failover controller
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `mesh_failover_pass_duration_seconds` (histogram): reconciliation pass duration labeled by controller.
//! - `mesh_failover_pass_errors_total` (counter): failed passes labeled by controller and error kind.
//! - `mesh_failover_translations_total` (counter): FailoverService outcomes per pass labeled by stage and state.
//! - `mesh_failover_artifact_operations_total` (counter): artifact writes labeled by kind, cluster and operation.

use std::sync::atomic::AtomicU64;

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for pass duration metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PassLabels {
    /// Controller name, e.g. "failoverservice"
    pub controller: String,
}

/// Labels for pass error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind, e.g. "kube", "backend", "aggregate"
    pub kind: String,
}

/// Labels for per-FailoverService outcomes
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    /// "validation" or "translation"
    pub stage: String,
    /// ACCEPTED, INVALID or PROCESSING_ERROR
    pub state: String,
}

/// Labels for artifact writes
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ArtifactLabels {
    pub kind: String,
    pub cluster: String,
    /// "upsert" or "delete"
    pub operation: String,
}

/// Histogram tracking pass duration (seconds)
pub static PASS_DURATION_SECONDS: Lazy<Family<PassLabels, Histogram>> = Lazy::new(|| {
    fn pass_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(pass_histogram)
});

/// Counter tracking failed passes
pub static PASS_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter tracking validation and translation outcomes
pub static OUTCOMES_TOTAL: Lazy<Family<OutcomeLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter tracking artifact upserts and deletes
pub static ARTIFACT_OPERATIONS_TOTAL: Lazy<Family<ArtifactLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Global metrics registry. Counter names get their `_total` suffix when encoded.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "mesh_failover_pass_duration_seconds",
        "Duration of reconciliation passes in seconds",
        PASS_DURATION_SECONDS.clone(),
    );
    registry.register(
        "mesh_failover_pass_errors",
        "Total number of failed reconciliation passes",
        PASS_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "mesh_failover_translations",
        "FailoverService validation and translation outcomes per pass",
        OUTCOMES_TOTAL.clone(),
    );
    registry.register(
        "mesh_failover_artifact_operations",
        "Generated artifacts applied or deleted in workload clusters",
        ARTIFACT_OPERATIONS_TOTAL.clone(),
    );

    registry
});

/// Observe a pass duration in seconds.
pub fn observe_pass_duration_seconds(controller: &str, seconds: f64) {
    let labels = PassLabels {
        controller: controller.to_string(),
    };
    PASS_DURATION_SECONDS.get_or_create(&labels).observe(seconds);
}

/// Increment the pass error counter.
pub fn inc_pass_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    PASS_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_outcome(stage: &str, state: &str) {
    let labels = OutcomeLabels {
        stage: stage.to_string(),
        state: state.to_string(),
    };
    OUTCOMES_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_artifact_operation(kind: &str, cluster: &str, operation: &str) {
    let labels = ArtifactLabels {
        kind: kind.to_string(),
        cluster: cluster.to_string(),
        operation: operation.to_string(),
    };
    ARTIFACT_OPERATIONS_TOTAL.get_or_create(&labels).inc();
}
