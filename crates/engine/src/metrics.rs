//! Prometheus metrics for the assignment engine.
//!
//! Metrics live in a crate-private registry; [`render`] encodes them in the
//! text exposition format.

use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Registry holding every engine metric.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static ASSIGNMENTS_COMMITTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "portrait_assignments_committed_total",
        "Total number of assignments committed",
    )
    .expect("metric creation failed")
});

pub static ASSIGNMENTS_FAILED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "portrait_assignments_failed_total",
            "Total number of assignments that ended without a commit",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub static COMPENSATING_DELETES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "portrait_compensating_deletes_total",
        "Total number of materialized copies removed after a failed commit path",
    )
    .expect("metric creation failed")
});

pub static COMPENSATION_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "portrait_compensation_failures_total",
        "Total number of compensating file actions that failed",
    )
    .expect("metric creation failed")
});

pub static RESETS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "portrait_resets_total",
        "Total number of assignments undone by reset or identity deletion",
    )
    .expect("metric creation failed")
});

pub static ASSIGNMENT_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "portrait_assignment_duration_seconds",
            "Time taken by an assignment from validation to commit or rollback",
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the engine registry.
///
/// Idempotent; every [`Engine`](crate::Engine) constructor calls it.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(ASSIGNMENTS_COMMITTED.clone()),
            Box::new(ASSIGNMENTS_FAILED.clone()),
            Box::new(COMPENSATING_DELETES.clone()),
            Box::new(COMPENSATION_FAILURES.clone()),
            Box::new(RESETS.clone()),
            Box::new(ASSIGNMENT_DURATION.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::error!(error = %e, "metric registration failed");
            }
        }
    });
}

/// Encode all engine metrics in the Prometheus text format.
pub fn render() -> String {
    register_metrics();
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
