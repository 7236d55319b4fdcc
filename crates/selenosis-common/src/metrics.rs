//! OpenTelemetry instruments for the selenosis operator
//!
//! Instruments are created lazily on the global meter, so they are no-ops
//! until a meter provider is installed by
//! [`init_telemetry`](crate::telemetry::init_telemetry).

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};

static METER: Lazy<Meter> = Lazy::new(|| global::meter("selenosis"));

// ============================================================================
// Reconciliation
// ============================================================================

/// Histogram of reconcile duration
///
/// Labels:
/// - `controller`: browser, browserconfig
/// - `result`: success, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("selenosis_reconcile_duration_seconds")
        .with_description("Duration of reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Counter of reconcile errors
///
/// Labels:
/// - `controller`: browser, browserconfig
/// - `error_type`: transient, permanent
pub static RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("selenosis_reconcile_errors_total")
        .with_description("Total number of reconciliation errors")
        .with_unit("{errors}")
        .build()
});

// ============================================================================
// Browser lifecycle
// ============================================================================

/// Counter of browser pods created
pub static PODS_CREATED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("selenosis_browser_pods_created_total")
        .with_description("Total number of browser pods created")
        .with_unit("{pods}")
        .build()
});

/// Counter of browsers moved to Failed
///
/// Labels:
/// - `reason`: the status reason recorded on the Browser
pub static BROWSER_FAILURES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("selenosis_browser_failures_total")
        .with_description("Total number of browsers that failed")
        .with_unit("{browsers}")
        .build()
});

// ============================================================================
// Config store
// ============================================================================

/// Gauge of resolved launch specs held by the config store
pub static CONFIG_STORE_ENTRIES: Lazy<Gauge<u64>> = Lazy::new(|| {
    METER
        .u64_gauge("selenosis_config_store_entries")
        .with_description("Number of browser/version entries in the config store")
        .with_unit("{entries}")
        .build()
});

/// Reconcile outcome label value
pub fn result_label(ok: bool) -> &'static str {
    if ok {
        "success"
    } else {
        "error"
    }
}

/// Record one reconcile pass on the duration histogram (and the error counter on failure)
pub fn observe_reconcile(controller: &'static str, started: std::time::Instant, ok: bool) {
    use opentelemetry::KeyValue;

    RECONCILE_DURATION.record(
        started.elapsed().as_secs_f64(),
        &[
            KeyValue::new("controller", controller),
            KeyValue::new("result", result_label(ok)),
        ],
    );
    if !ok {
        RECONCILE_ERRORS.add(1, &[KeyValue::new("controller", controller)]);
    }
}
