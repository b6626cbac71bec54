use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static GUARD_OUTCOMES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static VALIDATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static EXECUTION_TRANSITIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static RESULT_SETS_SWEPT_TOTAL: OnceLock<IntCounter> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new("sqlgate_http_requests_total", "Gateway HTTP request count."),
                &["route", "method", "status"],
            )
            .expect("create sqlgate_http_requests_total"),
        )
    })
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "sqlgate_http_request_duration_seconds",
                    "Gateway HTTP request duration in seconds.",
                )
                .buckets(vec![
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ]),
                &["route", "method", "outcome"],
            )
            .expect("create sqlgate_http_request_duration_seconds"),
        )
    })
}

fn guard_outcomes_total() -> &'static IntCounterVec {
    GUARD_OUTCOMES_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "sqlgate_guard_outcomes_total",
                    "Classification guard outcomes (rewritten, passthrough, denied, unsupported).",
                ),
                &["outcome"],
            )
            .expect("create sqlgate_guard_outcomes_total"),
        )
    })
}

fn validations_total() -> &'static IntCounterVec {
    VALIDATIONS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new("sqlgate_validations_total", "SQL validation results."),
                &["outcome", "limit_applied"],
            )
            .expect("create sqlgate_validations_total"),
        )
    })
}

fn execution_transitions_total() -> &'static IntCounterVec {
    EXECUTION_TRANSITIONS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "sqlgate_execution_transitions_total",
                    "Execution status transitions recorded by the gateway.",
                ),
                &["status"],
            )
            .expect("create sqlgate_execution_transitions_total"),
        )
    })
}

fn result_sets_swept_total() -> &'static IntCounter {
    RESULT_SETS_SWEPT_TOTAL.get_or_init(|| {
        register_collector(
            IntCounter::new(
                "sqlgate_result_sets_swept_total",
                "Expired result sets deleted by the expiry sweep.",
            )
            .expect("create sqlgate_result_sets_swept_total"),
        )
    })
}

pub fn observe_http_request(route: &str, method: &str, status: u16, duration: Duration) {
    let status_str = status.to_string();
    http_requests_total()
        .with_label_values(&[route, method, status_str.as_str()])
        .inc();

    let outcome = if (200..400).contains(&status) {
        "success"
    } else {
        "error"
    };
    http_request_duration_seconds()
        .with_label_values(&[route, method, outcome])
        .observe(duration.as_secs_f64());
}

pub fn observe_guard_outcome(outcome: &str) {
    guard_outcomes_total().with_label_values(&[outcome]).inc();
}

pub fn observe_validation(executable: bool, limit_applied: bool) {
    let outcome = if executable { "executable" } else { "blocked" };
    let limit_applied = if limit_applied { "true" } else { "false" };
    validations_total()
        .with_label_values(&[outcome, limit_applied])
        .inc();
}

pub fn observe_execution_transition(status: &str) {
    execution_transitions_total()
        .with_label_values(&[status])
        .inc();
}

pub fn inc_result_sets_swept(count: u64) {
    result_sets_swept_total().inc_by(count);
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = result_sets_swept_total();

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
