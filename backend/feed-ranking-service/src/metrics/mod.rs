//! Feed Ranking Metrics
//!
//! Prometheus metrics for feed assembly, rollout decisions and the HTTP layer

use std::time::Duration;

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

use crate::services::distribution::RolloutAction;

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_ranking_http_requests_total",
        "Total HTTP requests handled by feed-ranking-service",
        &["method", "path", "status"]
    )
    .expect("Failed to register feed ranking http requests metric")
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "feed_ranking_http_request_duration_seconds",
        "HTTP request latency for feed-ranking-service",
        &["method", "path", "status"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register feed ranking http duration metric")
});

static FEED_ASSEMBLY_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "feed_assembly_duration_seconds",
        "Duration of feed assembly (success/error)",
        &["status"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register feed assembly duration metric")
});

static FEED_ITEMS_FILTERED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_items_filtered_total",
        "Candidates removed before or during ranking",
        &["reason"]
    )
    .expect("Failed to register feed items filtered metric")
});

static VISIBILITY_FAIL_OPEN_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "feed_visibility_fail_open_total",
        "Visibility lookups that failed and defaulted to visible"
    )
    .expect("Failed to register visibility fail-open metric")
});

static DIVERSITY_FALLBACK_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_diversity_fallback_items_total",
        "Items placed by the spacing starvation fallback",
        &["kind"]
    )
    .expect("Failed to register diversity fallback metric")
});

static ROLLOUT_TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_rollout_transitions_total",
        "Persisted rollout state changes by action",
        &["action"]
    )
    .expect("Failed to register rollout transitions metric")
});

static COUNTER_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_counter_failures_total",
        "Counter increments that failed (impression/interaction)",
        &["operation"]
    )
    .expect("Failed to register counter failures metric")
});

pub fn observe_http_request(method: &str, path: &str, status: u16, elapsed: Duration) {
    let status_label = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status_label])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path, &status_label])
        .observe(elapsed.as_secs_f64());
}

/// Record one feed assembly (success/error)
pub fn observe_feed_assembly(status: &str, elapsed: Duration) {
    FEED_ASSEMBLY_DURATION_SECONDS
        .with_label_values(&[status])
        .observe(elapsed.as_secs_f64());
}

/// Record candidates removed for `reason` (malformed/visibility/reach/dampening/capped)
pub fn record_filtered(reason: &str, count: usize) {
    if count > 0 {
        FEED_ITEMS_FILTERED_TOTAL
            .with_label_values(&[reason])
            .inc_by(count as u64);
    }
}

pub fn record_visibility_fail_open() {
    VISIBILITY_FAIL_OPEN_TOTAL.inc();
}

pub fn record_diversity_fallback(forced: usize, appended: usize) {
    DIVERSITY_FALLBACK_TOTAL
        .with_label_values(&["forced"])
        .inc_by(forced as u64);
    DIVERSITY_FALLBACK_TOTAL
        .with_label_values(&["appended"])
        .inc_by(appended as u64);
}

pub fn record_rollout_transition(action: &RolloutAction) {
    let label = match action {
        RolloutAction::Expand(_) => "expand",
        RolloutAction::Continue => "continue",
        RolloutAction::Freeze => "freeze",
        RolloutAction::Hold => "hold",
    };
    ROLLOUT_TRANSITIONS_TOTAL.with_label_values(&[label]).inc();
}

pub fn record_counter_failure(operation: &str) {
    COUNTER_FAILURES_TOTAL.with_label_values(&[operation]).inc();
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
