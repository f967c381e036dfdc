//! Prometheus metrics endpoint and HTTP request tracking middleware.

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;

use crate::AppState;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const JOBS_TOTAL: &str = "jobs_total";
pub const JOB_RETRIES_TOTAL: &str = "job_retries_total";
pub const JOB_DURATION_SECONDS: &str = "job_duration_seconds";
pub const JOBS_QUEUED: &str = "jobs_queued";
pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "rate_limit_rejections_total";
pub const AI_FALLBACK_TOTAL: &str = "ai_fallback_total";

/// Install the Prometheus recorder. Returns `None` if one is already
/// installed in this process.
pub fn init_metrics() -> Option<PrometheusHandle> {
    let handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!("Failed to install Prometheus recorder: {}", e);
            return None;
        }
    };

    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request duration in seconds");
    describe_counter!(JOBS_TOTAL, "Finished background jobs by kind and status");
    describe_counter!(JOB_RETRIES_TOTAL, "Job attempts that failed and were retried");
    describe_histogram!(JOB_DURATION_SECONDS, "Wall time of a job from pickup to finish");
    describe_gauge!(JOBS_QUEUED, "Jobs waiting or in progress");
    describe_counter!(RATE_LIMIT_REJECTIONS_TOTAL, "Requests rejected by the rate limiter");
    describe_counter!(AI_FALLBACK_TOTAL, "Generations retried on the fallback model");

    Some(handle)
}

/// GET /metrics - Prometheus text format, no authentication.
pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    update_gauge_metrics(&state).await;

    match state.metrics_handle.as_ref() {
        Some(h) => (StatusCode::OK, h.render()),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Metrics not initialized".to_string(),
        ),
    }
}

async fn update_gauge_metrics(state: &AppState) {
    if let Ok(count) = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM jobs WHERE status IN ('pending', 'processing')",
    )
    .fetch_one(&state.db)
    .await
    {
        gauge!(JOBS_QUEUED).set(count as f64);
    }
}

/// Records `http_requests_total` and `http_request_duration_seconds`, keyed
/// by the matched route template rather than the raw path.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

pub fn record_job_finished(kind: &str, status: &str, duration_secs: f64) {
    counter!(JOBS_TOTAL, "kind" => kind.to_string(), "status" => status.to_string()).increment(1);
    histogram!(JOB_DURATION_SECONDS, "kind" => kind.to_string()).record(duration_secs);
}

pub fn record_job_retry(kind: &str) {
    counter!(JOB_RETRIES_TOTAL, "kind" => kind.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        for name in [HTTP_REQUESTS_TOTAL, JOBS_TOTAL, JOB_RETRIES_TOTAL, RATE_LIMIT_REJECTIONS_TOTAL, AI_FALLBACK_TOTAL] {
            assert!(name.ends_with("_total"));
        }
        assert!(HTTP_REQUEST_DURATION_SECONDS.ends_with("_seconds"));
        assert!(JOB_DURATION_SECONDS.ends_with("_seconds"));
    }
}
