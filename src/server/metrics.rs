use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all engine metrics
const PREFIX: &str = "osint";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref JOBS_SUBMITTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_submitted_total"), "Total accepted job submissions"),
        &["kind"]
    ).expect("Failed to create jobs_submitted_total metric");

    pub static ref JOBS_FINISHED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_finished_total"), "Jobs reaching a terminal state"),
        &["kind", "outcome"]
    ).expect("Failed to create jobs_finished_total metric");

    pub static ref JOB_RETRIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_job_retries_total"), "Retries scheduled after a failed attempt"),
        &["kind"]
    ).expect("Failed to create job_retries_total metric");

    pub static ref JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_job_duration_seconds"),
            "Wall time of a single job attempt in seconds"
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0]),
        &["kind"]
    ).expect("Failed to create job_duration_seconds metric");

    pub static ref ENRICHMENT_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_enrichment_failures_total"), "Failed enrichment calls"),
        &["service"]
    ).expect("Failed to create enrichment_failures_total metric");

    pub static ref PROXIES_HEALTHY: Gauge = Gauge::new(
        format!("{PREFIX}_proxies_healthy"),
        "Number of proxies currently selectable"
    ).expect("Failed to create proxies_healthy metric");

    pub static ref QUEUE_DEPTH: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_queue_depth"), "Jobs per lifecycle state"),
        &["state"]
    ).expect("Failed to create queue_depth metric");
}

/// Register all metrics with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(JOBS_SUBMITTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_FINISHED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_RETRIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(ENRICHMENT_FAILURES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROXIES_HEALTHY.clone()));
    let _ = REGISTRY.register(Box::new(QUEUE_DEPTH.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn record_job_submitted(kind: &str) {
    JOBS_SUBMITTED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_job_finished(kind: &str, outcome: &str) {
    JOBS_FINISHED_TOTAL.with_label_values(&[kind, outcome]).inc();
}

pub fn record_job_retry(kind: &str) {
    JOB_RETRIES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_job_duration(kind: &str, duration: Duration) {
    JOB_DURATION_SECONDS
        .with_label_values(&[kind])
        .observe(duration.as_secs_f64());
}

pub fn record_enrichment_failure(service: &str) {
    ENRICHMENT_FAILURES_TOTAL
        .with_label_values(&[service])
        .inc();
}

pub fn set_healthy_proxies(count: usize) {
    PROXIES_HEALTHY.set(count as f64);
}

pub fn set_queue_depth(state: &str, count: usize) {
    QUEUE_DEPTH.with_label_values(&[state]).set(count as f64);
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("Content-Type", encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_update_metrics() {
        init_metrics();
        record_job_submitted("email");
        record_job_finished("email", "completed");
        set_queue_depth("queued", 3);
        set_healthy_proxies(2);

        assert!(JOBS_SUBMITTED_TOTAL.with_label_values(&["email"]).get() >= 1.0);
        assert_eq!(QUEUE_DEPTH.with_label_values(&["queued"]).get(), 3.0);
        assert_eq!(PROXIES_HEALTHY.get(), 2.0);

        let names: Vec<String> = REGISTRY
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"osint_jobs_submitted_total".to_string()));
    }
}
