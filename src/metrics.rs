use std::time::Duration;

use prometheus::{
    core::Collector, histogram_opts, opts, Encoder, Histogram, HistogramVec, IntCounterVec,
    IntGauge, Registry, TextEncoder,
};
use tracing::debug;

const TOKEN_BUCKETS: &[f64] = &[10.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0];
const LATENCY_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0];

#[derive(Clone)]
pub struct AppMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    requests_in_progress: IntGauge,
    request_duration_seconds: HistogramVec,
    generation_tokens: Histogram,
    generation_latency_seconds: HistogramVec,
    engine_errors_total: IntCounterVec,
}

/// Decrements the in-flight gauge when dropped. Owns a gauge handle so it can
/// travel inside a response stream.
pub struct InflightGuard {
    gauge: IntGauge,
}

impl AppMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            opts!("llm_requests_total", "Total number of requests"),
            &["method", "endpoint", "status"],
        )?;
        let requests_in_progress = IntGauge::new(
            "llm_requests_in_progress",
            "Number of requests currently being processed",
        )?;
        let request_duration_seconds = HistogramVec::new(
            histogram_opts!("llm_request_duration_seconds", "Request duration in seconds"),
            &["method", "endpoint"],
        )?;
        let generation_tokens = Histogram::with_opts(histogram_opts!(
            "llm_generation_tokens",
            "Number of tokens generated",
            TOKEN_BUCKETS.to_vec()
        ))?;
        let generation_latency_seconds = HistogramVec::new(
            histogram_opts!(
                "llm_generation_latency_seconds",
                "Time to first token and total generation time",
                LATENCY_BUCKETS.to_vec()
            ),
            &["metric_type"],
        )?;
        let engine_errors_total = IntCounterVec::new(
            opts!("llm_engine_errors_total", "Total number of engine errors"),
            &["error_type"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(requests_in_progress.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(generation_tokens.clone()))?;
        registry.register(Box::new(generation_latency_seconds.clone()))?;
        registry.register(Box::new(engine_errors_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            requests_in_progress,
            request_duration_seconds,
            generation_tokens,
            generation_latency_seconds,
            engine_errors_total,
        })
    }

    pub fn inflight_guard(&self) -> InflightGuard {
        self.requests_in_progress.inc();
        InflightGuard {
            gauge: self.requests_in_progress.clone(),
        }
    }

    pub fn inflight(&self) -> i64 {
        self.requests_in_progress.get()
    }

    pub fn observe_request(&self, method: &str, endpoint: &str, status: u16, duration: Duration) {
        let status_label = status.to_string();
        match self
            .requests_total
            .get_metric_with_label_values(&[method, endpoint, &status_label])
        {
            Ok(counter) => counter.inc(),
            Err(error) => debug!(%error, "requests_total not recorded"),
        }
        match self
            .request_duration_seconds
            .get_metric_with_label_values(&[method, endpoint])
        {
            Ok(histogram) => histogram.observe(duration.as_secs_f64()),
            Err(error) => debug!(%error, "request_duration not recorded"),
        }
    }

    pub fn observe_generation(&self, completion_tokens: u32, total: Duration) {
        self.generation_tokens.observe(f64::from(completion_tokens));
        self.observe_latency("total", total);
    }

    pub fn observe_time_to_first_content(&self, elapsed: Duration) {
        self.observe_latency("ttft", elapsed);
    }

    pub fn observe_error(&self, error_type: &str) {
        match self
            .engine_errors_total
            .get_metric_with_label_values(&[error_type])
        {
            Ok(counter) => counter.inc(),
            Err(error) => debug!(%error, "engine_errors_total not recorded"),
        }
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total
            .collect()
            .iter()
            .flat_map(|family| family.get_metric())
            .map(|metric| metric.get_counter().get_value() as u64)
            .sum()
    }

    pub fn errors_of(&self, error_type: &str) -> u64 {
        self.engine_errors_total
            .get_metric_with_label_values(&[error_type])
            .map(|counter| counter.get())
            .unwrap_or_default()
    }

    pub fn render(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|error| error.to_string())?;
        String::from_utf8(buffer).map_err(|error| error.to_string())
    }

    fn observe_latency(&self, metric_type: &str, elapsed: Duration) {
        match self
            .generation_latency_seconds
            .get_metric_with_label_values(&[metric_type])
        {
            Ok(histogram) => histogram.observe(elapsed.as_secs_f64()),
            Err(error) => debug!(%error, metric_type, "generation_latency not recorded"),
        }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inflight_guard_restores_gauge() {
        let metrics = AppMetrics::new().expect("metrics register");
        {
            let _first = metrics.inflight_guard();
            let _second = metrics.inflight_guard();
            assert_eq!(metrics.inflight(), 2);
        }
        assert_eq!(metrics.inflight(), 0);
    }

    #[test]
    fn render_exposes_named_series() {
        let metrics = AppMetrics::new().expect("metrics register");
        metrics.observe_request("POST", "/v1/chat/completions", 200, Duration::from_millis(12));
        metrics.observe_generation(7, Duration::from_millis(300));
        metrics.observe_time_to_first_content(Duration::from_millis(300));
        metrics.observe_error("timeout");

        let body = metrics.render().expect("render");
        assert!(body.contains(
            r#"llm_requests_total{endpoint="/v1/chat/completions",method="POST",status="200"} 1"#
        ));
        assert!(body.contains("llm_requests_in_progress 0"));
        assert!(body.contains("llm_generation_tokens_count 1"));
        assert!(body.contains(r#"llm_generation_latency_seconds_count{metric_type="ttft"} 1"#));
        assert!(body.contains(r#"llm_generation_latency_seconds_count{metric_type="total"} 1"#));
        assert!(body.contains(r#"llm_engine_errors_total{error_type="timeout"} 1"#));
        assert_eq!(metrics.requests_total(), 1);
        assert_eq!(metrics.errors_of("timeout"), 1);
    }

    #[test]
    fn instances_do_not_share_state() {
        let first = AppMetrics::new().expect("metrics register");
        let second = AppMetrics::new().expect("metrics register");
        first.observe_error("model");
        assert_eq!(second.errors_of("model"), 0);
    }
}
