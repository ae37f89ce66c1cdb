use std::collections::HashMap;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Centralized metrics helper that attaches the same baseline labels
/// (pipeline, topic) to every metric it records
#[derive(Debug, Clone, Default)]
pub struct MetricsHelper {
    baseline_labels: HashMap<String, String>,
}

impl MetricsHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an additional baseline label
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.baseline_labels
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn counter(&self, name: &'static str) -> CounterHelper {
        CounterHelper {
            name,
            labels: self.baseline_labels.clone(),
        }
    }

    pub fn histogram(&self, name: &'static str) -> HistogramHelper {
        HistogramHelper {
            name,
            labels: self.baseline_labels.clone(),
        }
    }
}

/// Helper for counter metrics
pub struct CounterHelper {
    name: &'static str,
    labels: HashMap<String, String>,
}

impl CounterHelper {
    /// Add a label to this specific metric
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn increment(self, value: u64) {
        let labels: Vec<(String, String)> = self.labels.into_iter().collect();
        metrics::counter!(self.name, &labels).increment(value);
    }
}

/// Helper for histogram metrics
pub struct HistogramHelper {
    name: &'static str,
    labels: HashMap<String, String>,
}

impl HistogramHelper {
    /// Add a label to this specific metric
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn record(self, value: f64) {
        let labels: Vec<(String, String)> = self.labels.into_iter().collect();
        metrics::histogram!(self.name, &labels).record(value);
    }
}

/// Install the global Prometheus recorder.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    const EXPONENTIAL_MILLIS: &[f64] = &[
        1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_MILLIS)
        .context("Invalid histogram buckets")?
        .install_recorder()
        .context("Failed to install metrics recorder")
}

/// Add a `/metrics` endpoint rendering `handle` to `router`.
pub fn setup_metrics_routes(router: Router, handle: PrometheusHandle) -> Router {
    router
        .route(
            "/metrics",
            get(move || std::future::ready(handle.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics))
}

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Middleware to record some common HTTP metrics
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}
