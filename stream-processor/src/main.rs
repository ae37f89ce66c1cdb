use anyhow::{Context, Result};
use axum::{routing::get, Router};
use futures::future::ready;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use stream_processor::{
    config::Config,
    metrics::{serve, setup_metrics_recorder, setup_metrics_routes},
    service::StreamProcessorService,
};

pub async fn index() -> &'static str {
    "stream processor service"
}

fn start_server(config: &Config, recorder_handle: PrometheusHandle) -> JoinHandle<()> {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(|| ready("ok")));
    let router = setup_metrics_routes(router, recorder_handle);

    let bind = config.bind_address();

    tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!("Failed to serve metrics on {bind}: {e:#}");
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_with_defaults()
        .context("Failed to load configuration from environment variables. Please check your environment setup.")?;

    // Initialize tracing
    let log_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .with_filter(EnvFilter::from_default_env())
        .boxed();

    tracing_subscriber::registry().with(log_layer).init();

    info!("Starting stream processor service");
    info!("Configuration loaded: {:?}", config);

    let recorder_handle = setup_metrics_recorder()?;
    let server_handle = start_server(&config, recorder_handle);
    info!("Started metrics server on {}", config.bind_address());

    let service = StreamProcessorService::new(config)
        .context("Failed to create stream processor service. Check your Kafka connection and pipeline configuration.")?;

    // Run the service (this blocks until shutdown)
    service.run().await?;

    // Clean up metrics server
    server_handle.abort();

    Ok(())
}
