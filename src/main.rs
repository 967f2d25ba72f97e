//! Runs the storage, service, gateway and worker nodes in one process.
//!
//! Configuration comes from `TRACEMUX_*` environment variables and log
//! filtering from `RUST_LOG`. Spans are written to the log.
//!
//! Built with the `cli` feature: `cargo run --features cli`.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tracemux::config::PipelineConfig;
use tracemux::pipeline::Pipeline;
use tracemux::tracing_support::LogSink;
use tracemux::transport::MemoryQueue;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracemux=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("tracemux v{} starting", env!("CARGO_PKG_VERSION"));

    let config = PipelineConfig::from_env()?;
    tracing::info!(
        gateway = %config.gateway_addr,
        service = %config.service_addr,
        storage = %config.storage_addr,
        request_timeout_ms = config.request_timeout.as_millis() as u64,
        inject_failure = config.inject_failure,
        "configuration loaded"
    );

    let mut pipeline =
        Pipeline::start(&config, Arc::new(LogSink), Arc::new(MemoryQueue::new())).await?;
    tracing::info!(url = %pipeline.gateway_url(), "try: curl -X POST -d '{{\"value\":\"x\"}}'");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("interrupt received, shutting down");
        }
        result = pipeline.wait() => {
            tracing::error!("a node stopped unexpectedly");
            result?;
        }
    }

    pipeline.shutdown().await?;
    tracing::info!("shutdown complete");
    Ok(())
}
