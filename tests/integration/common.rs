//! Common test harness for tracemux integration tests.
//!
//! Provides servers bound to ephemeral loopback ports and clients for them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tonic::transport::Channel;

use tracemux::config::MuxConfig;
use tracemux::mux::{DualProtocolServer, Engine, ShutdownHandle, SniffStats};
use tracemux::pipeline::StorageNode;
use tracemux::storage::MemoryStorage;
use tracemux::tracing_support::{MemorySink, Tracer};
use tracemux::transport::proto::resource_service_client::ResourceServiceClient;
use tracemux::transport::RestEngine;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// A dual-protocol server running on its own task.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: ShutdownHandle,
    pub stats: Arc<SniffStats>,
    pub sink: Arc<MemorySink>,
    pub task: JoinHandle<tracemux::Result<()>>,
}

impl TestServer {
    /// Starts a server with the given engines.
    pub async fn start<R: Engine, H: Engine>(
        config: MuxConfig,
        sink: Arc<MemorySink>,
        rpc: R,
        rest: H,
    ) -> Result<Self> {
        let server = DualProtocolServer::bind(config.with_bind_addr(loopback()))
            .await
            .context("Failed to bind test server")?;
        let addr = server.local_addr();
        let shutdown = server.shutdown_handle();
        let stats = server.stats();
        let task = tokio::spawn(server.serve(rpc, rest));
        Ok(Self {
            addr,
            shutdown,
            stats,
            sink,
            task,
        })
    }

    /// Starts a storage node over an empty in-memory store.
    pub async fn storage(config: MuxConfig) -> Result<Self> {
        let sink = Arc::new(MemorySink::new());
        let tracer = Tracer::with_sink("storage", sink.clone());
        let node = StorageNode::new(Arc::new(MemoryStorage::new()), tracer.clone());
        let rpc = node.rpc_engine();
        Self::start(config, sink, rpc, RestEngine::new(node, tracer)).await
    }

    /// Base URL for both HTTP/1 and gRPC clients.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Requests shutdown and waits for `serve` to return.
    pub async fn stop(self) -> Result<tracemux::Result<()>> {
        self.shutdown.shutdown();
        let joined = tokio::time::timeout(WAIT, self.task)
            .await
            .context("Server did not stop in time")?;
        joined.context("Server task panicked")
    }
}

/// An ephemeral loopback address.
pub fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

/// Connects a plain generated gRPC client, without trace interceptors.
pub async fn grpc_client(url: &str) -> Result<ResourceServiceClient<Channel>> {
    ResourceServiceClient::connect(url.to_string())
        .await
        .context("Failed to connect gRPC client")
}

/// A plain HTTP client.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(WAIT)
        .build()
        .expect("Failed to build HTTP client")
}
