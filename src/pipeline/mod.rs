//! A four-node demo pipeline exercising every transport.
//!
//! ```text
//! client ──HTTP──▶ gateway ──HTTP──▶ service ──gRPC──▶ storage
//!                                       │
//!                                       └──queue──▶ worker
//! ```
//!
//! - [`GatewayNode`]: `POST /`, forwards the value to the service
//! - [`ServiceNode`]: `POST /resource`, saves through [`StorageClient`] and
//!   publishes a job
//! - [`StorageNode`]: the storage API over gRPC and REST on one port
//! - [`Worker`]: consumes jobs
//!
//! Every node has its own [`Tracer`] and all of them share one sink, so a
//! single request yields one connected span tree rooted at the gateway's
//! server span.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tracemux::config::PipelineConfig;
//! use tracemux::pipeline::Pipeline;
//! use tracemux::tracing_support::LogSink;
//! use tracemux::transport::MemoryQueue;
//!
//! # async fn run() -> tracemux::Result<()> {
//! let pipeline = Pipeline::start(
//!     &PipelineConfig::ephemeral(),
//!     Arc::new(LogSink),
//!     Arc::new(MemoryQueue::new()),
//! )
//! .await?;
//!
//! println!("gateway at {}", pipeline.gateway_url());
//! pipeline.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod gateway;
mod service;
mod storage_client;
mod storage_node;
mod worker;

use std::net::SocketAddr;
use std::sync::Arc;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::{MuxConfig, PipelineConfig};
use crate::mux::{DualProtocolServer, RejectEngine, ShutdownHandle};
use crate::storage::MemoryStorage;
use crate::tracing_support::{ActiveSpan, SpanSink, Tracer};
use crate::transport::queue::{Queue, TracedQueue};
use crate::transport::rest::{text_response, RestEngine, RestResponse, TracedHttpClient};
use crate::Error;

pub use gateway::GatewayNode;
pub use service::{ServiceNode, RESOURCE_PATH};
pub use storage_client::StorageClient;
pub use storage_node::{methods, StorageNode, RESOURCES_PATH};
pub use worker::{Worker, PROGRESS_STEPS};

/// Body of the gateway's and the service's `POST` endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRequest {
    /// The value to store.
    pub value: String,
}

/// Marks a handler span as failed and answers 500 with `body`.
fn fail_request(mut span: ActiveSpan, cause: &str, body: &str) -> RestResponse {
    span.set_error(&cause);
    span.finish();
    text_response(StatusCode::INTERNAL_SERVER_ERROR, body.to_string())
}

type NodeOutcome = (&'static str, Result<(), Error>);

/// The four nodes running in one process.
#[derive(Debug)]
pub struct Pipeline {
    gateway_addr: SocketAddr,
    service_addr: SocketAddr,
    storage_addr: SocketAddr,
    servers: Vec<ShutdownHandle>,
    nodes: JoinSet<NodeOutcome>,
    worker: JoinHandle<()>,
}

impl Pipeline {
    /// Binds every node, subscribes the worker and starts serving.
    ///
    /// Returns once all listeners are bound, so the addresses are final
    /// even for port 0.
    pub async fn start(
        config: &PipelineConfig,
        sink: Arc<dyn SpanSink>,
        queue: Arc<dyn Queue>,
    ) -> Result<Self, Error> {
        config.validate()?;

        let storage_server =
            DualProtocolServer::bind(MuxConfig::default().with_bind_addr(config.storage_addr))
                .await?;
        let service_server =
            DualProtocolServer::bind(MuxConfig::default().with_bind_addr(config.service_addr))
                .await?;
        let gateway_server =
            DualProtocolServer::bind(MuxConfig::default().with_bind_addr(config.gateway_addr))
                .await?;

        let storage_addr = storage_server.local_addr();
        let service_addr = service_server.local_addr();
        let gateway_addr = gateway_server.local_addr();
        let tracer = |service: &str| Tracer::with_sink(service, Arc::clone(&sink));

        // storage
        let storage_tracer = tracer("storage");
        let storage = StorageNode::new(Arc::new(MemoryStorage::new()), storage_tracer.clone());
        let storage_rpc = storage.rpc_engine();
        let storage_rest = RestEngine::new(storage, storage_tracer);

        // worker, subscribed before the service can publish
        let worker_queue = TracedQueue::new(Arc::clone(&queue), tracer("worker"));
        let subscription = worker_queue.subscribe(&config.queue_channel).await?;
        let worker = tokio::spawn(Worker::new(worker_queue).run(subscription));

        // service
        let service_tracer = tracer("service");
        let storage_client = StorageClient::connect_lazy(
            &format!("http://{storage_addr}"),
            config.request_timeout,
            service_tracer.clone(),
        )?;
        let service = ServiceNode::new(
            service_tracer.clone(),
            storage_client,
            TracedQueue::new(queue, service_tracer.clone()),
            config,
        );
        let service_rest = RestEngine::new(service, service_tracer);

        // gateway
        let gateway_tracer = tracer("gateway");
        let http = TracedHttpClient::new(gateway_tracer.clone(), config.request_timeout)?;
        let gateway = GatewayNode::new(
            gateway_tracer.clone(),
            http,
            &format!("http://{service_addr}{RESOURCE_PATH}"),
        )?;
        let gateway_rest = RestEngine::new(gateway, gateway_tracer);

        let servers = vec![
            storage_server.shutdown_handle(),
            service_server.shutdown_handle(),
            gateway_server.shutdown_handle(),
        ];

        let mut nodes = JoinSet::new();
        nodes.spawn(async move {
            let result = storage_server.serve(storage_rpc, storage_rest).await;
            ("storage", result)
        });
        nodes.spawn(async move {
            let rpc = RejectEngine::new("service-rpc");
            ("service", service_server.serve(rpc, service_rest).await)
        });
        nodes.spawn(async move {
            let rpc = RejectEngine::new("gateway-rpc");
            ("gateway", gateway_server.serve(rpc, gateway_rest).await)
        });

        tracing::info!(
            gateway = %gateway_addr,
            service = %service_addr,
            storage = %storage_addr,
            channel = %config.queue_channel,
            "pipeline started"
        );

        Ok(Self {
            gateway_addr,
            service_addr,
            storage_addr,
            servers,
            nodes,
            worker,
        })
    }

    /// Returns the gateway's address.
    pub fn gateway_addr(&self) -> SocketAddr {
        self.gateway_addr
    }

    /// Returns the service's address.
    pub fn service_addr(&self) -> SocketAddr {
        self.service_addr
    }

    /// Returns the storage node's address.
    pub fn storage_addr(&self) -> SocketAddr {
        self.storage_addr
    }

    /// Returns the URL clients post values to.
    pub fn gateway_url(&self) -> String {
        format!("http://{}/", self.gateway_addr)
    }

    /// Waits until a node stops on its own and returns why.
    ///
    /// Nodes only stop early when they fail, so this normally does not
    /// return until [`shutdown`](Self::shutdown) is requested elsewhere.
    pub async fn wait(&mut self) -> Result<(), Error> {
        match self.nodes.join_next().await {
            Some(joined) => node_result(joined),
            None => Ok(()),
        }
    }

    /// Stops every node and the worker.
    ///
    /// Returns the first node failure, if any.
    pub async fn shutdown(mut self) -> Result<(), Error> {
        for server in &self.servers {
            server.shutdown();
        }

        let mut first_error = None;
        while let Some(joined) = self.nodes.join_next().await {
            if let Err(err) = node_result(joined) {
                first_error.get_or_insert(err);
            }
        }

        self.worker.abort();
        tracing::info!("pipeline stopped");
        first_error.map_or(Ok(()), Err)
    }
}

fn node_result(joined: Result<NodeOutcome, tokio::task::JoinError>) -> Result<(), Error> {
    match joined {
        Ok((_, Ok(()))) => Ok(()),
        Ok((name, Err(err))) => {
            tracing::error!(node = name, error = %err, "node failed");
            Err(err)
        }
        Err(join_err) => Err(Error::internal(format!("node task failed: {join_err}"))),
    }
}
