//! # tracemux
//!
//! Serve gRPC and REST on one TCP port, and carry distributed trace context
//! across HTTP, gRPC and message queues.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tracemux::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> tracemux::Result<()> {
//!     let tracer = Tracer::with_sink("storage", Arc::new(LogSink));
//!     let node = StorageNode::new(Arc::new(MemoryStorage::new()), tracer.clone());
//!
//!     let server = DualProtocolServer::bind(MuxConfig::default()).await?;
//!     server
//!         .serve(node.rpc_engine(), RestEngine::new(node, tracer))
//!         .await
//! }
//! ```
//!
//! ## Key Concepts
//!
//! - **Sniffing**: each connection is classified from its first bytes; an
//!   HTTP/2 request with `content-type: application/grpc` goes to the RPC
//!   engine, anything else to the REST engine
//! - **No byte loss**: the bytes read while classifying are replayed to the
//!   chosen engine
//! - **Propagation**: `x-trace-*` headers for HTTP and gRPC, a
//!   length-prefixed frame for queue payloads
//! - **No global tracer**: every component receives a [`Tracer`] handle
//!
//! ## Features
//!
//! - `grpc` (default): gRPC transport via tonic
//! - `rest` (default): REST transport via hyper and reqwest
//! - `rustls` (default): Use rustls for the REST client's TLS
//! - `native-tls`: Use native TLS for the REST client
//!
//! [`Tracer`]: tracing_support::Tracer

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

// Core modules
pub mod config;
pub mod error;
pub mod storage;
pub mod tracing_support;

// Protocol multiplexing
pub mod mux;

// Transport layer
pub mod transport;

// Demo pipeline
#[cfg(all(feature = "grpc", feature = "rest"))]
#[cfg_attr(docsrs, doc(cfg(all(feature = "grpc", feature = "rest"))))]
pub mod pipeline;

// Prelude for convenient imports
pub mod prelude;

// Re-export main types at crate root for convenience
pub use error::{Error, ErrorKind, Result};
