//! Prelude module for convenient imports.
//!
//! ```rust
//! use tracemux::prelude::*;
//! ```
//!
//! This provides access to:
//! - Configuration types
//! - Error types
//! - The dual-protocol server and its engines
//! - Trace context, propagators and the tracer
//! - Storage and the pipeline nodes

pub use crate::{
    config::{MuxConfig, PipelineConfig, Sampler, TimeoutPolicy, TracerConfig},
    error::{Error, ErrorKind, Result},
    mux::{DualProtocolServer, Engine, MuxListener, Protocol, RejectEngine, ShutdownHandle},
    storage::{MemoryStorage, Resource, Storage},
    tracing_support::{
        ActiveSpan, BinaryPropagator, FinishedSpan, HttpHeaderPropagator, LogSink, MemorySink,
        Propagator, SpanKind, SpanSink, SpanTimeline, TraceContext, Tracer,
    },
    transport::{MemoryQueue, Queue, TracedQueue},
};

#[cfg(feature = "grpc")]
pub use crate::transport::{ClientTraceInterceptor, RpcEngine, ServerTraceInterceptor};

#[cfg(feature = "rest")]
pub use crate::transport::{RestEngine, RestHandler, RestRequest, TracedHttpClient};

#[cfg(all(feature = "grpc", feature = "rest"))]
pub use crate::pipeline::{GatewayNode, Pipeline, ServiceNode, StorageClient, StorageNode, Worker};
