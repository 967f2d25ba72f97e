//! Transports that carry trace context across process boundaries.
//!
//! - gRPC (via tonic): metadata interceptors, span helpers and an engine
//!   that serves a router behind the protocol multiplexer
//! - REST (via hyper and reqwest): an HTTP/1 engine with per-request server
//!   spans and a client that injects context headers
//! - Queue: a publish/subscribe abstraction whose messages carry the
//!   binary context frame, with an in-memory implementation
//!
//! ## Feature Flags
//!
//! - `grpc` (default): gRPC transport and the storage API bindings
//! - `rest` (default): REST transport

#[cfg(feature = "grpc")]
pub mod grpc;

#[cfg(feature = "grpc")]
pub mod proto;

#[cfg(feature = "rest")]
pub mod rest;

pub mod queue;

#[cfg(feature = "grpc")]
pub use grpc::{
    client_request, lazy_channel, server_span, ClientTraceInterceptor, IncomingContext,
    OutgoingContext, RpcEngine, ServerTraceInterceptor,
};

#[cfg(feature = "rest")]
pub use rest::{
    error_response, json_response, text_response, HttpResponse, RestEngine, RestHandler,
    RestRequest, RestResponse, TracedHttpClient,
};

pub use queue::{MemoryQueue, Message, Queue, Subscription, TracedQueue};
