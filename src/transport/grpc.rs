//! gRPC transport using tonic.
//!
//! Trace context crosses a gRPC call as request metadata with the same keys
//! as the HTTP headers. On the client, [`ClientTraceInterceptor`] injects the
//! context found in the request's [`OutgoingContext`] extension. On the
//! server, [`ServerTraceInterceptor`] extracts it into an
//! [`IncomingContext`] extension that handlers read through
//! [`server_span`].
//!
//! [`RpcEngine`] serves a tonic router over a [`MuxListener`], so gRPC
//! shares its port with REST.

use std::time::Duration;

use async_trait::async_trait;
use tonic::service::Interceptor;
use tonic::transport::server::Router;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Response, Status};

use crate::mux::{Engine, MuxListener};
use crate::tracing_support::{
    tag_keys, ActiveSpan, HttpHeaderPropagator, Propagator, SpanKind, TraceContext, Tracer,
};
use crate::Error;

// ============================================================================
// Context extensions
// ============================================================================

/// Context a client call should carry, set by the caller as a request
/// extension.
#[derive(Debug, Clone)]
pub struct OutgoingContext(pub TraceContext);

/// What the server interceptor found in the request metadata.
#[derive(Debug, Clone, Default)]
pub struct IncomingContext {
    context: Option<TraceContext>,
    malformed: Option<String>,
}

impl IncomingContext {
    /// Extracts the context from request metadata.
    pub fn from_metadata(metadata: &tonic::metadata::MetadataMap) -> Self {
        match HttpHeaderPropagator.extract(metadata) {
            Ok(context) => Self {
                context,
                malformed: None,
            },
            Err(err) => Self {
                context: None,
                malformed: Some(err.message().to_string()),
            },
        }
    }

    /// Returns the extracted context, if any.
    pub fn context(&self) -> Option<&TraceContext> {
        self.context.as_ref()
    }

    /// Returns `true` if the metadata held an undecodable context.
    pub fn is_malformed(&self) -> bool {
        self.malformed.is_some()
    }

    /// Converts back into the propagator's result.
    pub fn into_extracted(self) -> Result<Option<TraceContext>, Error> {
        match self.malformed {
            Some(message) => Err(Error::malformed_carrier(message)),
            None => Ok(self.context),
        }
    }
}

// ============================================================================
// Interceptors
// ============================================================================

/// Injects the request's [`OutgoingContext`] into its metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientTraceInterceptor;

impl Interceptor for ClientTraceInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let Some(OutgoingContext(context)) = request.extensions().get::<OutgoingContext>().cloned()
        else {
            return Ok(request);
        };
        HttpHeaderPropagator.inject(&context, request.metadata_mut())?;
        Ok(request)
    }
}

/// Extracts trace context from metadata into an [`IncomingContext`]
/// extension. Never rejects a call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerTraceInterceptor;

impl Interceptor for ServerTraceInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let incoming = IncomingContext::from_metadata(request.metadata());
        if incoming.is_malformed() {
            tracing::debug!("malformed trace metadata on incoming call");
        }
        request.extensions_mut().insert(incoming);
        Ok(request)
    }
}

// ============================================================================
// Span helpers
// ============================================================================

/// Starts the server span for an incoming call, named by the full method
/// path (`/package.Service/Method`).
///
/// Reads the [`IncomingContext`] extension, or the metadata directly when
/// the server interceptor is not installed.
pub fn server_span<T>(tracer: &Tracer, method: &str, request: &Request<T>) -> ActiveSpan {
    let incoming = request
        .extensions()
        .get::<IncomingContext>()
        .cloned()
        .unwrap_or_else(|| IncomingContext::from_metadata(request.metadata()));

    tracer
        .span(method)
        .kind(SpanKind::Server)
        .tag("rpc.method", method)
        .child_of_extracted(incoming.into_extracted())
        .start()
}

/// Starts a client span for an outgoing call and builds a request that
/// carries its context.
pub fn client_request<T>(
    tracer: &Tracer,
    parent: &TraceContext,
    method: &str,
    message: T,
) -> (ActiveSpan, Request<T>) {
    let span = tracer
        .span(method)
        .kind(SpanKind::Client)
        .tag("rpc.method", method)
        .child_of(parent)
        .start();
    let mut request = Request::new(message);
    request
        .extensions_mut()
        .insert(OutgoingContext(span.context().clone()));
    (span, request)
}

/// Tags a span with the call's status code, marking failures as errors.
pub fn record_status<T>(span: &mut ActiveSpan, result: &Result<Response<T>, Status>) {
    match result {
        Ok(_) => span.set_tag(tag_keys::RPC_CODE, Code::Ok as i32),
        Err(status) => {
            span.set_tag(tag_keys::RPC_CODE, status.code() as i32);
            span.set_error(&format!("{}: {}", status.code(), status.message()));
        }
    }
}

/// Creates a channel that connects on first use.
pub fn lazy_channel(url: &str, timeout: Duration) -> Result<Channel, Error> {
    let endpoint = Endpoint::from_shared(url.to_string())
        .map_err(|e| Error::configuration(format!("invalid gRPC endpoint {url:?}: {e}")))?
        .connect_timeout(timeout)
        .timeout(timeout);
    Ok(endpoint.connect_lazy())
}

// ============================================================================
// Engine
// ============================================================================

/// Serves a tonic router behind a [`MuxListener`].
pub struct RpcEngine {
    router: Router,
}

impl std::fmt::Debug for RpcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcEngine").finish_non_exhaustive()
    }
}

impl RpcEngine {
    /// Wraps a router built with `tonic::transport::Server::builder()`.
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Engine for RpcEngine {
    fn name(&self) -> &'static str {
        "rpc"
    }

    async fn serve(self, listener: MuxListener) -> Result<(), Error> {
        let addr = listener.local_addr();
        tracing::debug!(%addr, "rpc engine serving");
        self.router
            .serve_with_incoming(listener.into_incoming())
            .await
            .map_err(Error::from)
    }
}
