//! REST transport: a hyper HTTP/1 engine and a reqwest client, both traced.
//!
//! The server side opens one span per request, named
//! `"{version} {method} {path}"`, as a child of whatever context the
//! `x-trace-*` headers carry. Handlers receive that span's context and open
//! their own spans beneath it. The client side opens a client span per
//! request and injects its context into the outgoing headers.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::Serialize;

use crate::mux::{Engine, MuxListener};
use crate::tracing_support::{
    tag_keys, ActiveSpan, HttpHeaderPropagator, Propagator, SpanKind, TraceContext, Tracer,
};
use crate::Error;

// ============================================================================
// Requests and responses
// ============================================================================

/// An HTTP request with its body collected.
#[derive(Debug, Clone)]
pub struct RestRequest {
    /// Request method.
    pub method: Method,
    /// Request URI.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Bytes,
    /// Context of the server span opened for this request.
    pub context: TraceContext,
}

impl RestRequest {
    /// Returns the request path.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Deserializes the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body).map_err(Error::from)
    }
}

/// An HTTP response produced by a [`RestHandler`].
pub type RestResponse = http::Response<Bytes>;

/// Builds a plain-text response.
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> RestResponse {
    let mut response = http::Response::new(body.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Builds a JSON response. Serialization failures become a 500.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> RestResponse {
    match serde_json::to_vec(body) {
        Ok(bytes) => {
            let mut response = http::Response::new(Bytes::from(bytes));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(err) => text_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

/// Maps an error to a JSON error response with the matching status.
pub fn error_response(err: &Error) -> RestResponse {
    let status = StatusCode::from_u16(err.kind().http_status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, &serde_json::json!({ "error": err.to_string() }))
}

/// Application logic behind a [`RestEngine`].
#[async_trait]
pub trait RestHandler: Send + Sync + 'static {
    /// Handles one request.
    async fn handle(&self, request: RestRequest) -> RestResponse;
}

// ============================================================================
// Engine
// ============================================================================

/// Serves HTTP/1 connections from a [`MuxListener`], one task per
/// connection.
pub struct RestEngine<H> {
    handler: Arc<H>,
    tracer: Tracer,
}

impl<H> fmt::Debug for RestEngine<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestEngine")
            .field("tracer", &self.tracer)
            .finish_non_exhaustive()
    }
}

impl<H: RestHandler> RestEngine<H> {
    /// Creates an engine; server spans are reported through `tracer`.
    pub fn new(handler: H, tracer: Tracer) -> Self {
        Self::from_arc(Arc::new(handler), tracer)
    }

    /// Creates an engine sharing `handler`.
    pub fn from_arc(handler: Arc<H>, tracer: Tracer) -> Self {
        Self { handler, tracer }
    }
}

#[async_trait]
impl<H: RestHandler> Engine for RestEngine<H> {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn serve(self, mut listener: MuxListener) -> Result<(), Error> {
        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let stream = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(stream) => stream,
                    Err(err) if err.is_listener_closed() => return Ok(()),
                    Err(err) => return Err(err),
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => {
                    if let Err(err) = finished {
                        if err.is_panic() {
                            tracing::error!(error = ?err, "connection handler panicked");
                        }
                    }
                    continue;
                }
            };

            let peer = stream.peer_addr();
            let handler = Arc::clone(&self.handler);
            let tracer = self.tracer.clone();
            let service = service_fn(move |req: http::Request<Incoming>| {
                let handler = Arc::clone(&handler);
                let tracer = tracer.clone();
                async move { Ok::<_, Infallible>(dispatch(&tracer, handler.as_ref(), req).await) }
            });

            let server = server.clone();
            joinset.spawn(async move {
                if let Err(err) = server.serve_connection(TokioIo::new(stream), service).await {
                    tracing::debug!(peer = ?peer, error = %err, "connection error");
                }
            });
        }
    }
}

/// Wraps one request in a server span and runs the handler.
async fn dispatch<H: RestHandler + ?Sized>(
    tracer: &Tracer,
    handler: &H,
    req: http::Request<Incoming>,
) -> http::Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let operation = format!("{:?} {} {}", parts.version, parts.method, parts.uri.path());

    let mut span = tracer
        .span(operation)
        .kind(SpanKind::Server)
        .tag(tag_keys::HTTP_METHOD, parts.method.as_str())
        .tag(tag_keys::HTTP_URL, parts.uri.to_string())
        .child_of_extracted(HttpHeaderPropagator.extract(&parts.headers))
        .start();

    let response = match body.collect().await {
        Ok(collected) => {
            let request = RestRequest {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                body: collected.to_bytes(),
                context: span.context().clone(),
            };
            handler.handle(request).await
        }
        Err(err) => {
            span.log([("event", "body.error"), ("message", err.to_string().as_str())]);
            text_response(StatusCode::BAD_REQUEST, "failed to read request body")
        }
    };

    record_status(&mut span, response.status());
    span.finish();
    response.map(Full::new)
}

/// Tags a span with an HTTP status, marking 5xx as errors.
pub fn record_status(span: &mut ActiveSpan, status: StatusCode) {
    span.set_tag(tag_keys::HTTP_STATUS_CODE, status.as_u16());
    if status.is_server_error() {
        span.set_tag(tag_keys::ERROR, true);
    }
}

// ============================================================================
// Client
// ============================================================================

/// A response received by [`TracedHttpClient`].
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Returns the body as UTF-8 text, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// An HTTP client that opens a client span per request and propagates its
/// context in the `x-trace-*` headers.
#[derive(Clone)]
pub struct TracedHttpClient {
    client: reqwest::Client,
    tracer: Tracer,
}

impl fmt::Debug for TracedHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedHttpClient")
            .field("tracer", &self.tracer)
            .finish_non_exhaustive()
    }
}

impl TracedHttpClient {
    /// Creates a client with the given request timeout.
    pub fn new(tracer: Tracer, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                Error::configuration(format!("failed to create HTTP client: {e}")).with_source(e)
            })?;
        Ok(Self { client, tracer })
    }

    /// Sends a request as a child of `parent`.
    ///
    /// Returns the response whatever its status; the client span records
    /// the status and is marked as failed for 5xx and transport errors.
    pub async fn send(
        &self,
        parent: &TraceContext,
        method: Method,
        url: &str,
        body: Option<Bytes>,
    ) -> Result<HttpResponse, Error> {
        let mut span = self
            .tracer
            .span(format!("HTTP {method}"))
            .kind(SpanKind::Client)
            .tag(tag_keys::HTTP_METHOD, method.as_str())
            .tag(tag_keys::HTTP_URL, url)
            .child_of(parent)
            .start();

        let mut headers = HeaderMap::new();
        HttpHeaderPropagator.inject(span.context(), &mut headers)?;

        let mut request = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(body);
        }

        let result = async {
            let response = request.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok::<_, Error>(HttpResponse {
                status,
                headers,
                body,
            })
        }
        .await;

        match &result {
            Ok(response) => record_status(&mut span, response.status),
            Err(err) => span.set_error(err),
        }
        span.finish();
        result
    }

    /// POSTs `body` as JSON.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        parent: &TraceContext,
        url: &str,
        body: &T,
    ) -> Result<HttpResponse, Error> {
        let body = serde_json::to_vec(body)?;
        self.send(parent, Method::POST, url, Some(Bytes::from(body)))
            .await
    }

    /// Sends a GET request.
    pub async fn get(&self, parent: &TraceContext, url: &str) -> Result<HttpResponse, Error> {
        self.send(parent, Method::GET, url, None).await
    }
}

// ============================================================================
// Tests
// ============================================================================
