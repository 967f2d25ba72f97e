//! Distributed trace context, propagation and spans.
//!
//! One logical request crosses three kinds of transport boundary: HTTP
//! headers, gRPC metadata and queue message bodies. This module carries a
//! [`TraceContext`] across all three so the spans recorded on every hop form
//! a single causal tree.
//!
//! ## Features
//!
//! - [`HttpHeaderPropagator`]: `x-trace-*` headers, also used as gRPC metadata
//! - [`BinaryPropagator`]: length-prefixed context frame for queue payloads
//! - [`Tracer`] / [`ActiveSpan`]: owned spans sealed exactly once
//! - [`SpanSink`]: where sealed spans go ([`LogSink`], [`MemorySink`])
//! - [`SpanTimeline`]: rebuilds and checks the causal tree
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use http::HeaderMap;
//! use tracemux::tracing_support::{
//!     HttpHeaderPropagator, MemorySink, Propagator, SpanKind, Tracer,
//! };
//!
//! let sink = Arc::new(MemorySink::new());
//! let gateway = Tracer::with_sink("gateway", sink.clone());
//! let service = Tracer::with_sink("service", sink.clone());
//!
//! // client side: start a span and inject its context
//! let call = gateway.span("call to service").kind(SpanKind::Client).start();
//! let mut headers = HeaderMap::new();
//! HttpHeaderPropagator.inject(call.context(), &mut headers).unwrap();
//!
//! // server side: extract and continue the trace
//! let handler = service
//!     .span("HTTP/1.1 POST /resource")
//!     .kind(SpanKind::Server)
//!     .child_of_extracted(HttpHeaderPropagator.extract(&headers))
//!     .start();
//! assert_eq!(handler.context().parent_span_id(), Some(call.context().span_id()));
//! ```

mod context;
mod frame;
mod propagator;
mod sink;
mod span;
mod timeline;
mod tracer;

pub use context::{SpanId, TraceContext, TraceId};
pub use frame::{BinaryPropagator, Frame};
pub use propagator::{Extractor, HttpHeaderPropagator, Injector, Propagator};
pub use sink::{FanoutSink, LogSink, MemorySink, SpanSink};
pub use span::{tag_keys, ActiveSpan, FinishedSpan, LogRecord, SpanKind, TagValue};
pub use timeline::SpanTimeline;
pub use tracer::{SpanBuilder, Tracer};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_context_survives_all_carriers() {
        let sink = Arc::new(MemorySink::new());
        let tracer = Tracer::with_sink("svc", sink.clone());

        let root = tracer.span("root").start();
        let ctx = root.context().clone().with_baggage_item("tenant", "acme");

        let mut headers = http::HeaderMap::new();
        HttpHeaderPropagator.inject(&ctx, &mut headers).unwrap();
        let via_http = HttpHeaderPropagator.extract(&headers).unwrap().unwrap();

        let frame = BinaryPropagator.inject(Some(&via_http), b"payload").unwrap();
        let via_queue = BinaryPropagator.extract(frame).unwrap().context.unwrap();

        assert_eq!(via_queue, ctx);
    }
}
