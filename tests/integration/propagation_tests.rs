//! Trace context propagation across real transports.

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use http::HeaderMap;

use tracemux::config::MuxConfig;
use tracemux::pipeline::{methods, StorageClient};
use tracemux::tracing_support::{
    tag_keys, BinaryPropagator, HttpHeaderPropagator, MemorySink, Propagator, SpanId, SpanKind,
    SpanTimeline, TagValue, TraceContext, TraceId, Tracer,
};
use tracemux::transport::{MemoryQueue, Queue, TracedQueue};
use tracemux::ErrorKind;

use crate::common::{http_client, TestServer, WAIT};

/// The REST engine continues the trace carried by `x-trace-*` headers.
#[tokio::test]
async fn test_rest_server_span_continues_headers() {
    let server = TestServer::storage(MuxConfig::default())
        .await
        .expect("Failed to start storage server");

    let caller = TraceContext::new_root(true).with_baggage_item("tenant", "acme");
    let mut headers = HeaderMap::new();
    HttpHeaderPropagator
        .inject(&caller, &mut headers)
        .expect("Inject failed");

    let response = http_client()
        .get(format!("{}/v1/resources", server.url()))
        .headers(headers)
        .send()
        .await
        .expect("Request failed");
    assert!(response.status().is_success());

    let spans = server.sink.wait_for(2, WAIT).await;
    let timeline = SpanTimeline::from_spans(spans);
    let http = timeline
        .find("HTTP/1.1 GET /v1/resources")
        .expect("Missing server span");
    assert_eq!(http.kind(), SpanKind::Server);
    assert_eq!(http.context().trace_id(), caller.trace_id());
    assert_eq!(http.context().parent_span_id(), Some(caller.span_id()));
    assert_eq!(http.context().baggage_item("tenant"), Some("acme"));
    assert_eq!(
        http.tag(tag_keys::HTTP_STATUS_CODE),
        Some(&TagValue::Int(200))
    );

    let inner = timeline.find("resource-getAll").expect("Missing handler span");
    assert_eq!(
        timeline.path_to(inner),
        ["HTTP/1.1 GET /v1/resources", "resource-getAll"]
    );

    server.stop().await.expect("Stop failed").expect("Clean stop");
}

/// Undecodable headers start a new trace flagged as malformed; the request
/// itself still succeeds.
#[tokio::test]
async fn test_malformed_headers_start_flagged_root() {
    let server = TestServer::storage(MuxConfig::default())
        .await
        .expect("Failed to start storage server");

    let response = http_client()
        .get(format!("{}/v1/resources", server.url()))
        .header("x-trace-id", "not-hex")
        .header("x-span-id", "0000000000000002")
        .send()
        .await
        .expect("Request failed");
    assert!(response.status().is_success());

    let spans = server.sink.wait_for(2, WAIT).await;
    let timeline = SpanTimeline::from_spans(spans);
    let http = timeline
        .find("HTTP/1.1 GET /v1/resources")
        .expect("Missing server span");
    assert!(http.context().is_root());
    assert_eq!(
        http.tag(tag_keys::CARRIER_MALFORMED),
        Some(&TagValue::Bool(true))
    );
    assert!(timeline.is_connected(), "{}", timeline.render());

    server.stop().await.expect("Stop failed").expect("Clean stop");
}

/// gRPC metadata carries the client span to the server span.
#[tokio::test]
async fn test_grpc_metadata_propagation() {
    let server = TestServer::storage(MuxConfig::default())
        .await
        .expect("Failed to start storage server");

    let client_sink = Arc::new(MemorySink::new());
    let client = StorageClient::connect_lazy(
        &server.url(),
        WAIT,
        Tracer::with_sink("service", client_sink.clone()),
    )
    .expect("Client creation failed");

    let parent = TraceContext::new_root(true);
    let saved = client.save(&parent, "x").await.expect("Save failed");
    let fetched = client.get(&parent, &saved.id).await.expect("Get failed");
    assert_eq!(fetched, saved);

    let err = client
        .delete(&parent, "missing")
        .await
        .expect_err("Delete of a missing id should fail");
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let client_spans = client_sink.spans();
    let server_spans = server.sink.wait_for(6, WAIT).await;
    let save_client = client_spans
        .iter()
        .find(|s| s.operation_name() == methods::SAVE)
        .expect("Missing client span");
    let save_server = server_spans
        .iter()
        .find(|s| s.operation_name() == methods::SAVE)
        .expect("Missing server span");

    assert_eq!(save_server.kind(), SpanKind::Server);
    assert_eq!(
        save_server.context().parent_span_id(),
        Some(save_client.context().span_id())
    );
    assert_eq!(save_server.context().trace_id(), parent.trace_id());

    let delete_client = client_spans
        .iter()
        .find(|s| s.operation_name() == methods::DELETE)
        .expect("Missing delete span");
    assert!(delete_client.is_error());
    assert_eq!(
        delete_client.tag(tag_keys::RPC_CODE),
        Some(&TagValue::Int(tonic::Code::NotFound as i64))
    );

    let mut all = client_spans;
    all.extend(server_spans);
    let timeline = SpanTimeline::from_spans(all).for_trace(parent.trace_id());
    // the caller's own span is not recorded, so each client span is an orphan
    assert_eq!(timeline.orphans().len(), 3);

    server.stop().await.expect("Stop failed").expect("Clean stop");
}

/// The scenario frame: `trace_id=0x1, span_id=0x2` and a 13-byte JSON
/// payload, published to a subscriber.
#[tokio::test]
async fn test_queue_frame_delivers_context_and_exact_payload() {
    let queue = Arc::new(MemoryQueue::new());
    let sink = Arc::new(MemorySink::new());
    let traced = TracedQueue::new(queue.clone(), Tracer::with_sink("worker", sink.clone()));
    let mut subscription = traced.subscribe("job-queue").await.expect("Subscribe failed");

    let context = TraceContext::new(TraceId::from_u128(1), SpanId::from_u64(2));
    let payload = br#"{"value":"x"}"#;
    assert_eq!(payload.len(), 13);

    let frame = BinaryPropagator
        .inject(Some(&context), payload)
        .expect("Inject failed");
    queue.publish("job-queue", frame).await.expect("Publish failed");

    let message = tokio::time::timeout(WAIT, subscription.next())
        .await
        .expect("No message")
        .expect("Subscription closed");
    let (span, received) = traced.receive(&message, "worker-response");
    assert_eq!(received.as_ref(), payload);
    assert_eq!(span.context().trace_id(), TraceId::from_u128(1));
    assert_eq!(span.context().parent_span_id(), Some(SpanId::from_u64(2)));
    span.finish();
}

/// A truncated frame is rejected as malformed; the consumer starts a new
/// trace and still sees the raw body.
#[tokio::test]
async fn test_truncated_frame_is_malformed() {
    let mut truncated = BytesMut::new();
    truncated.put_u32(64);
    truncated.put_slice(b"short");
    let truncated = truncated.freeze();

    let err = BinaryPropagator
        .extract(truncated.clone())
        .expect_err("Truncated frame should fail");
    assert_eq!(err.kind(), ErrorKind::MalformedCarrier);

    let queue = Arc::new(MemoryQueue::new());
    let sink = Arc::new(MemorySink::new());
    let traced = TracedQueue::new(queue.clone(), Tracer::with_sink("worker", sink.clone()));
    let mut subscription = traced.subscribe("jobs").await.expect("Subscribe failed");
    queue
        .publish("jobs", truncated.clone())
        .await
        .expect("Publish failed");

    let message = subscription.next().await.expect("Subscription closed");
    let (span, received) = traced.receive(&message, "worker-response");
    assert_eq!(received, truncated);
    assert!(span.context().is_root());
    assert_eq!(
        span.tag(tag_keys::CARRIER_MALFORMED),
        Some(&TagValue::Bool(true))
    );
    span.finish();
}

/// Request/reply over the queue carries context both ways and times out
/// without a responder.
#[tokio::test]
async fn test_queue_request_reply() {
    let queue = Arc::new(MemoryQueue::new());
    let sink = Arc::new(MemorySink::new());
    let requester = TracedQueue::new(queue.clone(), Tracer::with_sink("service", sink.clone()));
    let responder = TracedQueue::new(queue.clone(), Tracer::with_sink("worker", sink.clone()));

    let mut subscription = responder.subscribe("rpc").await.expect("Subscribe failed");
    let worker = tokio::spawn(async move {
        while let Some(message) = subscription.next().await {
            let (span, payload) = responder.receive(&message, "worker-response");
            message.respond(Bytes::from([b"re: ".as_slice(), &payload[..]].concat()));
            span.finish();
        }
    });

    let mut span = requester.tracer().span("job request").start();
    let reply = requester
        .request(&mut span, "rpc", b"ping", WAIT)
        .await
        .expect("Request failed");
    assert_eq!(reply.as_ref(), b"re: ping");
    span.finish();

    let spans = sink.wait_for(2, WAIT).await;
    assert!(SpanTimeline::from_spans(spans).is_connected());

    let mut span = requester.tracer().span("job request").start();
    let err = requester
        .request(&mut span, "nobody", b"ping", Duration::from_millis(50))
        .await
        .expect_err("Request without responders should fail");
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    span.finish();

    worker.abort();
}
