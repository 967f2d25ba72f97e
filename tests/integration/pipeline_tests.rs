//! End-to-end tests of the gateway → service → storage/worker pipeline.
//!
//! Every node runs in-process on an ephemeral port and reports to one
//! memory sink, so a request's whole span tree can be inspected.

use std::sync::Arc;

use tracemux::config::PipelineConfig;
use tracemux::pipeline::{methods, Pipeline, PROGRESS_STEPS};
use tracemux::tracing_support::{tag_keys, FinishedSpan, MemorySink, SpanKind, SpanTimeline};
use tracemux::transport::MemoryQueue;

use crate::common::{http_client, WAIT};

/// Spans recorded for one successful request.
const SPANS_PER_REQUEST: usize = 12;

async fn start(config: PipelineConfig) -> (Pipeline, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::start(&config, sink.clone(), Arc::new(MemoryQueue::new()))
        .await
        .expect("Failed to start pipeline");
    (pipeline, sink)
}

fn find<'a>(timeline: &'a SpanTimeline, service: &str, operation: &str) -> &'a FinishedSpan {
    let span = timeline
        .spans()
        .iter()
        .find(|s| s.service() == service && s.operation_name() == operation);
    assert!(
        span.is_some(),
        "Missing span {service}/{operation}\n{}",
        timeline.render()
    );
    span.expect("Span should exist")
}

/// One request through the gateway yields one connected tree rooted at
/// the gateway's server span.
#[tokio::test]
async fn test_end_to_end_span_tree() {
    let (pipeline, sink) = start(PipelineConfig::ephemeral()).await;

    let response = http_client()
        .post(pipeline.gateway_url())
        .json(&serde_json::json!({"value": "x"}))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.expect("Body failed"), "OK");

    let spans = sink.wait_for(SPANS_PER_REQUEST, WAIT).await;
    let timeline = SpanTimeline::from_spans(spans);
    assert!(timeline.is_connected(), "{:?}\n{}", timeline.problems(), timeline.render());
    assert_eq!(timeline.spans().len(), SPANS_PER_REQUEST, "{}", timeline.render());

    let roots = timeline.roots();
    assert_eq!(roots[0].service(), "gateway");
    assert_eq!(roots[0].operation_name(), "HTTP/1.1 POST /");

    // gateway → service over HTTP
    let service_server = find(&timeline, "service", "HTTP/1.1 POST /resource");
    assert_eq!(
        timeline.path_to(service_server),
        ["HTTP/1.1 POST /", "root-handler", "call to service", "HTTP POST", "HTTP/1.1 POST /resource"]
    );

    // service → storage over gRPC
    let resource_save = find(&timeline, "storage", "resource-save");
    assert_eq!(
        timeline.path_to(resource_save)[4..],
        [
            "HTTP/1.1 POST /resource",
            "root-handler",
            "save to storage",
            methods::SAVE,
            methods::SAVE,
            "resource-save"
        ]
    );

    // service → worker over the queue
    let worker = find(&timeline, "worker", "worker-response");
    assert_eq!(worker.kind(), SpanKind::Consumer);
    let parent = timeline.parent_of(worker).expect("Worker span has no parent");
    assert_eq!(parent.operation_name(), "job request");
    assert_eq!(parent.service(), "service");
    assert_eq!(
        parent.tag(tag_keys::MESSAGE_CHANNEL).and_then(|v| v.as_str()),
        Some("job-queue")
    );
    assert_eq!(worker.logs().len(), 1 + PROGRESS_STEPS as usize);

    // the saved resource is logged on the storage call
    let save = find(&timeline, "service", "save to storage");
    let logged = save.logs()[0]
        .field("resource")
        .and_then(|v| v.as_str())
        .expect("Missing resource log");
    assert!(logged.contains(r#""value":"x""#), "{logged}");

    assert!(timeline.spans().iter().all(|s| !s.is_error()));

    pipeline.shutdown().await.expect("Shutdown failed");
}

/// With failure injection the value is still stored, but the request fails
/// and the failure is visible on every span up to the gateway.
#[tokio::test]
async fn test_injected_failure_propagates_as_500() {
    let (pipeline, sink) = start(PipelineConfig::ephemeral().with_inject_failure(true)).await;

    let response = http_client()
        .post(pipeline.gateway_url())
        .json(&serde_json::json!({"value": "x"}))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);

    let spans = sink.wait_for(SPANS_PER_REQUEST + 1, WAIT).await;
    let timeline = SpanTimeline::from_spans(spans);
    assert!(timeline.is_connected(), "{}", timeline.render());

    let failing = find(&timeline, "service", "failing operation");
    assert!(failing.is_error());
    assert_eq!(
        timeline.path_to(failing)[5..],
        ["root-handler", "failing operation"]
    );
    for (service, operation) in [
        ("service", "root-handler"),
        ("service", "HTTP/1.1 POST /resource"),
        ("gateway", "call to service"),
        ("gateway", "root-handler"),
        ("gateway", "HTTP/1.1 POST /"),
    ] {
        assert!(
            find(&timeline, service, operation).is_error(),
            "{service}/{operation} should be marked as failed"
        );
    }
    assert!(!find(&timeline, "storage", "resource-save").is_error());

    // the value was stored before the failure
    let listed: serde_json::Value = http_client()
        .get(format!("http://{}/v1/resources", pipeline.storage_addr()))
        .send()
        .await
        .expect("List failed")
        .json()
        .await
        .expect("List returned invalid JSON");
    assert_eq!(listed["list"][0]["value"], "x");

    pipeline.shutdown().await.expect("Shutdown failed");
}

/// Bad input is rejected at the gateway without reaching the service.
#[tokio::test]
async fn test_invalid_body_rejected_at_gateway() {
    let (pipeline, sink) = start(PipelineConfig::ephemeral()).await;

    let response = http_client()
        .post(pipeline.gateway_url())
        .body("not json")
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.text().await.expect("Body failed");
    assert!(body.starts_with("decoding input"), "{body}");

    let spans = sink.wait_for(2, WAIT).await;
    assert!(spans.iter().all(|s| s.service() == "gateway"));
    assert_eq!(spans.len(), 2);

    pipeline.shutdown().await.expect("Shutdown failed");
}

/// Every request gets its own trace.
#[tokio::test]
async fn test_requests_get_separate_traces() {
    let (pipeline, sink) = start(PipelineConfig::ephemeral()).await;
    let client = http_client();

    for value in ["a", "b"] {
        let response = client
            .post(pipeline.gateway_url())
            .json(&serde_json::json!({ "value": value }))
            .send()
            .await
            .expect("Request failed");
        assert!(response.status().is_success());
    }

    let spans = sink.wait_for(2 * SPANS_PER_REQUEST, WAIT).await;
    let timeline = SpanTimeline::from_spans(spans);
    let traces = timeline.trace_ids();
    assert_eq!(traces.len(), 2);
    for trace in traces {
        let tree = timeline.for_trace(trace);
        assert!(tree.is_connected(), "{}", tree.render());
    }

    pipeline.shutdown().await.expect("Shutdown failed");
}
