//! The service node: stores a value, then queues a job for it.

use async_trait::async_trait;
use http::{Method, StatusCode};

use crate::config::PipelineConfig;
use crate::pipeline::storage_client::StorageClient;
use crate::pipeline::{fail_request, ValueRequest};
use crate::tracing_support::{SpanKind, TraceContext, Tracer};
use crate::transport::queue::TracedQueue;
use crate::transport::rest::{text_response, RestHandler, RestRequest, RestResponse};
use crate::Error;

/// Path the service accepts values on.
pub const RESOURCE_PATH: &str = "/resource";

const FAILURE_MESSAGE: &str = "Exemplary error :) Everything is stored correctly, though.";

/// Handles `POST /resource`.
///
/// Each request runs `root-handler`, then `save to storage` (gRPC), then
/// `job request` (queue publish), then optionally `failing operation`, each
/// as a span beneath the request's server span.
#[derive(Debug, Clone)]
pub struct ServiceNode {
    tracer: Tracer,
    storage: StorageClient,
    queue: TracedQueue,
    channel: String,
    inject_failure: bool,
}

impl ServiceNode {
    /// Creates a node that saves through `storage` and publishes on the
    /// configured queue channel.
    pub fn new(
        tracer: Tracer,
        storage: StorageClient,
        queue: TracedQueue,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            tracer,
            storage,
            queue,
            channel: config.queue_channel.clone(),
            inject_failure: config.inject_failure,
        }
    }

    async fn root_handler(&self, request: &RestRequest) -> RestResponse {
        let mut span = self
            .tracer
            .span("root-handler")
            .child_of(&request.context)
            .start();

        let data = match request.json::<ValueRequest>() {
            Ok(data) => data,
            Err(err) => {
                let err = format!("decoding input: {}", err.message());
                return fail_request(span, &err, &err);
            }
        };
        span.set_tag("value", data.value.as_str());

        let steps = async {
            self.save_to_storage(span.context(), &data.value).await?;
            self.job_request(span.context(), &data.value).await?;
            if self.inject_failure {
                self.failing_operation(span.context())?;
            }
            Ok::<_, Error>(())
        };

        let outcome = steps.await;
        match outcome {
            Ok(()) => {
                span.finish();
                text_response(StatusCode::OK, "OK")
            }
            Err(err) => fail_request(
                span,
                &format!("failed to do some operation: {err}"),
                err.message(),
            ),
        }
    }

    async fn save_to_storage(&self, parent: &TraceContext, value: &str) -> Result<(), Error> {
        let mut span = self.tracer.span("save to storage").child_of(parent).start();
        match self.storage.save(span.context(), value).await {
            Ok(resource) => {
                let logged = serde_json::to_string(&resource)
                    .unwrap_or_else(|_| format!("{resource:?}"));
                span.log([("resource", logged)]);
                span.finish();
                Ok(())
            }
            Err(err) => {
                span.set_error(&err);
                span.finish();
                Err(err)
            }
        }
    }

    async fn job_request(&self, parent: &TraceContext, value: &str) -> Result<(), Error> {
        let mut span = self
            .tracer
            .span("job request")
            .kind(SpanKind::Producer)
            .child_of(parent)
            .start();
        let payload = serde_json::to_vec(&ValueRequest {
            value: value.to_string(),
        })?;
        let result = self.queue.publish(&mut span, &self.channel, &payload).await;
        span.finish();
        result
    }

    fn failing_operation(&self, parent: &TraceContext) -> Result<(), Error> {
        let mut span = self.tracer.span("failing operation").child_of(parent).start();
        let err = Error::internal(FAILURE_MESSAGE);
        span.set_error(&err);
        span.finish();
        Err(err)
    }
}

#[async_trait]
impl RestHandler for ServiceNode {
    async fn handle(&self, request: RestRequest) -> RestResponse {
        match (&request.method, request.path()) {
            (&Method::POST, RESOURCE_PATH) => self.root_handler(&request).await,
            (_, RESOURCE_PATH) => {
                text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
            }
            _ => text_response(StatusCode::NOT_FOUND, "not found"),
        }
    }
}
