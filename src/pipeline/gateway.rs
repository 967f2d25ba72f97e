//! The gateway node: the entry point that forwards values to the service.

use async_trait::async_trait;
use http::{Method, StatusCode};

use crate::pipeline::{fail_request, ValueRequest};
use crate::tracing_support::{TraceContext, Tracer};
use crate::transport::rest::{
    text_response, RestHandler, RestRequest, RestResponse, TracedHttpClient,
};
use crate::{Error, ErrorKind};

/// Handles `POST /` by calling the service's `POST /resource`.
#[derive(Debug, Clone)]
pub struct GatewayNode {
    tracer: Tracer,
    http: TracedHttpClient,
    service_url: url::Url,
}

impl GatewayNode {
    /// Creates a node forwarding to `service_url`, the full URL of the
    /// service's resource endpoint.
    ///
    /// Fails with [`ErrorKind::Configuration`] if the URL does not parse.
    pub fn new(tracer: Tracer, http: TracedHttpClient, service_url: &str) -> Result<Self, Error> {
        Ok(Self {
            tracer,
            http,
            service_url: url::Url::parse(service_url)?,
        })
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

        let outcome = self.call_service(span.context(), &data).await;
        match outcome {
            Ok(()) => {
                span.finish();
                text_response(StatusCode::OK, "OK")
            }
            Err(err) => {
                let err = format!("calling service: {}", err.message());
                fail_request(span, &err, &err)
            }
        }
    }

    async fn call_service(&self, parent: &TraceContext, data: &ValueRequest) -> Result<(), Error> {
        let mut span = self.tracer.span("call to service").child_of(parent).start();

        let url = self.service_url.as_str();
        let response = match self.http.post_json(span.context(), url, data).await {
            Ok(response) => response,
            Err(err) => {
                let err = Error::new(
                    err.kind(),
                    format!("do request to service: {}", err.message()),
                )
                .with_source(err);
                span.set_error(&err);
                return Err(err);
            }
        };

        span.log([("service-status_code", i64::from(response.status.as_u16()))]);

        if response.status != StatusCode::OK {
            let err = Error::new(
                ErrorKind::from_http_status(response.status.as_u16()),
                format!("service response is not 200: {}", response.text()),
            );
            span.set_error(&err);
            return Err(err);
        }

        span.finish();
        Ok(())
    }
}

#[async_trait]
impl RestHandler for GatewayNode {
    async fn handle(&self, request: RestRequest) -> RestResponse {
        match (&request.method, request.path()) {
            (&Method::POST, "/") => self.root_handler(&request).await,
            (_, "/") => text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
            _ => text_response(StatusCode::NOT_FOUND, "not found"),
        }
    }
}
