//! Traced gRPC client for the storage node.

use std::time::Duration;

use tonic::service::interceptor::InterceptedService;
use tonic::transport::Channel;

use crate::pipeline::storage_node::methods;
use crate::storage::Resource;
use crate::tracing_support::{TraceContext, Tracer};
use crate::transport::grpc::{
    client_request, lazy_channel, record_status, ClientTraceInterceptor,
};
use crate::transport::proto::resource_service_client::ResourceServiceClient;
use crate::transport::proto::{DeleteResourceRequest, GetResourceRequest, SaveResourceRequest};
use crate::Error;

type Inner = ResourceServiceClient<InterceptedService<Channel, ClientTraceInterceptor>>;

/// Calls the storage API, one client span per call.
///
/// The channel connects on first use, so a client can be built before the
/// storage node is listening. Cloning is cheap.
#[derive(Clone)]
pub struct StorageClient {
    client: Inner,
    tracer: Tracer,
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageClient")
            .field("tracer", &self.tracer)
            .finish_non_exhaustive()
    }
}

impl StorageClient {
    /// Creates a client for the storage node at `url` (e.g.
    /// `http://127.0.0.1:8082`).
    pub fn connect_lazy(url: &str, timeout: Duration, tracer: Tracer) -> Result<Self, Error> {
        let channel = lazy_channel(url, timeout)?;
        Ok(Self {
            client: ResourceServiceClient::with_interceptor(channel, ClientTraceInterceptor),
            tracer,
        })
    }

    /// Stores `value` and returns the saved resource.
    pub async fn save(&self, parent: &TraceContext, value: &str) -> Result<Resource, Error> {
        let (mut span, request) = client_request(
            &self.tracer,
            parent,
            methods::SAVE,
            SaveResourceRequest {
                value: value.to_string(),
            },
        );
        let result = self.client.clone().save(request).await;
        record_status(&mut span, &result);
        span.finish();
        Ok(result?.into_inner().into())
    }

    /// Fetches one resource.
    pub async fn get(&self, parent: &TraceContext, id: &str) -> Result<Resource, Error> {
        let (mut span, request) = client_request(
            &self.tracer,
            parent,
            methods::GET,
            GetResourceRequest {
                resource_id: id.to_string(),
            },
        );
        let result = self.client.clone().get(request).await;
        record_status(&mut span, &result);
        span.finish();
        Ok(result?.into_inner().into())
    }

    /// Fetches every resource.
    pub async fn list(&self, parent: &TraceContext) -> Result<Vec<Resource>, Error> {
        let (mut span, request) = client_request(
            &self.tracer,
            parent,
            methods::GET_ALL,
            GetResourceRequest::default(),
        );
        let result = self.client.clone().get_all(request).await;
        record_status(&mut span, &result);
        span.finish();
        Ok(result?
            .into_inner()
            .list
            .into_iter()
            .map(Resource::from)
            .collect())
    }

    /// Deletes one resource.
    pub async fn delete(&self, parent: &TraceContext, id: &str) -> Result<(), Error> {
        let (mut span, request) = client_request(
            &self.tracer,
            parent,
            methods::DELETE,
            DeleteResourceRequest {
                resource_id: id.to_string(),
            },
        );
        let result = self.client.clone().delete(request).await;
        record_status(&mut span, &result);
        span.finish();
        result?;
        Ok(())
    }
}
