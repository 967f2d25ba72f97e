//! The storage node: resource CRUD over gRPC and REST on one port.

use std::sync::Arc;

use async_trait::async_trait;
use http::{Method, StatusCode};
use tonic::{Request, Response, Status};

use crate::pipeline::ValueRequest;
use crate::storage::{Resource, Storage};
use crate::tracing_support::{ActiveSpan, TraceContext, Tracer};
use crate::transport::grpc::{record_status, server_span, RpcEngine, ServerTraceInterceptor};
use crate::transport::proto::resource_service_server::{ResourceService, ResourceServiceServer};
use crate::transport::proto::{
    self, DeleteResourceRequest, Empty, GetResourceRequest, ResourceList, SaveResourceRequest,
};
use crate::transport::rest::{
    error_response, json_response, text_response, RestHandler, RestRequest, RestResponse,
};
use crate::Error;

/// Full gRPC method paths of the storage API.
pub mod methods {
    /// `Save`
    pub const SAVE: &str = "/tracemux.storage.v1.ResourceService/Save";
    /// `Get`
    pub const GET: &str = "/tracemux.storage.v1.ResourceService/Get";
    /// `GetAll`
    pub const GET_ALL: &str = "/tracemux.storage.v1.ResourceService/GetAll";
    /// `Delete`
    pub const DELETE: &str = "/tracemux.storage.v1.ResourceService/Delete";
}

/// REST prefix of the resource collection.
pub const RESOURCES_PATH: &str = "/v1/resources";

/// Tag carrying the resource id on `resource-*` spans.
const RESOURCE_ID: &str = "resource.id";

/// Serves a [`Storage`] to both transports.
///
/// Every operation opens a `resource-*` span beneath the transport's server
/// span. Clones share the same storage.
#[derive(Clone)]
pub struct StorageNode {
    storage: Arc<dyn Storage>,
    tracer: Tracer,
}

impl std::fmt::Debug for StorageNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageNode")
            .field("tracer", &self.tracer)
            .finish_non_exhaustive()
    }
}

impl StorageNode {
    /// Creates a node over `storage`.
    pub fn new(storage: Arc<dyn Storage>, tracer: Tracer) -> Self {
        Self { storage, tracer }
    }

    /// Builds the gRPC engine serving this node.
    pub fn rpc_engine(&self) -> RpcEngine {
        let service =
            ResourceServiceServer::with_interceptor(self.clone(), ServerTraceInterceptor);
        RpcEngine::new(tonic::transport::Server::builder().add_service(service))
    }

    async fn save_resource(&self, parent: &TraceContext, value: &str) -> Result<Resource, Error> {
        let span = self.tracer.span("resource-save").child_of(parent).start();
        seal(span, self.storage.save(value).await)
    }

    async fn get_resource(&self, parent: &TraceContext, id: &str) -> Result<Resource, Error> {
        let span = self
            .tracer
            .span("resource-get")
            .tag(RESOURCE_ID, id)
            .child_of(parent)
            .start();
        seal(span, self.storage.get(id).await)
    }

    async fn list_resources(&self, parent: &TraceContext) -> Result<Vec<Resource>, Error> {
        let mut span = self.tracer.span("resource-getAll").child_of(parent).start();
        let result = self.storage.list().await;
        if let Ok(list) = &result {
            span.set_tag("resource.count", list.len());
        }
        seal(span, result)
    }

    async fn delete_resource(&self, parent: &TraceContext, id: &str) -> Result<(), Error> {
        let span = self
            .tracer
            .span("resource-delete")
            .tag(RESOURCE_ID, id)
            .child_of(parent)
            .start();
        seal(span, self.storage.delete(id).await)
    }

    /// Runs `op` beneath a server span for `method`.
    async fn serve_rpc<Req, T, F, Fut>(
        &self,
        method: &str,
        request: Request<Req>,
        op: F,
    ) -> Result<Response<T>, Status>
    where
        F: FnOnce(TraceContext, Req) -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        let mut span = server_span(&self.tracer, method, &request);
        let result = op(span.context().clone(), request.into_inner())
            .await
            .map(Response::new)
            .map_err(Status::from);
        record_status(&mut span, &result);
        span.finish();
        result
    }
}

fn seal<T>(mut span: ActiveSpan, result: Result<T, Error>) -> Result<T, Error> {
    if let Err(err) = &result {
        span.set_error(err);
    }
    span.finish();
    result
}

#[tonic::async_trait]
impl ResourceService for StorageNode {
    async fn save(
        &self,
        request: Request<SaveResourceRequest>,
    ) -> Result<Response<proto::Resource>, Status> {
        self.serve_rpc(methods::SAVE, request, |ctx, req| async move {
            self.save_resource(&ctx, &req.value).await.map(Into::into)
        })
        .await
    }

    async fn get(
        &self,
        request: Request<GetResourceRequest>,
    ) -> Result<Response<proto::Resource>, Status> {
        self.serve_rpc(methods::GET, request, |ctx, req| async move {
            self.get_resource(&ctx, &req.resource_id).await.map(Into::into)
        })
        .await
    }

    async fn get_all(
        &self,
        request: Request<GetResourceRequest>,
    ) -> Result<Response<ResourceList>, Status> {
        self.serve_rpc(methods::GET_ALL, request, |ctx, _| async move {
            let list = self.list_resources(&ctx).await?;
            Ok::<_, Error>(ResourceList {
                list: list.into_iter().map(Into::into).collect(),
            })
        })
        .await
    }

    async fn delete(
        &self,
        request: Request<DeleteResourceRequest>,
    ) -> Result<Response<Empty>, Status> {
        self.serve_rpc(methods::DELETE, request, |ctx, req| async move {
            self.delete_resource(&ctx, &req.resource_id).await?;
            Ok::<_, Error>(Empty {})
        })
        .await
    }
}

#[async_trait]
impl RestHandler for StorageNode {
    async fn handle(&self, request: RestRequest) -> RestResponse {
        let ctx = &request.context;
        let Some(rest) = request
            .path()
            .strip_prefix(RESOURCES_PATH)
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
        else {
            return text_response(StatusCode::NOT_FOUND, "not found");
        };

        let result = match (&request.method, rest.trim_start_matches('/')) {
            (&Method::POST, "") => match request.json::<ValueRequest>() {
                Ok(body) => self
                    .save_resource(ctx, &body.value)
                    .await
                    .map(|r| json_response(StatusCode::OK, &r)),
                Err(err) => Err(err),
            },
            (&Method::GET, "") => self
                .list_resources(ctx)
                .await
                .map(|list| json_response(StatusCode::OK, &serde_json::json!({ "list": list }))),
            (&Method::GET, id) if !id.contains('/') => match decode_id(id) {
                Ok(id) => self
                    .get_resource(ctx, &id)
                    .await
                    .map(|r| json_response(StatusCode::OK, &r)),
                Err(err) => Err(err),
            },
            (&Method::DELETE, id) if !id.is_empty() && !id.contains('/') => match decode_id(id) {
                Ok(id) => self
                    .delete_resource(ctx, &id)
                    .await
                    .map(|()| json_response(StatusCode::OK, &serde_json::json!({}))),
                Err(err) => Err(err),
            },
            (_, id) if id.contains('/') => {
                return text_response(StatusCode::NOT_FOUND, "not found");
            }
            _ => return text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
        };

        result.unwrap_or_else(|err| error_response(&err))
    }
}

fn decode_id(raw: &str) -> Result<String, Error> {
    urlencoding::decode(raw)
        .map(|id| id.into_owned())
        .map_err(|e| Error::invalid_argument(format!("invalid resource id {raw:?}: {e}")))
}
