//! Dual-protocol server tests over real sockets.
//!
//! These tests verify that HTTP/1 and gRPC clients share one port without
//! noticing, and that the server's lifecycle behaves.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use tracemux::config::{MuxConfig, TimeoutPolicy};
use tracemux::mux::{Engine, MuxListener, RejectEngine};
use tracemux::pipeline::StorageNode;
use tracemux::storage::MemoryStorage;
use tracemux::tracing_support::{MemorySink, Tracer};
use tracemux::transport::proto::{GetResourceRequest, SaveResourceRequest};
use tracemux::transport::RestEngine;
use tracemux::ErrorKind;

use crate::common::{grpc_client, http_client, TestServer, WAIT};

/// An HTTP/1 client and a gRPC client talk to the same port.
#[tokio::test]
async fn test_rest_and_grpc_share_one_port() {
    let server = TestServer::storage(MuxConfig::default())
        .await
        .expect("Failed to start storage server");

    // save over REST
    let saved: serde_json::Value = http_client()
        .post(format!("{}/v1/resources", server.url()))
        .json(&serde_json::json!({"value": "from-rest"}))
        .send()
        .await
        .expect("REST save failed")
        .json()
        .await
        .expect("REST save returned invalid JSON");
    let rest_id = saved["id"].as_str().expect("Missing id").to_string();

    // read it back and save another over gRPC
    let mut grpc = grpc_client(&server.url()).await.expect("gRPC connect failed");
    let fetched = grpc
        .get(GetResourceRequest {
            resource_id: rest_id.clone(),
        })
        .await
        .expect("gRPC get failed")
        .into_inner();
    assert_eq!(fetched.value, "from-rest");

    let grpc_saved = grpc
        .save(SaveResourceRequest {
            value: "from-grpc".to_string(),
        })
        .await
        .expect("gRPC save failed")
        .into_inner();

    // both are visible over REST
    let listed: serde_json::Value = http_client()
        .get(format!("{}/v1/resources", server.url()))
        .send()
        .await
        .expect("REST list failed")
        .json()
        .await
        .expect("REST list returned invalid JSON");
    let ids: Vec<_> = listed["list"]
        .as_array()
        .expect("Missing list")
        .iter()
        .filter_map(|r| r["id"].as_str())
        .collect();
    assert_eq!(ids, [rest_id.as_str(), grpc_saved.id.as_str()]);

    assert!(server.stats.rpc() >= 1);
    assert!(server.stats.rest() >= 1);

    server
        .stop()
        .await
        .expect("Stop failed")
        .expect("Server should stop cleanly");
}

/// gRPC errors cross the multiplexer intact.
#[tokio::test]
async fn test_grpc_not_found_status() {
    let server = TestServer::storage(MuxConfig::default())
        .await
        .expect("Failed to start storage server");

    let mut grpc = grpc_client(&server.url()).await.expect("gRPC connect failed");
    let status = grpc
        .get(GetResourceRequest {
            resource_id: "missing".to_string(),
        })
        .await
        .expect_err("Missing resource should fail");
    assert_eq!(status.code(), tonic::Code::NotFound);

    let response = http_client()
        .get(format!("{}/v1/resources/missing", server.url()))
        .send()
        .await
        .expect("REST get failed");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    server.stop().await.expect("Stop failed").expect("Clean stop");
}

/// A client that stalls before sending is served as REST once the peek
/// timeout passes.
#[tokio::test]
async fn test_stalled_client_fails_open_to_rest() {
    let config = MuxConfig::default().with_peek_timeout(Duration::from_millis(100));
    let server = TestServer::storage(config)
        .await
        .expect("Failed to start storage server");

    let mut stream = TcpStream::connect(server.addr).await.expect("Connect failed");
    tokio::time::sleep(Duration::from_millis(300)).await;

    stream
        .write_all(b"GET /v1/resources HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
        .await
        .expect("Write failed");
    let mut response = Vec::new();
    tokio::time::timeout(WAIT, stream.read_to_end(&mut response))
        .await
        .expect("Response timed out")
        .expect("Read failed");

    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains(r#"{"list":[]}"#), "{response}");
    assert_eq!(server.stats.timed_out(), 1);

    server.stop().await.expect("Stop failed").expect("Clean stop");
}

/// With the drop policy a stalled connection is closed instead.
#[tokio::test]
async fn test_stalled_client_dropped_under_drop_policy() {
    let config = MuxConfig::default()
        .with_peek_timeout(Duration::from_millis(100))
        .with_timeout_policy(TimeoutPolicy::Drop);
    let server = TestServer::storage(config)
        .await
        .expect("Failed to start storage server");

    let mut stream = TcpStream::connect(server.addr).await.expect("Connect failed");
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(WAIT, stream.read(&mut buf))
        .await
        .expect("Connection was not closed");
    // closed without a byte: either a clean EOF or a reset
    assert!(matches!(read, Ok(0) | Err(_)));

    server.stop().await.expect("Stop failed").expect("Clean stop");
}

/// A port whose RPC side is a reject engine still serves REST, and gRPC
/// calls fail rather than hang.
#[tokio::test]
async fn test_reject_engine_closes_grpc() {
    let sink = Arc::new(MemorySink::new());
    let tracer = Tracer::with_sink("storage", sink.clone());
    let node = StorageNode::new(Arc::new(MemoryStorage::new()), tracer.clone());
    let server = TestServer::start(
        MuxConfig::default(),
        sink,
        RejectEngine::new("rpc"),
        RestEngine::new(node, tracer),
    )
    .await
    .expect("Failed to start REST-only server");

    let response = http_client()
        .get(format!("{}/v1/resources", server.url()))
        .send()
        .await
        .expect("REST list failed");
    assert!(response.status().is_success());

    let result = tokio::time::timeout(WAIT, async {
        let mut grpc = grpc_client(&server.url()).await?;
        grpc.save(SaveResourceRequest {
            value: "x".to_string(),
        })
        .await
        .map_err(anyhow::Error::from)
    })
    .await
    .expect("gRPC call should fail, not hang");
    assert!(result.is_err());

    server.stop().await.expect("Stop failed").expect("Clean stop");
}

/// An engine that stops on its own.
struct QuitEngine;

#[async_trait]
impl Engine for QuitEngine {
    fn name(&self) -> &'static str {
        "quit"
    }

    async fn serve(self, _listener: MuxListener) -> tracemux::Result<()> {
        Err(tracemux::Error::internal("engine gave up"))
    }
}

/// An engine stopping before shutdown takes the whole server down.
#[tokio::test]
async fn test_engine_failure_is_fatal() {
    let server = TestServer::start(
        MuxConfig::default(),
        Arc::new(MemorySink::new()),
        QuitEngine,
        RejectEngine::new("rest"),
    )
    .await
    .expect("Failed to start server");

    let result = tokio::time::timeout(WAIT, server.task)
        .await
        .expect("Server should stop by itself")
        .expect("Server task panicked");
    let err = result.expect_err("Engine failure should surface");
    assert_eq!(err.kind(), ErrorKind::EngineFatal);
    assert!(err.is_fatal());
    assert!(err.to_string().contains("quit"), "{err}");
}
