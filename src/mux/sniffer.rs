//! Protocol classification of freshly accepted connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::{MuxConfig, TimeoutPolicy};
use crate::mux::matcher::{decide, default_rules, Protocol, Rule};
use crate::mux::stream::PrefixedStream;
use crate::Error;

/// Classification counters.
#[derive(Debug, Default)]
pub struct SniffStats {
    rpc: AtomicU64,
    rest: AtomicU64,
    timed_out: AtomicU64,
    dropped: AtomicU64,
}

impl SniffStats {
    /// Connections routed to the RPC engine.
    pub fn rpc(&self) -> u64 {
        self.rpc.load(Ordering::Relaxed)
    }

    /// Connections routed to the REST engine, including fail-open timeouts.
    pub fn rest(&self) -> u64 {
        self.rest.load(Ordering::Relaxed)
    }

    /// Connections whose classification deadline expired.
    pub fn timed_out(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }

    /// Connections closed or failed before a decision, or dropped on timeout.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record(&self, protocol: Protocol) {
        match protocol {
            Protocol::Rpc => self.rpc.fetch_add(1, Ordering::Relaxed),
            Protocol::Rest => self.rest.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// Reads a bounded prefix from a connection and picks its protocol.
///
/// Cloning is cheap; clones share rules and counters.
#[derive(Debug, Clone)]
pub struct Sniffer {
    rules: Arc<[Rule]>,
    max_prefix_len: usize,
    peek_timeout: Duration,
    timeout_policy: TimeoutPolicy,
    stats: Arc<SniffStats>,
}

impl Sniffer {
    /// Creates a sniffer with the default gRPC/REST rules.
    pub fn new(config: &MuxConfig) -> Self {
        Self::with_rules(config, default_rules())
    }

    /// Creates a sniffer with custom rules in priority order.
    pub fn with_rules(config: &MuxConfig, rules: Vec<Rule>) -> Self {
        Self {
            rules: rules.into(),
            max_prefix_len: config.max_prefix_len.max(1),
            peek_timeout: config.peek_timeout,
            timeout_policy: config.timeout_policy,
            stats: Arc::new(SniffStats::default()),
        }
    }

    /// Returns the shared counters.
    pub fn stats(&self) -> &Arc<SniffStats> {
        &self.stats
    }

    /// Classifies `stream`.
    ///
    /// Returns the protocol and a stream that replays every byte read while
    /// deciding. Fails with `ConnectionClosed` if the peer closes first and
    /// with `ClassificationTimeout` if the deadline expires under
    /// [`TimeoutPolicy::Drop`].
    pub async fn classify<S>(&self, mut stream: S) -> Result<(Protocol, PrefixedStream<S>), Error>
    where
        S: AsyncRead + Unpin,
    {
        let deadline = tokio::time::Instant::now() + self.peek_timeout;
        let mut buf = vec![0u8; self.max_prefix_len];
        let mut filled = 0;

        let protocol = loop {
            if let Some(protocol) = decide(&self.rules, &buf[..filled]) {
                break protocol;
            }
            if filled == buf.len() {
                tracing::debug!(filled, "prefix limit reached without a decision");
                break Protocol::Rest;
            }

            match tokio::time::timeout_at(deadline, stream.read(&mut buf[filled..])).await {
                Ok(Ok(0)) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    return Err(Error::connection_closed());
                }
                Ok(Ok(n)) => filled += n,
                Ok(Err(err)) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    return Err(err.into());
                }
                Err(_) => {
                    self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                    match self.timeout_policy {
                        TimeoutPolicy::FailOpen => {
                            tracing::debug!(filled, "classification timed out, failing open");
                            break Protocol::Rest;
                        }
                        TimeoutPolicy::Drop => {
                            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                            return Err(Error::classification_timeout());
                        }
                    }
                }
            }
        };

        self.stats.record(protocol);
        buf.truncate(filled);
        Ok((protocol, PrefixedStream::new(Bytes::from(buf), stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::matcher::tests::h2_request;
    use crate::mux::matcher::{Http2HeaderField, HTTP2_PREFACE};
    use crate::ErrorKind;
    use test_case::test_case;
    use tokio::io::AsyncWriteExt;

    fn sniffer(timeout_ms: u64, policy: TimeoutPolicy) -> Sniffer {
        Sniffer::new(
            &MuxConfig::new()
                .with_peek_timeout(Duration::from_millis(timeout_ms))
                .with_timeout_policy(policy),
        )
    }

    async fn classify_bytes(sniffer: &Sniffer, input: &[u8]) -> Result<(Protocol, Vec<u8>), Error> {
        let (mut client, server) = tokio::io::duplex(8192);
        client.write_all(input).await.unwrap();
        // keep the client open so EOF does not decide anything
        let (protocol, stream) = sniffer.classify(server).await?;
        drop(client);
        Ok((protocol, stream.prefix().to_vec()))
    }

    #[test_case(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", Protocol::Rest; "http1 get")]
    #[test_case(b"POST /resource HTTP/1.1\r\n", Protocol::Rest; "http1 post")]
    #[test_case(b"PUT /x HTTP/1.0\r\n", Protocol::Rest; "http1.0 put")]
    #[test_case(b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n", Protocol::Rpc; "bare http2 preface")]
    #[test_case(b"\x16\x03\x01\x02\x00", Protocol::Rest; "tls hello falls back to rest")]
    #[tokio::test]
    async fn test_classification_table(input: &[u8], expected: Protocol) {
        let sniffer = sniffer(1_000, TimeoutPolicy::FailOpen);
        let (protocol, prefix) = classify_bytes(&sniffer, input).await.unwrap();
        assert_eq!(protocol, expected);
        // nothing read is lost
        assert!(input.starts_with(&prefix));
    }

    #[tokio::test]
    async fn test_grpc_request_is_rpc_and_replayed() {
        let sniffer = sniffer(1_000, TimeoutPolicy::FailOpen);
        let request = h2_request(&[
            (":method", "POST"),
            (":path", "/tracemux.storage.v1.ResourceService/Get"),
            ("content-type", "application/grpc"),
        ]);

        let (protocol, prefix) = classify_bytes(&sniffer, &request).await.unwrap();
        assert_eq!(protocol, Protocol::Rpc);
        assert!(prefix.starts_with(HTTP2_PREFACE));
        assert_eq!(sniffer.stats().rpc(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_fails_open() {
        let sniffer = sniffer(2_000, TimeoutPolicy::FailOpen);
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"PRI").await.unwrap();

        let (protocol, stream) = sniffer.classify(server).await.unwrap();
        assert_eq!(protocol, Protocol::Rest);
        assert_eq!(stream.prefix(), b"PRI");
        assert_eq!(sniffer.stats().timed_out(), 1);
        assert_eq!(sniffer.stats().rest(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_dropped() {
        let sniffer = sniffer(2_000, TimeoutPolicy::Drop);
        let (_client, server) = tokio::io::duplex(64);

        let err = sniffer.classify(server).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClassificationTimeout);
        assert_eq!(sniffer.stats().dropped(), 1);
    }

    #[tokio::test]
    async fn test_eof_before_decision() {
        let sniffer = sniffer(1_000, TimeoutPolicy::FailOpen);
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"P").await.unwrap();
        drop(client);

        let err = sniffer.classify(server).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionClosed);
        assert_eq!(sniffer.stats().dropped(), 1);
        assert_eq!(sniffer.stats().rest(), 0);
    }

    #[tokio::test]
    async fn test_full_prefix_without_decision_is_rest() {
        let config = MuxConfig::new().with_max_prefix_len(30);
        let rules = vec![Rule::new(Protocol::Rpc).with(Http2HeaderField::grpc())];
        let sniffer = Sniffer::with_rules(&config, rules);

        // empty DATA frames after the preface never reach a HEADERS frame
        let mut input = HTTP2_PREFACE.to_vec();
        input.extend_from_slice(&[0u8; 64]);

        let (protocol, prefix) = classify_bytes(&sniffer, &input).await.unwrap();
        assert_eq!(protocol, Protocol::Rest);
        assert_eq!(prefix.len(), 30);
    }
}
