//! Configuration for the protocol-multiplexing listener.

use std::net::SocketAddr;
use std::time::Duration;

/// What the sniffer does when a connection has not been classified by the
/// time `peek_timeout` expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    /// Classify as REST and hand over whatever was buffered.
    #[default]
    FailOpen,
    /// Close the connection.
    Drop,
}

/// Configuration for [`DualProtocolServer`](crate::mux::DualProtocolServer).
///
/// ## Default Values
///
/// - `bind_addr`: `127.0.0.1:0`
/// - `peek_timeout`: 2s
/// - `max_prefix_len`: 4096 bytes
/// - `backlog`: 128 connections per engine
/// - `timeout_policy`: [`TimeoutPolicy::FailOpen`]
///
/// ## Example
///
/// ```rust
/// use std::time::Duration;
/// use tracemux::config::{MuxConfig, TimeoutPolicy};
///
/// let config = MuxConfig::default()
///     .with_peek_timeout(Duration::from_millis(500))
///     .with_timeout_policy(TimeoutPolicy::Drop);
///
/// assert_eq!(config.max_prefix_len, 4096);
/// ```
#[derive(Debug, Clone, bon::Builder)]
pub struct MuxConfig {
    /// Address the root listener binds to.
    #[builder(default = default_bind_addr())]
    pub bind_addr: SocketAddr,

    /// Overall deadline for classifying one connection.
    #[builder(default = Duration::from_secs(2))]
    pub peek_timeout: Duration,

    /// Maximum number of bytes buffered while classifying.
    #[builder(default = 4096)]
    pub max_prefix_len: usize,

    /// Classified connections queued per engine before the accept loop
    /// waits for the engine.
    #[builder(default = 128)]
    pub backlog: usize,

    /// Behavior when classification times out.
    #[builder(default)]
    pub timeout_policy: TimeoutPolicy,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MuxConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bind address.
    #[must_use]
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Sets the classification deadline.
    #[must_use]
    pub fn with_peek_timeout(mut self, timeout: Duration) -> Self {
        self.peek_timeout = timeout;
        self
    }

    /// Sets the maximum classification prefix. Values below 24 bytes are
    /// raised to 24 so the HTTP/2 preface always fits.
    #[must_use]
    pub fn with_max_prefix_len(mut self, len: usize) -> Self {
        self.max_prefix_len = len.max(24);
        self
    }

    /// Sets the per-engine backlog. Zero is raised to one.
    #[must_use]
    pub fn with_backlog(mut self, backlog: usize) -> Self {
        self.backlog = backlog.max(1);
        self
    }

    /// Sets the timeout policy.
    #[must_use]
    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MuxConfig::new();
        assert_eq!(config.bind_addr.port(), 0);
        assert_eq!(config.peek_timeout, Duration::from_secs(2));
        assert_eq!(config.max_prefix_len, 4096);
        assert_eq!(config.backlog, 128);
        assert_eq!(config.timeout_policy, TimeoutPolicy::FailOpen);
    }

    #[test]
    fn test_setters_clamp() {
        let config = MuxConfig::new().with_max_prefix_len(3).with_backlog(0);
        assert_eq!(config.max_prefix_len, 24);
        assert_eq!(config.backlog, 1);
    }

    #[test]
    fn test_builder() {
        let config = MuxConfig::builder()
            .peek_timeout(Duration::from_millis(10))
            .timeout_policy(TimeoutPolicy::Drop)
            .build();
        assert_eq!(config.peek_timeout, Duration::from_millis(10));
        assert_eq!(config.timeout_policy, TimeoutPolicy::Drop);
        assert_eq!(config.max_prefix_len, 4096);
    }
}
