//! The engine abstraction served behind a [`MuxListener`].

use async_trait::async_trait;

use crate::mux::listener::MuxListener;
use crate::Error;

/// A protocol server that runs its own accept loop over a [`MuxListener`].
///
/// `serve` returns `Ok(())` or a `ListenerClosed` error once the listener
/// closes; any other error is fatal to the whole dual-protocol server.
#[async_trait]
pub trait Engine: Send + 'static {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Serves connections until the listener closes or the engine fails.
    async fn serve(self, listener: MuxListener) -> Result<(), Error>;
}

/// An engine that closes every connection routed to it.
///
/// Serves a port whose owner speaks only one protocol: connections of the
/// other kind are accepted by the root loop, then dropped here.
#[derive(Debug, Clone, Copy)]
pub struct RejectEngine {
    name: &'static str,
}

impl RejectEngine {
    /// Creates an engine reported under `name`.
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl Engine for RejectEngine {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn serve(self, mut listener: MuxListener) -> Result<(), Error> {
        loop {
            match listener.accept().await {
                Ok(stream) => {
                    tracing::debug!(
                        engine = self.name,
                        peer = ?stream.peer_addr(),
                        "rejecting unsupported protocol"
                    );
                }
                Err(err) if err.is_listener_closed() => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }
}
