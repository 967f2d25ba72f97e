//! Per-engine sub-listeners fed by the root accept loop.

use std::io;
use std::net::SocketAddr;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::mux::stream::MuxedStream;
use crate::Error;

/// A listener that yields connections classified for one engine.
///
/// It closes when the dual-protocol server stops routing to it; `accept`
/// then returns `ListenerClosed`.
#[derive(Debug)]
pub struct MuxListener {
    rx: mpsc::Receiver<MuxedStream>,
    local_addr: SocketAddr,
}

impl MuxListener {
    /// Creates a listener and the sender that feeds it.
    pub(crate) fn channel(backlog: usize, local_addr: SocketAddr) -> (mpsc::Sender<MuxedStream>, Self) {
        let (tx, rx) = mpsc::channel(backlog.max(1));
        (tx, Self { rx, local_addr })
    }

    /// Waits for the next classified connection.
    pub async fn accept(&mut self) -> Result<MuxedStream, Error> {
        self.rx.recv().await.ok_or_else(Error::listener_closed)
    }

    /// Returns the address of the shared root listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Turns the listener into a stream of connections that ends when the
    /// listener closes.
    pub fn into_incoming(self) -> BoxStream<'static, io::Result<MuxedStream>> {
        futures::stream::unfold(self, |mut listener| async move {
            match listener.accept().await {
                Ok(stream) => Some((Ok(stream), listener)),
                Err(_) => None,
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[tokio::test]
    async fn test_accept_after_senders_drop() {
        let (tx, mut listener) = MuxListener::channel(1, SocketAddr::from(([127, 0, 0, 1], 0)));
        drop(tx);

        let err = listener.accept().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ListenerClosed);
        assert!(err.is_listener_closed());
    }

    #[tokio::test]
    async fn test_incoming_ends_on_close() {
        let (tx, listener) = MuxListener::channel(1, SocketAddr::from(([127, 0, 0, 1], 0)));
        let mut incoming = listener.into_incoming();
        drop(tx);
        assert!(incoming.next().await.is_none());
    }
}
