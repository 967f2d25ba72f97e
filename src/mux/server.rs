//! The dual-protocol server: one port, two engines.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::config::MuxConfig;
use crate::mux::engine::Engine;
use crate::mux::listener::MuxListener;
use crate::mux::matcher::{Protocol, Rule};
use crate::mux::sniffer::{SniffStats, Sniffer};
use crate::mux::stream::MuxedStream;
use crate::Error;

/// Stops a running [`DualProtocolServer`].
///
/// Cloning is cheap. Calling `shutdown` more than once, or before `serve`
/// starts, is harmless.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Requests a clean stop.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    /// Returns `true` once shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Accepts TCP connections on one socket, classifies each one and routes it
/// to the RPC or the REST engine.
///
/// ## Example
///
/// ```rust,no_run
/// use tracemux::config::MuxConfig;
/// use tracemux::mux::DualProtocolServer;
/// # async fn run<R, H>(rpc: R, rest: H) -> tracemux::Result<()>
/// # where R: tracemux::mux::Engine, H: tracemux::mux::Engine {
///
/// let server = DualProtocolServer::bind(MuxConfig::default()).await?;
/// let shutdown = server.shutdown_handle();
/// tokio::spawn(async move {
///     let _ = tokio::signal::ctrl_c().await;
///     shutdown.shutdown();
/// });
/// server.serve(rpc, rest).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DualProtocolServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: MuxConfig,
    sniffer: Sniffer,
    shutdown: ShutdownHandle,
}

impl DualProtocolServer {
    /// Binds the root listener to `config.bind_addr`.
    pub async fn bind(config: MuxConfig) -> Result<Self, Error> {
        let listener = TcpListener::bind(config.bind_addr).await.map_err(|e| {
            Error::configuration(format!("failed to bind {}: {e}", config.bind_addr)).with_source(e)
        })?;
        Self::from_listener(listener, config)
    }

    /// Uses an already bound listener.
    pub fn from_listener(listener: TcpListener, config: MuxConfig) -> Result<Self, Error> {
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            sniffer: Sniffer::new(&config),
            config,
            shutdown: ShutdownHandle::new(),
        })
    }

    /// Replaces the default gRPC/REST rules.
    #[must_use]
    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.sniffer = Sniffer::with_rules(&self.config, rules);
        self
    }

    /// Returns the address the root listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns a handle that stops [`serve`](Self::serve).
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Returns the classification counters.
    pub fn stats(&self) -> Arc<SniffStats> {
        Arc::clone(self.sniffer.stats())
    }

    /// Runs both engines and the root accept loop.
    ///
    /// Returns `Ok(())` after a requested shutdown once both engines have
    /// stopped. If an engine stops on its own or fails, the sibling engine
    /// is aborted and `EngineFatal` is returned; a non-transient accept
    /// error is returned as is.
    pub async fn serve<R, H>(self, rpc: R, rest: H) -> Result<(), Error>
    where
        R: Engine,
        H: Engine,
    {
        let Self {
            listener,
            local_addr,
            config,
            sniffer,
            shutdown,
        } = self;

        let (rpc_tx, rpc_listener) = MuxListener::channel(config.backlog, local_addr);
        let (rest_tx, rest_listener) = MuxListener::channel(config.backlog, local_addr);
        let router = Router { rpc: rpc_tx, rest: rest_tx };

        let mut engines = JoinSet::new();
        spawn_engine(&mut engines, rpc, rpc_listener);
        spawn_engine(&mut engines, rest, rest_listener);

        tracing::info!(addr = %local_addr, "dual-protocol server listening");

        let mut shutdown_rx = shutdown.subscribe();
        let mut connections = JoinSet::new();

        let outcome = loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.wait_for(|stopped| *stopped) => break Ok(()),

                Some(joined) = engines.join_next() => {
                    let (name, result) = match joined {
                        Ok(done) => done,
                        Err(join_err) => ("unknown", Err(Error::internal(join_err.to_string()))),
                    };
                    break Err(engine_failure(name, result));
                }

                accepted = listener.accept() => match accepted {
                    Ok((tcp, peer)) => {
                        let sniffer = sniffer.clone();
                        let router = router.clone();
                        connections.spawn(async move {
                            route(sniffer, router, tcp, peer).await;
                        });
                    }
                    Err(err) if is_transient(&err) => {
                        tracing::debug!(error = %err, "transient accept error");
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "accept failed");
                        break Err(Error::from(err));
                    }
                },

                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        };

        // stop routing: in-flight classifications hold router clones
        shutdown.shutdown();
        connections.shutdown().await;
        drop(router);
        drop(listener);

        match outcome {
            Ok(()) => {
                tracing::info!(addr = %local_addr, "dual-protocol server shutting down");
                while let Some(joined) = engines.join_next().await {
                    let (name, result) = match joined {
                        Ok(done) => done,
                        Err(join_err) => ("unknown", Err(Error::internal(join_err.to_string()))),
                    };
                    match result {
                        Ok(()) => {}
                        Err(err) if err.is_listener_closed() => {}
                        Err(err) => {
                            engines.shutdown().await;
                            return Err(engine_failure(name, Err(err)));
                        }
                    }
                    tracing::debug!(engine = name, "engine stopped");
                }
                Ok(())
            }
            Err(err) => {
                engines.shutdown().await;
                Err(err)
            }
        }
    }
}

#[derive(Clone)]
struct Router {
    rpc: mpsc::Sender<MuxedStream>,
    rest: mpsc::Sender<MuxedStream>,
}

type EngineOutcome = (&'static str, Result<(), Error>);

fn spawn_engine<E: Engine>(engines: &mut JoinSet<EngineOutcome>, engine: E, listener: MuxListener) {
    let name = engine.name();
    engines.spawn(async move {
        tracing::debug!(engine = name, "engine starting");
        (name, engine.serve(listener).await)
    });
}

fn engine_failure(name: &'static str, result: Result<(), Error>) -> Error {
    let err = Error::engine_fatal(name);
    match result {
        Ok(()) => {
            tracing::error!(engine = name, "engine stopped before shutdown");
            err
        }
        Err(cause) => {
            tracing::error!(engine = name, error = %cause, "engine failed");
            err.with_source(cause)
        }
    }
}

async fn route(sniffer: Sniffer, router: Router, tcp: tokio::net::TcpStream, peer: SocketAddr) {
    let (protocol, stream) = match sniffer.classify(tcp).await {
        Ok(classified) => classified,
        Err(err) => {
            tracing::debug!(%peer, error = %err, "connection dropped during classification");
            return;
        }
    };

    tracing::debug!(%peer, %protocol, prefix = stream.prefix().len(), "connection classified");

    let tx = match protocol {
        Protocol::Rpc => &router.rpc,
        Protocol::Rest => &router.rest,
    };
    if tx.send(MuxedStream::new(stream, protocol)).await.is_err() {
        tracing::debug!(%peer, %protocol, "engine listener closed, dropping connection");
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
