//! Error types for tracemux.
//!
//! Every fallible operation returns [`Error`], which carries an
//! [`ErrorKind`] for matching plus a message and an optional source.
//!
//! ## Key Invariant
//!
//! Per-connection and per-request failures never escape their connection:
//! the sniffer drops the connection, handlers tag the active span and
//! answer with a status code. Only listener failures and
//! [`ErrorKind::EngineFatal`] end [`DualProtocolServer::serve`].
//!
//! ```rust,ignore
//! match server.serve(rpc, rest).await {
//!     Ok(()) => {}                                      // listener closed
//!     Err(e) if e.kind() == ErrorKind::EngineFatal => {} // sibling torn down
//!     Err(e) => return Err(e),
//! }
//! ```
//!
//! [`DualProtocolServer::serve`]: crate::mux::DualProtocolServer::serve

mod core;
mod kind;

pub use self::core::Error;
pub use kind::ErrorKind;

/// A specialized `Result` type for tracemux operations.
pub type Result<T> = std::result::Result<T, Error>;
