//! Protocol multiplexing: gRPC and REST on one TCP port.
//!
//! Every accepted connection is classified by inspecting the first bytes
//! the client sends. HTTP/2 connections (the preface, or a first HEADERS
//! frame with a gRPC content type) go to the RPC engine; everything else goes
//! to the REST engine. The bytes read while classifying are replayed to the
//! engine, so neither engine can tell it is sharing a port.
//!
//! - [`Sniffer`]: bounded, deadline-limited classification
//! - [`Rule`] / [`Matcher`]: prioritized routing rules
//! - [`PrefixedStream`]: replays the classification prefix
//! - [`MuxListener`]: per-engine listener with `accept` and `into_incoming`
//! - [`DualProtocolServer`]: root accept loop and engine supervision

mod engine;
mod listener;
mod matcher;
mod server;
mod sniffer;
mod stream;

pub use engine::{Engine, RejectEngine};
pub use listener::MuxListener;
pub use matcher::{
    decide, default_rules, Any, Http1Fast, Http2HeaderField, Http2Preface, Matcher, Protocol,
    Rule, Verdict, HTTP1_METHODS, HTTP2_PREFACE,
};
pub use server::{DualProtocolServer, ShutdownHandle};
pub use sniffer::{SniffStats, Sniffer};
pub use stream::{MuxConnectInfo, MuxedStream, PrefixedStream};
