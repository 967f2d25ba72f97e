//! Generated protobuf and gRPC bindings for the storage API.

#![allow(missing_docs, clippy::all, clippy::pedantic)]

include!("tracemux.storage.v1.rs");
