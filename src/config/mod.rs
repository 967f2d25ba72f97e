//! Configuration types for tracemux.
//!
//! This module provides configuration options for:
//! - [`MuxConfig`]: Protocol sniffing and the dual-protocol listener
//! - [`TracerConfig`]: Service name and sampling of a [`Tracer`](crate::tracing_support::Tracer)
//! - [`PipelineConfig`]: Addresses and knobs of the demo pipeline

mod mux;
mod pipeline;
mod tracer;

pub use mux::{MuxConfig, TimeoutPolicy};
pub use pipeline::{PipelineConfig, ENV_PREFIX};
pub use tracer::{Sampler, TracerConfig};
