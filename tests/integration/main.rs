//! Integration tests for tracemux.
//!
//! Every test binds its own servers to ephemeral loopback ports, so the
//! suite needs no external services and can run in parallel.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --features grpc,rest --test integration
//!
//! # Run a specific test with log output
//! RUST_LOG=tracemux=debug cargo test --features grpc,rest --test integration \
//!     test_end_to_end_span_tree -- --nocapture
//! ```

mod common;
mod mux_tests;
mod pipeline_tests;
mod propagation_tests;
