//! Build script for gRPC code generation.
//!
//! Proto code is pre-generated and committed to `src/transport/proto/`.
//! This build script only regenerates if the generated file is missing.

// Build scripts should panic on failure - that's how they signal build errors
#![allow(clippy::expect_used)]

fn main() {
    #[cfg(feature = "grpc")]
    {
        let proto_file = "proto/tracemux/storage/v1/storage.proto";
        let proto_dir = "proto";
        let generated_file = "src/transport/proto/tracemux.storage.v1.rs";

        // Skip generation if the generated file already exists (it's committed to the repo)
        if std::path::Path::new(generated_file).exists() {
            println!("cargo:rerun-if-changed={generated_file}");
            return;
        }

        if !std::path::Path::new(proto_file).exists() {
            println!(
                "cargo:warning=Proto file not found at {proto_file}, skipping code generation"
            );
            return;
        }

        println!("cargo:rerun-if-changed={proto_file}");

        // The storage node serves the API and the service node calls it.
        tonic_prost_build::configure()
            .build_server(true)
            .build_client(true)
            .out_dir("src/transport/proto")
            .compile_protos(&[proto_file], &[proto_dir])
            .expect("Failed to compile proto files");
    }
}
