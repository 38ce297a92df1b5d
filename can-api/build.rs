fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Server for the gateway itself, client for the integration tests.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/pods.proto", "proto/containers.proto"], &["proto"])?;
    Ok(())
}
