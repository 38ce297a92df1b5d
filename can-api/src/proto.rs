//! Generated protobuf types for the can API.

/// Pod service (create, start, delete, list)
pub mod pods {
    tonic::include_proto!("can.services.pods.v1");
}

/// Container service (attach, signal)
pub mod containers {
    tonic::include_proto!("can.services.containers.v1");
}
