//! Internal pod and container model.
//!
//! The gRPC types are mapped into these in [`crate::mapping`] so the
//! services and the runtime provider never depend on the wire format.

use std::collections::HashMap;

/// Desired state of a pod, as accepted by a create request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSpec {
    pub namespace: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    pub containers: Vec<ContainerSpec>,
}

/// Desired state of one container in a pod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub tty: bool,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: String,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }
}

/// Runtime status of a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContainerStatus {
    #[default]
    Unknown,
    Created,
    Running,
    Stopped,
}

impl ContainerStatus {
    /// Parse the `status` field of an OCI runtime state document.
    pub fn from_oci(status: &str) -> Self {
        match status {
            "creating" | "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "stopped" => ContainerStatus::Stopped,
            _ => ContainerStatus::Unknown,
        }
    }
}

/// A container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// Runtime identifier, unique within a namespace.
    pub id: String,
    /// Name from the pod spec.
    pub name: String,
    pub image: String,
    pub tty: bool,
    pub status: ContainerStatus,
}

/// A pod as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    pub containers: Vec<Container>,
}

impl Pod {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, containers: Vec<Container>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            containers,
        }
    }
}
