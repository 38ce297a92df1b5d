//! Runtime capability provider interface.
//!
//! The gateway never talks to a container runtime directly. Everything it
//! needs is expressed by [`RuntimeClient`]; [`youki::YoukiClient`] is the
//! implementation shipped with the binary.

pub mod stdio;
pub mod youki;

pub use stdio::{AttachIo, ByteSink, ByteSource, ReaderSource, WriterSink};

use crate::error::RuntimeError;
use crate::model::{Container, ContainerSpec, Pod, PodSpec};
use crate::progress::ImageFetchHandle;
use async_trait::async_trait;
use nix::sys::signal::Signal;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Operations the gateway needs from a container runtime.
///
/// Calls may block for as long as the runtime needs; callers apply no timeouts.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Make `image` available locally, reporting fetch progress into `progress`.
    async fn pull_image(
        &self,
        namespace: &str,
        image: &str,
        progress: &ImageFetchHandle,
    ) -> Result<()>;

    /// Create (but do not start) `container` as part of `pod`.
    async fn create_container(&self, pod: &PodSpec, container: &ContainerSpec) -> Result<()>;

    async fn start_container(&self, namespace: &str, container_id: &str, tty: bool) -> Result<()>;

    /// Stop the container process and remove the container.
    async fn stop_container(&self, namespace: &str, container_id: &str) -> Result<()>;

    /// Containers of one pod, in declaration order.
    async fn get_containers(&self, namespace: &str, pod: &str) -> Result<Vec<Container>>;

    async fn get_pods(&self, namespace: &str) -> Result<Vec<Pod>>;

    /// Namespaces that currently hold at least one container.
    async fn namespaces(&self) -> Result<Vec<String>>;

    /// Bind `io` to the stdio of a running container until the process exits
    /// or one of the channels fails.
    async fn attach(&self, namespace: &str, container_id: &str, io: AttachIo) -> Result<()>;

    async fn signal(&self, namespace: &str, container_id: &str, signal: Signal) -> Result<()>;
}
