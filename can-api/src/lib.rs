//! can - gRPC control-plane gateway for pods.
//!
//! Accepts pod and container requests over gRPC and translates them into
//! calls against a runtime capability provider ([`runtime::RuntimeClient`]).
//!
//! ## Architecture
//!
//! - **Pod Service**: creation pipeline with streamed image fetch progress,
//!   start, delete and list
//! - **Container Service**: interactive attach sessions and signal delivery
//! - **State Reporter**: background log of pods per namespace
//! - **Runtime**: provider interface plus the youki-backed implementation

pub mod error;
pub mod mapping;
pub mod model;
pub mod progress;
pub mod proto;
pub mod runtime;
pub mod services;
pub mod validation;

use crate::proto::containers::containers_server::ContainersServer;
use crate::proto::pods::pods_server::PodsServer;
use crate::runtime::RuntimeClient;
use crate::runtime::youki::YoukiConfig;
use crate::services::container::ContainerApiHandler;
use crate::services::pod::PodApiHandler;
use nix::unistd::Uid;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::Server;
use tonic::transport::server::Router;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// gRPC listen address.
    pub listen: SocketAddr,
    /// Base directory for pod bundles.
    pub pods_dir: PathBuf,
    /// Base directory for images.
    pub images_dir: PathBuf,
    /// Path to youki binary.
    pub youki_path: PathBuf,
    /// Root directory for youki container state.
    pub youki_root: PathBuf,
    /// Cadence of progress snapshots during pod creation.
    pub progress_interval: Duration,
    /// Cadence of state reports.
    pub report_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let listen = SocketAddr::from(([0, 0, 0, 0], 5000));
        if Uid::effective().is_root() {
            Self {
                listen,
                pods_dir: PathBuf::from("/var/lib/can/pods"),
                images_dir: PathBuf::from("/var/lib/can/images"),
                youki_path: PathBuf::from("/usr/bin/youki"),
                youki_root: PathBuf::from("/run/can/youki"),
                progress_interval: services::pod::broadcaster::DEFAULT_INTERVAL,
                report_interval: services::reporter::DEFAULT_INTERVAL,
            }
        } else {
            // Running locally for development
            Self {
                listen,
                pods_dir: PathBuf::from("/tmp/can/pods"),
                images_dir: PathBuf::from("/tmp/can/images"),
                youki_path: PathBuf::from("youki"),
                youki_root: PathBuf::from("/tmp/can/youki"),
                progress_interval: services::pod::broadcaster::DEFAULT_INTERVAL,
                report_interval: services::reporter::DEFAULT_INTERVAL,
            }
        }
    }
}

impl Config {
    pub fn youki(&self) -> YoukiConfig {
        YoukiConfig {
            youki_path: self.youki_path.clone(),
            youki_root: self.youki_root.clone(),
            pods_dir: self.pods_dir.clone(),
            images_dir: self.images_dir.clone(),
        }
    }
}

/// gRPC router serving the Pods and Containers services on top of `runtime`.
pub fn api_router(runtime: Arc<dyn RuntimeClient>, progress_interval: Duration) -> Router {
    Server::builder()
        .add_service(PodsServer::new(PodApiHandler::new(
            runtime.clone(),
            progress_interval,
        )))
        .add_service(ContainersServer::new(ContainerApiHandler::new(runtime)))
}
