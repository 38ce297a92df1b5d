//! Capability provider backed by the youki OCI runtime.
//!
//! ## Layout
//!
//! - `<images_dir>/<image>/rootfs`: extracted image, shared by containers
//! - `<pods_dir>/<namespace>/<pod>_<container>/`: bundle of one container,
//!   holding `config.json` and the `stdin`/`stdout`/`stderr` FIFOs
//! - `<youki_root>/<namespace>/`: youki state root of one namespace
//!
//! Every namespace, pod name and container id is checked to be a single path
//! component before it is joined onto these directories.
//!
//! Container stdio is wired through the FIFOs at start time, which is what
//! lets later attach calls reach a running process. The container holds its
//! stdin FIFO read-write, so it stays open across attach sessions and a
//! detaching client never delivers EOF to it.

mod bundle;
mod command;
mod image;

pub use bundle::{BundleInfo, container_id};
pub use image::{ImageConfig, ImageStore};

use super::stdio::{self, AttachIo};
use super::{Result, RuntimeClient};
use crate::error::RuntimeError;
use crate::model::{Container, ContainerSpec, ContainerStatus, Pod, PodSpec};
use crate::progress::ImageFetchHandle;
use crate::validation;
use async_trait::async_trait;
use command::{ProcessStdio, Youki};
use log::{debug, info, warn};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::net::unix::pipe;

const STDIO_FIFOS: [&str; 3] = ["stdin", "stdout", "stderr"];

/// Paths used by [`YoukiClient`].
#[derive(Debug, Clone)]
pub struct YoukiConfig {
    pub youki_path: PathBuf,
    pub youki_root: PathBuf,
    pub pods_dir: PathBuf,
    pub images_dir: PathBuf,
}

pub struct YoukiClient {
    youki: Youki,
    images: ImageStore,
    pods_dir: PathBuf,
}

impl YoukiClient {
    pub fn new(config: YoukiConfig) -> Self {
        Self {
            youki: Youki::new(config.youki_path, config.youki_root),
            images: ImageStore::new(config.images_dir),
            pods_dir: config.pods_dir,
        }
    }

    fn namespace_dir(&self, namespace: &str) -> Result<PathBuf> {
        Ok(self.pods_dir.join(component(namespace)?))
    }

    fn bundle_path(&self, namespace: &str, container_id: &str) -> Result<PathBuf> {
        Ok(self.namespace_dir(namespace)?.join(component(container_id)?))
    }

    fn existing_bundle(&self, namespace: &str, container_id: &str) -> Result<PathBuf> {
        let bundle = self.bundle_path(namespace, container_id)?;
        if bundle.join("config.json").is_file() {
            Ok(bundle)
        } else {
            Err(RuntimeError::ContainerNotFound(container_id.to_string()))
        }
    }

    /// All readable bundles of a namespace.
    async fn bundles(&self, namespace: &str) -> Result<Vec<BundleInfo>> {
        let dir = self.namespace_dir(namespace)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut bundles = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match bundle::read_bundle(&path).await {
                Ok(info) => bundles.push(info),
                Err(e) => warn!("YoukiClient: Skipping bundle {}: {}", path.display(), e),
            }
        }
        Ok(bundles)
    }

    async fn container_view(&self, namespace: &str, info: BundleInfo) -> Container {
        let status = self
            .youki
            .state(namespace, &info.id)
            .await
            .map(|state| state.container_status())
            .unwrap_or(ContainerStatus::Created);
        Container {
            id: info.id,
            name: info.name,
            image: info.image,
            tty: info.tty,
            status,
        }
    }
}

/// `value` as a single path component, or [`RuntimeError::InvalidName`].
fn component(value: &str) -> Result<&str> {
    if validation::is_valid_id(value) {
        Ok(value)
    } else {
        Err(RuntimeError::InvalidName(value.to_string()))
    }
}

/// Create the stdio FIFOs of a bundle and open them for the container process.
///
/// Each FIFO is opened read-write, so opening never blocks without a peer and
/// the container keeps its own stdin writer. Attach clients come and go
/// without the process seeing EOF on stdin.
fn open_stdio_fifos(bundle: &Path) -> Result<[File; 3]> {
    let open = |name: &str| -> Result<File> {
        let path = bundle.join(name);
        match mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR) {
            Ok(()) | Err(Errno::EEXIST) => {}
            Err(e) => return Err(std::io::Error::from(e).into()),
        }
        Ok(OpenOptions::new().read(true).write(true).open(&path)?)
    };
    let [stdin, stdout, stderr] = STDIO_FIFOS;
    Ok([open(stdin)?, open(stdout)?, open(stderr)?])
}

fn open_process_stdio(bundle: &Path) -> Result<ProcessStdio> {
    let [stdin, stdout, stderr] = open_stdio_fifos(bundle)?;
    Ok(ProcessStdio {
        stdin: Stdio::from(stdin),
        stdout: Stdio::from(stdout),
        stderr: Stdio::from(stderr),
    })
}

#[async_trait]
impl RuntimeClient for YoukiClient {
    async fn pull_image(
        &self,
        namespace: &str,
        image: &str,
        progress: &ImageFetchHandle,
    ) -> Result<()> {
        info!("YoukiClient: Pulling {} for namespace {}", image, namespace);
        self.images.pull(image, progress).await.map(drop)
    }

    async fn create_container(&self, pod: &PodSpec, container: &ContainerSpec) -> Result<()> {
        for name in [&pod.name, &container.name] {
            if !validation::is_valid_name(name) {
                return Err(RuntimeError::InvalidName(name.clone()));
            }
        }
        let id = container_id(&pod.name, &container.name);
        let bundle = self.bundle_path(&pod.namespace, &id)?;
        if bundle.join("config.json").exists() {
            return Err(RuntimeError::AlreadyExists(id));
        }

        let rootfs = self.images.rootfs(&container.image)?;
        let image_config = self.images.config(&container.image).await?;
        bundle::write_bundle(&bundle, pod, container, &rootfs, &image_config).await?;

        info!(
            "YoukiClient: Container {} created at {}",
            id,
            bundle.display()
        );
        Ok(())
    }

    async fn start_container(&self, namespace: &str, container_id: &str, tty: bool) -> Result<()> {
        let bundle = self.existing_bundle(namespace, container_id)?;
        if tty {
            debug!(
                "YoukiClient: Container {} requested a tty, using FIFO stdio",
                container_id
            );
        }

        let stdio = open_process_stdio(&bundle)?;
        self.youki
            .create(namespace, container_id, &bundle, stdio)
            .await?;
        self.youki.start(namespace, container_id).await?;

        info!("YoukiClient: Container {} started", container_id);
        Ok(())
    }

    async fn stop_container(&self, namespace: &str, container_id: &str) -> Result<()> {
        let bundle = self.existing_bundle(namespace, container_id)?;

        if self.youki.state(namespace, container_id).await.is_some() {
            self.youki.delete(namespace, container_id).await?;
        }
        fs::remove_dir_all(&bundle).await?;

        info!("YoukiClient: Container {} stopped and removed", container_id);
        Ok(())
    }

    async fn get_containers(&self, namespace: &str, pod: &str) -> Result<Vec<Container>> {
        let mut members: Vec<_> = self
            .bundles(namespace)
            .await?
            .into_iter()
            .filter(|info| info.pod == pod)
            .collect();
        if members.is_empty() {
            return Err(RuntimeError::PodNotFound(pod.to_string()));
        }
        members.sort_by_key(|info| info.index);

        let mut containers = Vec::with_capacity(members.len());
        for info in members {
            containers.push(self.container_view(namespace, info).await);
        }
        Ok(containers)
    }

    async fn get_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        let mut grouped: BTreeMap<String, Vec<BundleInfo>> = BTreeMap::new();
        for info in self.bundles(namespace).await? {
            grouped.entry(info.pod.clone()).or_default().push(info);
        }

        let mut pods = Vec::with_capacity(grouped.len());
        for (name, mut members) in grouped {
            members.sort_by_key(|info| info.index);
            let mut containers = Vec::with_capacity(members.len());
            for info in members {
                containers.push(self.container_view(namespace, info).await);
            }
            pods.push(Pod::new(namespace, name, containers));
        }
        Ok(pods)
    }

    async fn namespaces(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.pods_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut namespaces = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                namespaces.push(name.to_string());
            }
        }
        namespaces.sort();
        Ok(namespaces)
    }

    async fn attach(&self, namespace: &str, container_id: &str, io: AttachIo) -> Result<()> {
        let bundle = self.existing_bundle(namespace, container_id)?;
        let running = self
            .youki
            .state(namespace, container_id)
            .await
            .is_some_and(|state| state.container_status() == ContainerStatus::Running);
        if !running {
            return Err(RuntimeError::NotRunning(container_id.to_string()));
        }

        let stdin = pipe::OpenOptions::new().open_sender(bundle.join("stdin"))?;
        let stdout = pipe::OpenOptions::new().open_receiver(bundle.join("stdout"))?;
        let stderr = pipe::OpenOptions::new().open_receiver(bundle.join("stderr"))?;

        info!("YoukiClient: Attached to {} in {}", container_id, namespace);
        stdio::bind(io, stdin, stdout, stderr).await?;
        info!("YoukiClient: Detached from {}", container_id);
        Ok(())
    }

    async fn signal(&self, namespace: &str, container_id: &str, signal: Signal) -> Result<()> {
        self.existing_bundle(namespace, container_id)?;
        info!(
            "YoukiClient: Sending {} to {} in {}",
            signal, container_id, namespace
        );
        self.youki.kill(namespace, container_id, signal as i32).await
    }
}
