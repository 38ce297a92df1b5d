//! OCI bundle generation for pod containers.
//!
//! Each container gets its own bundle directory holding the runtime spec
//! (`config.json`). Pod membership is recorded in the spec annotations so the
//! pod view can be rebuilt from disk.

use super::image::ImageConfig;
use crate::error::RuntimeError;
use crate::model::{ContainerSpec, PodSpec};
use crate::validation::ID_SEPARATOR;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

pub const POD_ANNOTATION: &str = "io.can.pod";
pub const CONTAINER_ANNOTATION: &str = "io.can.container";
pub const IMAGE_ANNOTATION: &str = "io.can.image";
pub const TTY_ANNOTATION: &str = "io.can.tty";
pub const INDEX_ANNOTATION: &str = "io.can.index";

/// Runtime identifier of a container within its namespace.
///
/// Pod and container names never contain [`ID_SEPARATOR`], so distinct pairs
/// never share an id.
pub fn container_id(pod: &str, container: &str) -> String {
    format!("{pod}{ID_SEPARATOR}{container}")
}

/// Pod membership of a container, read back from its bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleInfo {
    pub id: String,
    pub pod: String,
    pub name: String,
    pub image: String,
    pub tty: bool,
    pub index: usize,
}

/// Write `config.json` for `container` of `pod` into `bundle_path`.
pub async fn write_bundle(
    bundle_path: &Path,
    pod: &PodSpec,
    container: &ContainerSpec,
    rootfs: &Path,
    image_config: &ImageConfig,
) -> Result<(), RuntimeError> {
    let index = pod
        .containers
        .iter()
        .position(|c| c.name == container.name)
        .unwrap_or(pod.containers.len());
    let spec = OciSpec::new(pod, container, index, rootfs, image_config);
    let spec_json = serde_json::to_string_pretty(&spec).map_err(std::io::Error::other)?;

    fs::create_dir_all(bundle_path).await?;
    fs::write(bundle_path.join("config.json"), spec_json).await?;
    Ok(())
}

/// Read the pod membership annotations of a bundle.
pub async fn read_bundle(bundle_path: &Path) -> Result<BundleInfo, RuntimeError> {
    let id = bundle_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RuntimeError::InvalidBundle(bundle_path.display().to_string()))?
        .to_string();

    let content = fs::read(bundle_path.join("config.json")).await?;
    let spec: AnnotatedSpec = serde_json::from_slice(&content)
        .map_err(|e| RuntimeError::InvalidBundle(format!("{id}: {e}")))?;
    let annotation = |key: &str| {
        spec.annotations
            .get(key)
            .cloned()
            .ok_or_else(|| RuntimeError::InvalidBundle(format!("{id}: missing {key}")))
    };

    Ok(BundleInfo {
        pod: annotation(POD_ANNOTATION)?,
        name: annotation(CONTAINER_ANNOTATION)?,
        image: annotation(IMAGE_ANNOTATION)?,
        tty: annotation(TTY_ANNOTATION)? == "true",
        index: annotation(INDEX_ANNOTATION)?
            .parse()
            .map_err(|e| RuntimeError::InvalidBundle(format!("{id}: bad index: {e}")))?,
        id,
    })
}

#[derive(Deserialize)]
struct AnnotatedSpec {
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

/// Minimal OCI Runtime Spec.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OciSpec {
    oci_version: String,
    root: Root,
    process: Process,
    hostname: String,
    mounts: Vec<Mount>,
    linux: Linux,
    annotations: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct Root {
    path: String,
    readonly: bool,
}

#[derive(Debug, Serialize)]
struct Process {
    terminal: bool,
    user: User,
    args: Vec<String>,
    env: Vec<String>,
    cwd: String,
}

#[derive(Debug, Serialize)]
struct User {
    uid: u32,
    gid: u32,
}

#[derive(Debug, Serialize)]
struct Mount {
    destination: String,
    #[serde(rename = "type")]
    mount_type: String,
    source: String,
    options: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Linux {
    namespaces: Vec<Namespace>,
}

#[derive(Debug, Serialize)]
struct Namespace {
    #[serde(rename = "type")]
    ns_type: String,
}

impl Mount {
    fn new(destination: &str, mount_type: &str, source: &str, options: &[&str]) -> Self {
        Self {
            destination: destination.to_string(),
            mount_type: mount_type.to_string(),
            source: source.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }
}

/// Process arguments: container args replace the image CMD, the image
/// ENTRYPOINT is always kept.
fn process_args(container: &ContainerSpec, image_config: &ImageConfig) -> Vec<String> {
    let mut args = image_config.entrypoint.clone();
    if container.args.is_empty() {
        args.extend(image_config.cmd.iter().cloned());
    } else {
        args.extend(container.args.iter().cloned());
    }
    if args.is_empty() {
        args.push("/bin/sh".to_string());
    }
    args
}

impl OciSpec {
    fn new(
        pod: &PodSpec,
        container: &ContainerSpec,
        index: usize,
        rootfs: &Path,
        image_config: &ImageConfig,
    ) -> Self {
        let mut env = vec![
            "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
            "TERM=xterm".to_string(),
        ];
        env.extend(image_config.env.iter().cloned());
        env.extend(container.env.iter().cloned());

        let cwd = if !container.working_dir.is_empty() {
            container.working_dir.clone()
        } else if !image_config.working_dir.is_empty() {
            image_config.working_dir.clone()
        } else {
            "/".to_string()
        };

        let annotations = BTreeMap::from([
            (POD_ANNOTATION.to_string(), pod.name.clone()),
            (CONTAINER_ANNOTATION.to_string(), container.name.clone()),
            (IMAGE_ANNOTATION.to_string(), container.image.clone()),
            (TTY_ANNOTATION.to_string(), container.tty.to_string()),
            (INDEX_ANNOTATION.to_string(), index.to_string()),
        ]);

        OciSpec {
            oci_version: "1.0.0".to_string(),
            root: Root {
                path: rootfs.to_string_lossy().to_string(),
                readonly: false,
            },
            process: Process {
                // stdio is wired through FIFOs, never a console socket
                terminal: false,
                user: User { uid: 0, gid: 0 },
                args: process_args(container, image_config),
                env,
                cwd,
            },
            hostname: pod.name.clone(),
            mounts: vec![
                Mount::new("/proc", "proc", "proc", &[]),
                Mount::new(
                    "/dev",
                    "tmpfs",
                    "tmpfs",
                    &["nosuid", "strictatime", "mode=755", "size=65536k"],
                ),
                Mount::new(
                    "/dev/pts",
                    "devpts",
                    "devpts",
                    &["nosuid", "noexec", "newinstance", "ptmxmode=0666", "mode=0620"],
                ),
                Mount::new("/sys", "sysfs", "sysfs", &["nosuid", "noexec", "nodev", "ro"]),
                Mount::new("/tmp", "tmpfs", "tmpfs", &["nosuid", "nodev", "mode=1777"]),
                Mount::new("/run", "tmpfs", "tmpfs", &["nosuid", "nodev", "mode=755"]),
            ],
            linux: Linux {
                // No network namespace: containers share the host network.
                namespaces: vec![
                    Namespace {
                        ns_type: "pid".to_string(),
                    },
                    Namespace {
                        ns_type: "mount".to_string(),
                    },
                ],
            },
            annotations,
        }
    }
}
