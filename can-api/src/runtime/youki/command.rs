//! youki command invocations.
//!
//! Every namespace gets its own youki state root so container ids only need
//! to be unique within a namespace.

use crate::error::RuntimeError;
use crate::model::ContainerStatus;
use log::{debug, error, info};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Subset of the OCI runtime state document printed by `youki state`.
#[derive(Debug, Deserialize)]
pub struct OciState {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub pid: Option<i32>,
}

impl OciState {
    pub fn container_status(&self) -> ContainerStatus {
        ContainerStatus::from_oci(&self.status)
    }
}

/// Stdio handles for the container process.
pub struct ProcessStdio {
    pub stdin: Stdio,
    pub stdout: Stdio,
    pub stderr: Stdio,
}

pub struct Youki {
    path: PathBuf,
    root: PathBuf,
}

impl Youki {
    pub fn new(path: PathBuf, root: PathBuf) -> Self {
        Self { path, root }
    }

    fn command(&self, namespace: &str) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.arg("--root").arg(self.root.join(namespace));
        cmd
    }

    /// Run a short-lived youki command and return its stdout.
    async fn run(&self, namespace: &str, args: &[&str]) -> Result<Vec<u8>, RuntimeError> {
        debug!(
            "Youki: Executing youki {} [{}] {}",
            self.path.display(),
            namespace,
            args.join(" ")
        );

        let output = self
            .command(namespace)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RuntimeError::Youki(format!("Failed to execute youki: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let err_msg = format!(
                "youki {} exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                stderr.trim()
            );
            error!("Youki: {err_msg}");
            return Err(RuntimeError::Youki(err_msg));
        }

        Ok(output.stdout)
    }

    /// `youki create`, with the container process inheriting `stdio`.
    pub async fn create(
        &self,
        namespace: &str,
        container_id: &str,
        bundle: &Path,
        stdio: ProcessStdio,
    ) -> Result<(), RuntimeError> {
        tokio::fs::create_dir_all(self.root.join(namespace)).await?;

        info!("Youki: Creating container {} in {}", container_id, namespace);
        let status = self
            .command(namespace)
            .arg("--log")
            .arg(bundle.join("youki.log"))
            .arg("create")
            .arg("--bundle")
            .arg(bundle)
            .arg(container_id)
            .stdin(stdio.stdin)
            .stdout(stdio.stdout)
            .stderr(stdio.stderr)
            .status()
            .await
            .map_err(|e| RuntimeError::Youki(format!("Failed to spawn youki create: {e}")))?;

        if !status.success() {
            let err_msg = format!(
                "youki create exited with {status}, see {}",
                bundle.join("youki.log").display()
            );
            error!("Youki: {err_msg}");
            return Err(RuntimeError::Youki(err_msg));
        }
        Ok(())
    }

    pub async fn start(&self, namespace: &str, container_id: &str) -> Result<(), RuntimeError> {
        self.run(namespace, &["start", container_id]).await.map(drop)
    }

    pub async fn kill(
        &self,
        namespace: &str,
        container_id: &str,
        signal: i32,
    ) -> Result<(), RuntimeError> {
        let signal = signal.to_string();
        self.run(namespace, &["kill", container_id, &signal])
            .await
            .map(drop)
    }

    pub async fn delete(&self, namespace: &str, container_id: &str) -> Result<(), RuntimeError> {
        self.run(namespace, &["delete", "--force", container_id])
            .await
            .map(drop)
    }

    /// Runtime state of a container, `None` if youki does not know it.
    pub async fn state(&self, namespace: &str, container_id: &str) -> Option<OciState> {
        let stdout = match self.run(namespace, &["state", container_id]).await {
            Ok(stdout) => stdout,
            Err(e) => {
                debug!("Youki: No state for {}: {}", container_id, e);
                return None;
            }
        };
        match serde_json::from_slice(&stdout) {
            Ok(state) => Some(state),
            Err(e) => {
                error!("Youki: Unparsable state for {}: {}", container_id, e);
                None
            }
        }
    }
}
