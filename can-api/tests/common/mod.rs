//! Test helpers for can-api integration tests.
//!
//! [`FakeRuntime`] records every provider call and can be told to fail or
//! slow down specific steps. [`TestServer`] serves the real gRPC router on an
//! ephemeral port, backed by a [`FakeRuntime`].

#![allow(dead_code)]

use async_trait::async_trait;
use can_api::api_router;
use can_api::error::RuntimeError;
use can_api::model::{Container, ContainerSpec, ContainerStatus, Pod, PodSpec};
use can_api::progress::{ImageFetchHandle, ImageFetchProgress};
use can_api::runtime::youki::container_id;
use can_api::runtime::{AttachIo, RuntimeClient};
use can_api::services::pod::{ProgressSink, ReportError};
use nix::sys::signal::Signal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;

pub const LAYER_BYTES: u64 = 512;

/// A provider call as observed by [`FakeRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Pull(String),
    Create(String),
    Start(String),
    Stop(String),
}

/// In-memory capability provider.
#[derive(Default)]
pub struct FakeRuntime {
    fail_pull: Option<String>,
    fail_create: Option<String>,
    pull_delay: Duration,
    calls: Mutex<Vec<Call>>,
    pods: Mutex<BTreeMap<String, BTreeMap<String, Vec<Container>>>>,
    signals: Mutex<Vec<(String, String, i32)>>,
    attach_calls: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail pulls of `image` after the layer count has been reported.
    pub fn fail_pull(mut self, image: &str) -> Self {
        self.fail_pull = Some(image.to_string());
        self
    }

    /// Fail creation of the container named `name`.
    pub fn fail_create(mut self, name: &str) -> Self {
        self.fail_create = Some(name.to_string());
        self
    }

    /// Make every pull take `delay`.
    pub fn pull_delay(mut self, delay: Duration) -> Self {
        self.pull_delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn signals(&self) -> Vec<(String, String, i32)> {
        self.signals.lock().unwrap().clone()
    }

    pub fn attach_calls(&self) -> usize {
        self.attach_calls.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn find(&self, namespace: &str, container_id: &str) -> Result<Container, RuntimeError> {
        self.pods
            .lock()
            .unwrap()
            .get(namespace)
            .and_then(|pods| {
                pods.values()
                    .flatten()
                    .find(|c| c.id == container_id)
                    .cloned()
            })
            .ok_or_else(|| RuntimeError::ContainerNotFound(container_id.to_string()))
    }

    fn set_status(&self, namespace: &str, container_id: &str, status: ContainerStatus) {
        let mut pods = self.pods.lock().unwrap();
        if let Some(pods) = pods.get_mut(namespace) {
            for container in pods.values_mut().flatten() {
                if container.id == container_id {
                    container.status = status;
                }
            }
        }
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn pull_image(
        &self,
        _namespace: &str,
        image: &str,
        progress: &ImageFetchHandle,
    ) -> Result<(), RuntimeError> {
        self.record(Call::Pull(image.to_string()));
        progress.set_layers(2);
        if !self.pull_delay.is_zero() {
            tokio::time::sleep(self.pull_delay / 2).await;
        }
        progress.layer_fetched(LAYER_BYTES);

        if self.fail_pull.as_deref() == Some(image) {
            return Err(RuntimeError::Registry("manifest unknown".to_string()));
        }

        if !self.pull_delay.is_zero() {
            tokio::time::sleep(self.pull_delay / 2).await;
        }
        progress.layer_fetched(LAYER_BYTES);
        Ok(())
    }

    async fn create_container(
        &self,
        pod: &PodSpec,
        container: &ContainerSpec,
    ) -> Result<(), RuntimeError> {
        self.record(Call::Create(container.name.clone()));
        if self.fail_create.as_deref() == Some(container.name.as_str()) {
            return Err(RuntimeError::Youki("create exited with 1".to_string()));
        }

        self.pods
            .lock()
            .unwrap()
            .entry(pod.namespace.clone())
            .or_default()
            .entry(pod.name.clone())
            .or_default()
            .push(Container {
                id: container_id(&pod.name, &container.name),
                name: container.name.clone(),
                image: container.image.clone(),
                tty: container.tty,
                status: ContainerStatus::Created,
            });
        Ok(())
    }

    async fn start_container(
        &self,
        namespace: &str,
        container_id: &str,
        _tty: bool,
    ) -> Result<(), RuntimeError> {
        self.record(Call::Start(container_id.to_string()));
        self.find(namespace, container_id)?;
        self.set_status(namespace, container_id, ContainerStatus::Running);
        Ok(())
    }

    async fn stop_container(&self, namespace: &str, container_id: &str) -> Result<(), RuntimeError> {
        self.record(Call::Stop(container_id.to_string()));
        self.find(namespace, container_id)?;
        let mut pods = self.pods.lock().unwrap();
        if let Some(pods) = pods.get_mut(namespace) {
            for containers in pods.values_mut() {
                containers.retain(|c| c.id != container_id);
            }
            pods.retain(|_, containers| !containers.is_empty());
        }
        Ok(())
    }

    async fn get_containers(
        &self,
        namespace: &str,
        pod: &str,
    ) -> Result<Vec<Container>, RuntimeError> {
        self.pods
            .lock()
            .unwrap()
            .get(namespace)
            .and_then(|pods| pods.get(pod))
            .cloned()
            .ok_or_else(|| RuntimeError::PodNotFound(pod.to_string()))
    }

    async fn get_pods(&self, namespace: &str) -> Result<Vec<Pod>, RuntimeError> {
        let pods = self.pods.lock().unwrap();
        Ok(pods
            .get(namespace)
            .map(|pods| {
                pods.iter()
                    .map(|(name, containers)| Pod::new(namespace, name, containers.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn namespaces(&self) -> Result<Vec<String>, RuntimeError> {
        Ok(self.pods.lock().unwrap().keys().cloned().collect())
    }

    /// Greets on stderr, then echoes stdin to stdout until stdin ends.
    async fn attach(
        &self,
        namespace: &str,
        container_id: &str,
        io: AttachIo,
    ) -> Result<(), RuntimeError> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        self.find(namespace, container_id)?;

        let AttachIo {
            mut stdin,
            mut stdout,
            mut stderr,
        } = io;
        stderr.send(b"attached\n".to_vec()).await?;
        while let Some(chunk) = stdin.recv().await? {
            stdout.send(chunk).await?;
        }
        Ok(())
    }

    async fn signal(
        &self,
        namespace: &str,
        container_id: &str,
        signal: Signal,
    ) -> Result<(), RuntimeError> {
        self.signals.lock().unwrap().push((
            namespace.to_string(),
            container_id.to_string(),
            signal as i32,
        ));
        Ok(())
    }
}

/// Progress sink collecting every delivered snapshot.
#[derive(Clone, Default)]
pub struct CollectingSink {
    pub snapshots: Arc<Mutex<Vec<Vec<ImageFetchProgress>>>>,
}

impl CollectingSink {
    pub fn snapshots(&self) -> Vec<Vec<ImageFetchProgress>> {
        self.snapshots.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressSink for CollectingSink {
    async fn report(&mut self, snapshot: Vec<ImageFetchProgress>) -> Result<(), ReportError> {
        self.snapshots.lock().unwrap().push(snapshot);
        Ok(())
    }
}

/// Progress sink whose receiver is always gone.
pub struct ClosedSink;

#[async_trait]
impl ProgressSink for ClosedSink {
    async fn report(&mut self, _snapshot: Vec<ImageFetchProgress>) -> Result<(), ReportError> {
        Err(ReportError("receiver dropped".to_string()))
    }
}

pub fn pod(namespace: &str, name: &str, containers: &[(&str, &str)]) -> PodSpec {
    PodSpec {
        namespace: namespace.to_string(),
        name: name.to_string(),
        labels: HashMap::new(),
        containers: containers
            .iter()
            .map(|(name, image)| ContainerSpec::new(*name, *image))
            .collect(),
    }
}

/// In-process gRPC server on an ephemeral port.
pub struct TestServer {
    handle: JoinHandle<()>,
    pub addr: String,
}

impl TestServer {
    pub async fn start(runtime: Arc<FakeRuntime>) -> Self {
        Self::start_with_interval(runtime, Duration::from_millis(20)).await
    }

    pub async fn start_with_interval(runtime: Arc<FakeRuntime>, interval: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        let runtime: Arc<dyn RuntimeClient> = runtime;

        let handle = tokio::spawn(async move {
            api_router(runtime, interval)
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });

        Self { handle, addr }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
