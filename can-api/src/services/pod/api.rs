//! Pod API Handler - gRPC implementation of the Pods service.

use super::broadcaster::{ProgressSink, ReportError};
use super::pipeline;
use crate::error::{Error, Result as ApiResult};
use crate::mapping::{pod_spec_from_api, pod_to_api, progress_to_api};
use crate::model::Pod;
use crate::progress::ImageFetchProgress;
use crate::proto::pods::{
    CreatePodRequest, CreatePodStreamResponse, DeletePodRequest, DeletePodResponse,
    ListPodsRequest, ListPodsResponse, StartPodRequest, StartPodResponse, pods_server::Pods,
};
use crate::runtime::RuntimeClient;
use crate::validation::check_name;
use async_trait::async_trait;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use uuid::Uuid;

type CreateStreamSender = mpsc::Sender<Result<CreatePodStreamResponse, Status>>;

/// Forwards progress snapshots into the `Create` response stream.
pub struct StreamProgressSink {
    tx: CreateStreamSender,
    operation_id: String,
}

impl StreamProgressSink {
    pub fn new(tx: CreateStreamSender, operation_id: impl Into<String>) -> Self {
        Self {
            tx,
            operation_id: operation_id.into(),
        }
    }
}

#[async_trait]
impl ProgressSink for StreamProgressSink {
    async fn report(&mut self, snapshot: Vec<ImageFetchProgress>) -> Result<(), ReportError> {
        let response = CreatePodStreamResponse {
            images: progress_to_api(&snapshot),
            operation_id: self.operation_id.clone(),
        };
        self.tx
            .send(Ok(response))
            .await
            .map_err(|_| ReportError("create stream closed by client".to_string()))
    }
}

/// Pod API Handler for gRPC requests.
pub struct PodApiHandler {
    runtime: Arc<dyn RuntimeClient>,
    progress_interval: Duration,
}

impl PodApiHandler {
    pub fn new(runtime: Arc<dyn RuntimeClient>, progress_interval: Duration) -> Self {
        Self {
            runtime,
            progress_interval,
        }
    }

    async fn find_pod(&self, namespace: &str, name: &str) -> ApiResult<Pod> {
        let containers = self
            .runtime
            .get_containers(namespace, name)
            .await
            .map_err(|source| Error::FindContainers {
                namespace: namespace.to_string(),
                pod: name.to_string(),
                source,
            })?;
        Ok(Pod::new(namespace, name, containers))
    }
}

#[async_trait]
impl Pods for PodApiHandler {
    type CreateStream = ReceiverStream<Result<CreatePodStreamResponse, Status>>;

    async fn create(
        &self,
        request: Request<CreatePodRequest>,
    ) -> Result<Response<Self::CreateStream>, Status> {
        let pod = pod_spec_from_api(request.into_inner().pod)?;
        let operation_id = Uuid::new_v4().to_string();
        info!(
            "API: Create pod {}/{} with {} containers, operation={}",
            pod.namespace,
            pod.name,
            pod.containers.len(),
            operation_id
        );

        let (tx, rx) = mpsc::channel(16);
        let sink = StreamProgressSink::new(tx.clone(), operation_id.clone());
        let runtime = self.runtime.clone();
        let interval = self.progress_interval;

        tokio::spawn(async move {
            let pod_name = format!("{}/{}", pod.namespace, pod.name);
            let (result, summary) =
                pipeline::run_create(runtime, pod, sink, interval, &operation_id).await;
            match result {
                Ok(()) => info!(
                    "API: Pod {} created, operation={} snapshots={}",
                    pod_name,
                    operation_id,
                    summary.periodic + 1
                ),
                Err(e) => {
                    error!(
                        "API: Creating pod {} failed, operation={}: {}",
                        pod_name, operation_id, e
                    );
                    let _ = tx.send(Err(e.into())).await;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn start(
        &self,
        request: Request<StartPodRequest>,
    ) -> Result<Response<StartPodResponse>, Status> {
        let req = request.into_inner();
        check_name("namespace", &req.namespace)?;
        check_name("name", &req.name)?;
        info!("API: Start pod {}/{}", req.namespace, req.name);

        let pod = self.find_pod(&req.namespace, &req.name).await?;
        for container in &pod.containers {
            self.runtime
                .start_container(&req.namespace, &container.id, container.tty)
                .await
                .map_err(|source| Error::StartContainer {
                    container: container.name.clone(),
                    source,
                })?;
        }

        Ok(Response::new(StartPodResponse {
            pod: Some(pod_to_api(&pod)),
        }))
    }

    async fn delete(
        &self,
        request: Request<DeletePodRequest>,
    ) -> Result<Response<DeletePodResponse>, Status> {
        let req = request.into_inner();
        check_name("namespace", &req.namespace)?;
        check_name("name", &req.name)?;
        info!("API: Delete pod {}/{}", req.namespace, req.name);

        let pod = self.find_pod(&req.namespace, &req.name).await?;
        for container in &pod.containers {
            self.runtime
                .stop_container(&req.namespace, &container.id)
                .await
                .map_err(|source| Error::StopContainer {
                    container: container.name.clone(),
                    source,
                })?;
        }

        Ok(Response::new(DeletePodResponse {
            pod: Some(pod_to_api(&pod)),
        }))
    }

    async fn list(
        &self,
        request: Request<ListPodsRequest>,
    ) -> Result<Response<ListPodsResponse>, Status> {
        let req = request.into_inner();
        check_name("namespace", &req.namespace)?;

        let pods = self
            .runtime
            .get_pods(&req.namespace)
            .await
            .map_err(Error::from)?;
        Ok(Response::new(ListPodsResponse {
            pods: pods.iter().map(pod_to_api).collect(),
        }))
    }
}
