//! Container API Handler - gRPC implementation of the Containers service.

use super::attach::{ChannelSink, StreamSource, target_from_metadata};
use super::signal;
use crate::error::Error;
use crate::proto::containers::{
    SignalRequest, SignalResponse, StdinStreamRequest, StdoutStreamResponse,
    containers_server::Containers,
};
use crate::runtime::{AttachIo, RuntimeClient};
use async_trait::async_trait;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

pub struct ContainerApiHandler {
    runtime: Arc<dyn RuntimeClient>,
}

impl ContainerApiHandler {
    pub fn new(runtime: Arc<dyn RuntimeClient>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Containers for ContainerApiHandler {
    type AttachStream = ReceiverStream<Result<StdoutStreamResponse, Status>>;

    async fn attach(
        &self,
        request: Request<Streaming<StdinStreamRequest>>,
    ) -> Result<Response<Self::AttachStream>, Status> {
        let target = target_from_metadata(request.metadata())?;
        info!(
            "API: Attach to {} in {}",
            target.container, target.namespace
        );

        let inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(32);
        let io = AttachIo::new(
            StreamSource::new(inbound),
            ChannelSink::stdout(tx.clone()),
            ChannelSink::stderr(tx.clone()),
        );

        let runtime = self.runtime.clone();
        tokio::spawn(async move {
            match runtime.attach(&target.namespace, &target.container, io).await {
                Ok(()) => info!("API: Attach session to {} ended", target.container),
                Err(e) => {
                    error!(
                        "API: Attach session to {} failed: {}",
                        target.container, e
                    );
                    let _ = tx.send(Err(Error::Runtime(e).into())).await;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn signal(
        &self,
        request: Request<SignalRequest>,
    ) -> Result<Response<SignalResponse>, Status> {
        let req = request.into_inner();
        signal::dispatch(
            self.runtime.as_ref(),
            &req.namespace,
            &req.container_id,
            req.signal,
        )
        .await?;
        Ok(Response::new(SignalResponse {}))
    }
}
