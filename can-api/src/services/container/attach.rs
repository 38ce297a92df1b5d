//! Attach Multiplexer - binds one gRPC duplex stream to container stdio.

use crate::error::{Error, Result};
use crate::proto::containers::{StdinStreamRequest, StdoutStreamResponse};
use crate::runtime::{ByteSink, ByteSource};
use crate::validation::{check_id, check_name};
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tonic::Status;
use tonic::metadata::MetadataMap;

pub const NAMESPACE_KEY: &str = "namespace";
pub const CONTAINER_KEY: &str = "container";

/// Container addressed by an attach call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachTarget {
    pub namespace: String,
    pub container: String,
}

fn required_metadata(metadata: &MetadataMap, key: &'static str) -> Result<String> {
    metadata
        .get(key)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(Error::MissingMetadata(key))
}

/// Read the attach target from call metadata.
pub fn target_from_metadata(metadata: &MetadataMap) -> Result<AttachTarget> {
    let namespace = required_metadata(metadata, NAMESPACE_KEY)?;
    let container = required_metadata(metadata, CONTAINER_KEY)?;
    check_name(NAMESPACE_KEY, &namespace)?;
    check_id(CONTAINER_KEY, &container)?;
    Ok(AttachTarget {
        namespace,
        container,
    })
}

/// Inbound half of the attach stream.
pub struct StreamSource<S> {
    inner: Pin<Box<S>>,
}

impl<S> StreamSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner: Box::pin(inner),
        }
    }
}

#[async_trait]
impl<S> ByteSource for StreamSource<S>
where
    S: Stream<Item = std::result::Result<StdinStreamRequest, Status>> + Send,
{
    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.inner.next().await {
            Some(Ok(request)) => Ok(Some(request.input)),
            Some(Err(status)) => Err(io::Error::other(status)),
            None => Ok(None),
        }
    }
}

/// Outbound half of the attach stream; one instance per output direction.
pub struct ChannelSink {
    tx: mpsc::Sender<std::result::Result<StdoutStreamResponse, Status>>,
    stderr: bool,
}

impl ChannelSink {
    pub fn stdout(tx: mpsc::Sender<std::result::Result<StdoutStreamResponse, Status>>) -> Self {
        Self { tx, stderr: false }
    }

    pub fn stderr(tx: mpsc::Sender<std::result::Result<StdoutStreamResponse, Status>>) -> Self {
        Self { tx, stderr: true }
    }
}

#[async_trait]
impl ByteSink for ChannelSink {
    async fn send(&mut self, chunk: Vec<u8>) -> io::Result<()> {
        let response = StdoutStreamResponse {
            output: chunk,
            stderr: self.stderr,
        };
        self.tx
            .send(Ok(response))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "attach stream closed"))
    }
}
