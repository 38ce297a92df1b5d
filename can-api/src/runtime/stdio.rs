//! Transport-independent stdio channels for attach sessions.
//!
//! An attach session is one byte source feeding the process' stdin and two
//! byte sinks receiving its stdout and stderr. The gRPC stream implements
//! these in [`crate::services::container`]; [`ReaderSource`] and
//! [`WriterSink`] adapt plain async readers and writers (pipes, files).

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const CHUNK_SIZE: usize = 4096;

/// Source of bytes destined for a process' stdin.
#[async_trait]
pub trait ByteSource: Send {
    /// Next chunk of input, `None` once the sender has finished.
    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// Destination for bytes written by a process.
#[async_trait]
pub trait ByteSink: Send {
    async fn send(&mut self, chunk: Vec<u8>) -> io::Result<()>;
}

/// The three channels of one attach session.
pub struct AttachIo {
    pub stdin: Box<dyn ByteSource>,
    pub stdout: Box<dyn ByteSink>,
    pub stderr: Box<dyn ByteSink>,
}

impl AttachIo {
    pub fn new(
        stdin: impl ByteSource + 'static,
        stdout: impl ByteSink + 'static,
        stderr: impl ByteSink + 'static,
    ) -> Self {
        Self {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        }
    }
}

/// [`ByteSource`] reading from an [`AsyncRead`].
pub struct ReaderSource<R> {
    inner: R,
}

impl<R> ReaderSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ByteSource for ReaderSource<R> {
    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let n = self.inner.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }
}

/// [`ByteSink`] writing to an [`AsyncWrite`].
pub struct WriterSink<W> {
    inner: W,
}

impl<W> WriterSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ByteSink for WriterSink<W> {
    async fn send(&mut self, chunk: Vec<u8>) -> io::Result<()> {
        self.inner.write_all(&chunk).await?;
        self.inner.flush().await
    }
}

/// Copy everything from `source` into `writer`, then shut the writer down.
pub async fn pump_input<W>(mut source: Box<dyn ByteSource>, mut writer: W) -> io::Result<u64>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut total = 0u64;
    while let Some(chunk) = source.recv().await? {
        writer.write_all(&chunk).await?;
        writer.flush().await?;
        total += chunk.len() as u64;
    }
    writer.shutdown().await?;
    Ok(total)
}

/// Copy everything from `reader` into `sink` until EOF.
pub async fn pump_output<R>(mut reader: R, sink: &mut dyn ByteSink) -> io::Result<u64>
where
    R: AsyncRead + Unpin + Send,
{
    let mut total = 0u64;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        sink.send(buf[..n].to_vec()).await?;
        total += n as u64;
    }
}

/// Drive an attach session against a process' stdio handles.
///
/// The session ends when both output streams reach EOF, or with the first
/// error of any direction. The input side finishing early only shuts down
/// `stdin`; the process sees EOF only if no other writer holds its stdin.
pub async fn bind<W, O, E>(io: AttachIo, stdin: W, stdout: O, stderr: E) -> io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
    O: AsyncRead + Unpin + Send,
    E: AsyncRead + Unpin + Send,
{
    let AttachIo {
        stdin: source,
        stdout: mut out_sink,
        stderr: mut err_sink,
    } = io;

    let output = async {
        tokio::try_join!(
            pump_output(stdout, out_sink.as_mut()),
            pump_output(stderr, err_sink.as_mut()),
        )
    };
    let input = pump_input(source, stdin);
    tokio::pin!(output);
    tokio::pin!(input);

    let mut input_done = false;
    loop {
        tokio::select! {
            res = &mut output => return res.map(|_| ()),
            res = &mut input, if !input_done => {
                res?;
                input_done = true;
            }
        }
    }
}
