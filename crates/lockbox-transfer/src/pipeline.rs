//! Chunk pipeline: bounded single-producer/single-consumer handoff between a
//! file and a chunk stream.
//!
//! A source reads a file in `chunk_size` pieces on a background task and hands
//! them over a capacity-1 queue; a sink drains chunks into a file on a
//! background task. Every handoff is bounded by `handoff_timeout`. A stalled
//! handoff is reported as [`TransferError::Timeout`], never as a clean end of
//! stream.

use std::path::{Path, PathBuf};
use std::time::Duration;

use lockbox_core::config::TransferConfig;
use lockbox_core::types::FileDescriptor;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::TransferError;

/// Opaque transport-level unit. Boundaries carry no cryptographic meaning.
pub type Chunk = Vec<u8>;

#[derive(Debug, Clone)]
pub struct Pipeline {
    chunk_size: usize,
    max_size: u64,
    handoff_timeout: Duration,
}

impl Pipeline {
    pub fn new(config: &TransferConfig) -> Self {
        Self::with_limits(
            config.chunk_size,
            config.max_file_size,
            config.handoff_timeout(),
        )
    }

    pub fn with_limits(chunk_size: usize, max_size: u64, handoff_timeout: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            max_size,
            handoff_timeout,
        }
    }

    /// Same chunking and timeout, different size limit (the server caps blobs
    /// separately from what a client may upload).
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn handoff_timeout(&self) -> Duration {
        self.handoff_timeout
    }

    /// Open `path` and start producing its chunks.
    ///
    /// Fails before any task is spawned if the file cannot be opened, is not
    /// a regular file, or is larger than the configured maximum.
    pub async fn start_source(&self, path: &Path) -> Result<(ChunkSource, SourceInfo), TransferError> {
        let file = File::open(path)
            .await
            .map_err(|e| TransferError::file(path, e))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| TransferError::file(path, e))?;
        if !metadata.is_file() {
            return Err(TransferError::file(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }
        let size = metadata.len();
        if size > self.max_size {
            return Err(TransferError::TooLarge {
                path: path.to_path_buf(),
                size,
                max: self.max_size,
            });
        }

        let (tx, rx) = mpsc::channel(1);
        let (abort_tx, abort_rx) = mpsc::channel(1);
        let task = tokio::spawn(produce(
            file,
            path.to_path_buf(),
            tx,
            abort_rx,
            self.chunk_size,
            self.handoff_timeout,
        ));

        debug!(path = %path.display(), size, chunk_size = self.chunk_size, "source started");

        let info = SourceInfo {
            path: path.to_path_buf(),
            size,
        };
        let source = ChunkSource {
            rx,
            abort_tx,
            task,
        };
        Ok((source, info))
    }

    /// Create (or truncate) `path` and start a writer draining chunks into it.
    pub async fn start_sink(&self, path: &Path) -> Result<ChunkSink, TransferError> {
        let file = File::create(path)
            .await
            .map_err(|e| TransferError::file(path, e))?;

        let (tx, rx) = mpsc::channel(1);
        let (error_tx, error_rx) = oneshot::channel();
        let task = tokio::spawn(consume(
            file,
            path.to_path_buf(),
            rx,
            error_tx,
            self.max_size,
        ));

        debug!(path = %path.display(), "sink started");

        Ok(ChunkSink {
            tx: Some(tx),
            error: Some(error_rx),
            task,
            handoff_timeout: self.handoff_timeout,
        })
    }
}

/// What a source knows about its file before the first chunk
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub path: PathBuf,
    pub size: u64,
}

impl SourceInfo {
    pub fn descriptor(&self) -> FileDescriptor {
        FileDescriptor::for_path(&self.path, self.size)
    }
}

/// Consumer end of a running file reader
#[derive(Debug)]
pub struct ChunkSource {
    rx: mpsc::Receiver<Chunk>,
    abort_tx: mpsc::Sender<String>,
    task: JoinHandle<Result<u64, TransferError>>,
}

impl ChunkSource {
    /// Next chunk in file order, `None` once the producer has stopped.
    ///
    /// `None` alone does not mean success; call [`ChunkSource::finish`].
    pub async fn next_chunk(&mut self) -> Option<Chunk> {
        self.rx.recv().await
    }

    /// Tell the producer to stop reading ahead, e.g. after a downstream failure.
    pub fn abort(&self, reason: impl Into<String>) {
        let _ = self.abort_tx.try_send(reason.into());
    }

    /// Wait for the producer and report how it ended: total bytes read on a
    /// clean end of file, otherwise the error that stopped it.
    pub async fn finish(mut self) -> Result<u64, TransferError> {
        self.rx.close();
        self.task.await?
    }
}

async fn produce(
    mut file: File,
    path: PathBuf,
    tx: mpsc::Sender<Chunk>,
    mut abort_rx: mpsc::Receiver<String>,
    chunk_size: usize,
    handoff_timeout: Duration,
) -> Result<u64, TransferError> {
    let mut total = 0u64;
    loop {
        let chunk = read_chunk(&mut file, chunk_size)
            .await
            .map_err(|e| TransferError::file(&path, e))?;
        if chunk.is_empty() {
            debug!(path = %path.display(), bytes = total, "source exhausted");
            return Ok(total);
        }
        let len = chunk.len() as u64;

        tokio::select! {
            biased;
            Some(reason) = abort_rx.recv() => {
                debug!(path = %path.display(), %reason, "source aborted");
                return Err(TransferError::Aborted(reason));
            }
            sent = tokio::time::timeout(handoff_timeout, tx.send(chunk)) => match sent {
                Ok(Ok(())) => total += len,
                Ok(Err(_)) => {
                    return Err(TransferError::Aborted("chunk consumer went away".into()));
                }
                Err(_) => {
                    warn!(
                        path = %path.display(),
                        bytes = total,
                        timeout = ?handoff_timeout,
                        "chunk handoff timed out"
                    );
                    return Err(TransferError::Timeout(handoff_timeout));
                }
            },
        }
    }
}

/// Fill up to `chunk_size` bytes; short only at end of file.
async fn read_chunk(file: &mut File, chunk_size: usize) -> std::io::Result<Chunk> {
    let mut buf = vec![0u8; chunk_size];
    let mut filled = 0;
    while filled < chunk_size {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Producer end of a running file writer
#[derive(Debug)]
pub struct ChunkSink {
    tx: Option<mpsc::Sender<Chunk>>,
    error: Option<oneshot::Receiver<TransferError>>,
    task: JoinHandle<u64>,
    handoff_timeout: Duration,
}

impl ChunkSink {
    /// Hand one chunk to the writer.
    ///
    /// Fails with the writer's own error once it has stopped, so callers stop
    /// producing ahead of a failed write.
    pub async fn send(&mut self, chunk: Chunk) -> Result<(), TransferError> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(self.writer_error().await);
        };
        match tokio::time::timeout(self.handoff_timeout, tx.send(chunk)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                self.tx = None;
                Err(self.writer_error().await)
            }
            Err(_) => Err(TransferError::Timeout(self.handoff_timeout)),
        }
    }

    /// End the stream and wait for the writer to flush. Returns bytes written.
    pub async fn close(mut self) -> Result<u64, TransferError> {
        self.tx = None;
        let written = (&mut self.task).await?;
        match self.error.take().map(|mut rx| rx.try_recv()) {
            Some(Ok(err)) => Err(err),
            _ => Ok(written),
        }
    }

    async fn writer_error(&mut self) -> TransferError {
        match self.error.take() {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| TransferError::Aborted("sink writer exited".into())),
            None => TransferError::Aborted("sink writer already failed".into()),
        }
    }
}

async fn consume(
    file: File,
    path: PathBuf,
    mut rx: mpsc::Receiver<Chunk>,
    error_tx: oneshot::Sender<TransferError>,
    max_size: u64,
) -> u64 {
    let mut writer = BufWriter::new(file);
    let mut written = 0u64;

    while let Some(chunk) = rx.recv().await {
        let len = chunk.len() as u64;
        if written + len > max_size {
            warn!(path = %path.display(), max_size, "sink size limit exceeded");
            let _ = writer.flush().await;
            let _ = error_tx.send(TransferError::TooLarge {
                path,
                size: written + len,
                max: max_size,
            });
            return written;
        }
        if let Err(e) = writer.write_all(&chunk).await {
            warn!(path = %path.display(), bytes = written, "sink write failed: {e}");
            let _ = error_tx.send(TransferError::file(&path, e));
            return written;
        }
        written += len;
    }

    let flushed = match writer.flush().await {
        Ok(()) => writer.get_mut().sync_all().await,
        Err(e) => Err(e),
    };
    if let Err(e) = flushed {
        let _ = error_tx.send(TransferError::file(&path, e));
        return written;
    }

    debug!(path = %path.display(), bytes = written, "sink closed");
    written
}
