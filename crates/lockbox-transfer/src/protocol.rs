//! File transfer framing over a streaming RPC.
//!
//! Both directions carry the same frame type. The first frame holds
//! `{meta, descriptor}`; every later frame holds one opaque chunk in `data`
//! with `meta` empty. Frames are forwarded in order and never split or merged
//! here; block alignment is the codec's business.
//!
//! ```text
//! upload:   AwaitFirstFrame --first--> StreamingChunks --eos--> Closed
//! download: SendFirstFrame  --first--> StreamingChunks --eof--> Closed
//! ```
//!
//! The loops are generic over the frame stream and the per-chunk transform,
//! so the same code runs on the server (passthrough, ciphertext is opaque)
//! and the client (encrypt before send, decrypt after receive).

use std::future::Future;
use std::path::PathBuf;

use lockbox_core::proto::FileChunk;
use lockbox_core::{VaultError, VaultResult};
use lockbox_crypto::{BlockDecryptor, BlockEncryptor};
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tonic::Status;
use tracing::{debug, trace};

use crate::pipeline::{ChunkSource, Pipeline};

/// Position of one transfer in its frame state machine.
///
/// The loops advance it on every frame and at end of stream; a frame or an
/// end that the current phase does not allow fails the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitFirstFrame,
    SendFirstFrame,
    StreamingChunks,
    Closed,
}

impl Phase {
    /// Phase after `frame`. `index` counts frames from 0 (the first frame).
    pub fn on_frame(self, frame: &FileChunk, index: u64) -> VaultResult<Phase> {
        match self {
            Phase::AwaitFirstFrame | Phase::SendFirstFrame => Ok(Phase::StreamingChunks),
            Phase::StreamingChunks if frame.meta.is_empty() => Ok(Phase::StreamingChunks),
            Phase::StreamingChunks => Err(VaultError::InvalidArgument(format!(
                "metadata in chunk frame {index}"
            ))),
            Phase::Closed => Err(VaultError::InvalidArgument(format!(
                "frame {index} after end of stream"
            ))),
        }
    }

    /// Phase after the stream ends.
    pub fn on_end(self) -> VaultResult<Phase> {
        match self {
            Phase::StreamingChunks => Ok(Phase::Closed),
            Phase::AwaitFirstFrame | Phase::SendFirstFrame => Err(VaultError::InvalidArgument(
                "stream ended before the first frame".into(),
            )),
            Phase::Closed => Err(VaultError::Stream("stream already closed".into())),
        }
    }
}

/// Per-chunk byte transform applied between the pipeline and the frames.
///
/// `update` may buffer and return less than it was given (or nothing);
/// `finish` returns whatever was held back.
pub trait ChunkTransform: Send {
    fn update(&mut self, chunk: Vec<u8>) -> VaultResult<Vec<u8>>;
    fn finish(&mut self) -> VaultResult<Vec<u8>>;
}

/// Identity transform, for peers that only relay ciphertext
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl ChunkTransform for Passthrough {
    fn update(&mut self, chunk: Vec<u8>) -> VaultResult<Vec<u8>> {
        Ok(chunk)
    }

    fn finish(&mut self) -> VaultResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

impl ChunkTransform for BlockEncryptor {
    fn update(&mut self, chunk: Vec<u8>) -> VaultResult<Vec<u8>> {
        Ok(BlockEncryptor::update(self, &chunk)?)
    }

    fn finish(&mut self) -> VaultResult<Vec<u8>> {
        Ok(BlockEncryptor::finish(self)?)
    }
}

impl ChunkTransform for BlockDecryptor {
    fn update(&mut self, chunk: Vec<u8>) -> VaultResult<Vec<u8>> {
        Ok(BlockDecryptor::update(self, &chunk)?)
    }

    fn finish(&mut self) -> VaultResult<Vec<u8>> {
        Ok(BlockDecryptor::finish(self)?)
    }
}

/// Outcome of a receiving loop
#[derive(Debug)]
pub struct Received<T> {
    /// Whatever `open` produced from the first frame (record id, descriptor)
    pub value: T,
    /// Bytes written to the sink
    pub bytes: u64,
    /// Chunk frames consumed, excluding the first frame
    pub frames: u64,
}

/// Outcome of a sending loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    /// Chunk frames emitted, excluding the first frame
    pub frames: u64,
    /// Payload bytes emitted across all chunk frames
    pub bytes: u64,
    /// Bytes read from the source file
    pub source_bytes: u64,
}

/// Consume an incoming frame stream into a file.
///
/// `open` handles the first frame and returns a value plus the path to write
/// chunks to; it runs before any chunk frame is read, so a failure there
/// aborts the transfer with nothing written. Chunk frames then pass through
/// `transform` into a pipeline sink until the stream ends.
pub async fn receive_frames<S, X, T, O, Fut>(
    pipeline: &Pipeline,
    mut frames: S,
    mut transform: X,
    open: O,
) -> VaultResult<Received<T>>
where
    S: Stream<Item = Result<FileChunk, Status>> + Unpin,
    X: ChunkTransform,
    O: FnOnce(FileChunk) -> Fut,
    Fut: Future<Output = VaultResult<(T, PathBuf)>>,
{
    let mut phase = Phase::AwaitFirstFrame;
    let first = match frames.next().await {
        Some(Ok(frame)) => frame,
        Some(Err(status)) => {
            return Err(VaultError::Stream(format!(
                "receiving first frame: {}",
                status.message()
            )))
        }
        None => {
            return Err(VaultError::InvalidArgument(
                "stream ended before the first frame".into(),
            ))
        }
    };
    phase = phase.on_frame(&first, 0)?;

    let (value, path) = open(first).await?;
    let mut sink = pipeline.start_sink(&path).await?;
    trace!(?phase, path = %path.display(), "first frame accepted");

    let mut count = 0u64;
    while let Some(frame) = frames.next().await {
        let frame = frame.map_err(|status| {
            VaultError::Stream(format!(
                "receiving chunk frame {}: {}",
                count + 1,
                status.message()
            ))
        })?;
        phase = phase.on_frame(&frame, count + 1)?;
        count += 1;
        let out = transform.update(frame.data)?;
        if !out.is_empty() {
            sink.send(out).await?;
        }
    }
    phase = phase.on_end()?;

    let tail = transform.finish()?;
    if !tail.is_empty() {
        sink.send(tail).await?;
    }
    let bytes = sink.close().await?;
    debug!(?phase, frames = count, bytes, path = %path.display(), "frames received");

    Ok(Received {
        value,
        bytes,
        frames: count,
    })
}

/// Emit `first`, then one frame per transformed chunk of `source`.
///
/// `wrap` adapts a frame to the channel's item type (`FileChunk` for a
/// request stream, `Result<FileChunk, Status>` for a response stream). The
/// source's own outcome (timeout, read error) is checked before the final
/// block is flushed, so a truncated read never ends with a well-formed tail.
pub async fn send_frames<F, X, W>(
    pipeline: &Pipeline,
    first: FileChunk,
    mut source: ChunkSource,
    mut transform: X,
    frames: &mpsc::Sender<F>,
    wrap: W,
) -> VaultResult<TransferSummary>
where
    X: ChunkTransform,
    W: Fn(FileChunk) -> F,
{
    let handoff = pipeline.handoff_timeout();
    let mut phase = Phase::SendFirstFrame.on_frame(&first, 0)?;

    if let Err(e) = emit(frames, wrap(first), handoff).await {
        source.abort("first frame not delivered");
        let _ = source.finish().await;
        return Err(e);
    }
    trace!(?phase, "first frame sent");

    let mut summary = TransferSummary {
        frames: 0,
        bytes: 0,
        source_bytes: 0,
    };
    while let Some(chunk) = source.next_chunk().await {
        let data = match transform.update(chunk) {
            Ok(data) => data,
            Err(e) => {
                source.abort(e.to_string());
                let _ = source.finish().await;
                return Err(e);
            }
        };
        if data.is_empty() {
            continue;
        }
        let len = data.len() as u64;
        let frame = chunk_frame(data);
        phase = phase.on_frame(&frame, summary.frames + 1)?;
        if let Err(e) = emit(frames, wrap(frame), handoff).await {
            source.abort(e.to_string());
            let _ = source.finish().await;
            return Err(e);
        }
        summary.frames += 1;
        summary.bytes += len;
    }
    summary.source_bytes = source.finish().await?;

    let tail = transform.finish()?;
    if !tail.is_empty() {
        let len = tail.len() as u64;
        let frame = chunk_frame(tail);
        phase = phase.on_frame(&frame, summary.frames + 1)?;
        emit(frames, wrap(frame), handoff).await?;
        summary.frames += 1;
        summary.bytes += len;
    }

    phase = phase.on_end()?;
    debug!(
        ?phase,
        frames = summary.frames,
        bytes = summary.bytes,
        source_bytes = summary.source_bytes,
        "frames sent"
    );
    Ok(summary)
}

fn chunk_frame(data: Vec<u8>) -> FileChunk {
    FileChunk {
        meta: Vec::new(),
        data,
    }
}

async fn emit<F>(frames: &mpsc::Sender<F>, frame: F, handoff: std::time::Duration) -> VaultResult<()> {
    match tokio::time::timeout(handoff, frames.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(VaultError::Stream("frame receiver closed".into())),
        Err(_) => Err(VaultError::Timeout(handoff)),
    }
}
