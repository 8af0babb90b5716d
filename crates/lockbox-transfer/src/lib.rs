//! lockbox-transfer: moving large payloads without holding them in memory
//!
//! Three layers, bottom-up:
//!
//! - [`pipeline`]: a capacity-1 handoff between a file and whoever consumes
//!   or produces its chunks, one background task per open file.
//! - [`protocol`]: the frame loops for file upload and download. One
//!   metadata frame, then N chunk frames, in order.
//! - [`shutdown`]: counts in-flight transfers so the process can drain them
//!   before exiting, or give up after a bound.

pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod shutdown;

pub use error::TransferError;
pub use pipeline::{Chunk, ChunkSink, ChunkSource, Pipeline, SourceInfo};
pub use protocol::{receive_frames, send_frames, ChunkTransform, Passthrough, Phase, Received, TransferSummary};
pub use shutdown::{OperationGuard, ShutdownCoordinator, ShutdownOutcome};
