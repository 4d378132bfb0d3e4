//! Error kinds surfaced by the recording path.
//!
//! Everything outside the recorder and its sinks propagates `anyhow::Error`;
//! these variants exist so callers can tell the non-fatal recording failures
//! apart from each other.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    /// Storage unavailable or the writer rejected the track/codec.
    /// The window keeps its bookkeeping but never writes.
    #[error("failed to create output sink at {path}: {reason}")]
    SinkCreationFailed { path: PathBuf, reason: String },

    /// Transient; handled with a bounded wait before each append.
    #[error("output sink is not ready for more data")]
    SinkNotReady,

    /// The sink accepted the frame handoff but could not write it.
    #[error("failed to append frame {index}: {reason}")]
    AppendFailed { index: u64, reason: String },

    /// The frame source failed mid-stream.
    #[error("frame source read failed: {0}")]
    ReadError(String),

    #[error("failed to finalize clip {path}: {reason}")]
    FinalizeFailed { path: PathBuf, reason: String },

    /// Copying a finished clip into permanent storage failed. Not retried.
    #[error("failed to persist clip {path}: {reason}")]
    PersistenceFailed { path: PathBuf, reason: String },

    #[error("frame index {got} out of order (expected {expected})")]
    FrameOutOfOrder { expected: u64, got: u64 },
}
