//! Frame ingestion sources.
//!
//! This module provides different sources for decoded frames:
//! - Local video files (`FileSource`; FFmpeg decoding behind `ingest-file-ffmpeg`)
//! - Live USB/V4L2 cameras (`V4l2Source`, feature: ingest-v4l2)
//! - Synthetic `stub://` streams for tests and dry runs
//!
//! Every source hands out frames with indices starting at 0 and increasing by
//! exactly 1, each carrying a presentation timestamp. A source signals the
//! end of its stream with `Ok(None)` and a failed read with `Err`.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::frame::{Frame, TrackInfo};

pub use file::{FileConfig, FileSource};
pub use synthetic::StubParams;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

/// A sequential producer of decoded frames for one stream.
pub trait FrameSource: Send {
    /// Open the underlying file or device.
    fn connect(&mut self) -> Result<()>;

    /// Track description. Valid after `connect`.
    fn track(&self) -> TrackInfo;

    /// Next frame, `Ok(None)` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Frames handed out so far.
    fn frames_read(&self) -> u64;
}
