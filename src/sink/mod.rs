//! Output sinks.
//!
//! A sink is a sequential video writer: it accepts frames in timestamp order
//! and finalizes into a container file. The recorder creates one lazily per
//! recording window through a `SinkFactory` and finalizes it exactly once.

pub mod ffmpeg;
pub mod memory;

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::RecordError;
use crate::frame::Frame;

pub use ffmpeg::{FfmpegSink, FfmpegSinkFactory};
pub use memory::{MemorySinkFactory, RecordedClip};

const CLIP_EXTENSION: &str = "mp4";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Codec {
    #[default]
    H264,
}

/// Everything a factory needs to open a sink for one window.
#[derive(Clone, Debug, PartialEq)]
pub struct SinkRequest {
    pub path: PathBuf,
    pub codec: Codec,
    /// Output dimensions, already adjusted for the source rotation.
    pub width: u32,
    pub height: u32,
    pub frame_rate: f32,
    /// Source presentation time that maps to zero in the output.
    pub origin: Duration,
}

/// A sequential writer for one clip.
pub trait OutputSink: Send {
    fn path(&self) -> &Path;

    /// True when `append` would accept another frame without blocking.
    fn is_ready(&self) -> bool;

    /// Append a frame at `pts` (relative to the clip origin).
    ///
    /// Fails with `RecordError::SinkNotReady` when called while not ready.
    fn append(&mut self, frame: &Frame, pts: Duration) -> Result<(), RecordError>;

    /// Flush and close the container.
    fn finalize(self: Box<Self>) -> Result<PathBuf, RecordError>;
}

/// Opens sinks on demand.
pub trait SinkFactory: Send {
    fn open(&mut self, request: &SinkRequest) -> Result<Box<dyn OutputSink>, RecordError>;
}

/// Pick a clip path named after the local time, e.g. `2024-05-01-18-30-02.mp4`.
///
/// Falls back to the system temp directory when `output_dir` cannot be
/// created. A numeric suffix keeps clips started within the same second apart.
pub fn clip_path(output_dir: &Path, now: DateTime<Local>) -> PathBuf {
    let dir = match std::fs::create_dir_all(output_dir) {
        Ok(()) => output_dir.to_path_buf(),
        Err(err) => {
            log::warn!(
                "output directory {} unavailable ({}); using temp dir",
                output_dir.display(),
                err
            );
            std::env::temp_dir()
        }
    };

    let stem = now.format("%Y-%m-%d-%H-%M-%S").to_string();
    let mut candidate = dir.join(format!("{}.{}", stem, CLIP_EXTENSION));
    let mut suffix = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{}-{}.{}", stem, suffix, CLIP_EXTENSION));
        suffix += 1;
    }
    candidate
}
