//! clipwatch
//!
//! Watches a video stream with an object detector and records a clip whenever
//! a target label (by default `person`) is seen with enough confidence.
//!
//! # Architecture
//!
//! Each stream runs one session worker:
//!
//! 1. **Source** hands out decoded frames with consecutive indices and
//!    presentation timestamps (local files, V4L2 cameras, `stub://` streams).
//! 2. **Detector** returns labelled, normalized boxes for every frame.
//! 3. **Recorder** opens a window on a qualifying detection, writes every
//!    frame until the fixed-duration or trailing-silence bound, then
//!    finalizes the clip exactly once.
//! 4. **Sink** encodes the window into an MP4 whose timeline starts at zero.
//! 5. **Archive** moves finished clips into permanent storage.
//!
//! Detections are published separately to an `OverlaySlot` for display.
//!
//! # Module Structure
//!
//! - `frame`: decoded frames, rotation and track description
//! - `ingest`: frame sources
//! - `detect`: detector backends, labels, detections
//! - `record`: trigger rule, recording policy, the recording state machine
//! - `sink`: clip writers (ffmpeg, in-memory)
//! - `overlay`: box mapping into a letterboxed preview
//! - `persist`: clip archive
//! - `pipeline`: per-stream session worker
//! - `config`, `ui`: command-line plumbing

pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod overlay;
pub mod persist;
pub mod pipeline;
pub mod record;
pub mod sink;
pub mod ui;

pub use config::ClipwatchConfig;
pub use detect::{
    BackendRegistry, Detection, DetectorBackend, LabelSet, NormalizedRect, SharedBackend,
    StubBackend,
};
pub use error::RecordError;
pub use frame::{Frame, Rotation, TrackInfo};
pub use ingest::{FileConfig, FileSource, FrameSource};
#[cfg(feature = "ingest-v4l2")]
pub use ingest::{V4l2Config, V4l2Source};
pub use overlay::{map_to_viewport, Overlay, OverlaySlot, ScreenRect, Viewport};
pub use persist::ClipArchive;
pub use pipeline::{EndReason, Session, SessionHandle, SessionSettings, SessionSummary};
pub use record::{
    ClipOutcome, CloseReason, ClosedWindow, OutputPlan, Recorder, RecordingPolicy, Step,
    TriggerRule,
};
pub use sink::{FfmpegSinkFactory, MemorySinkFactory, OutputSink, SinkFactory, SinkRequest};
