//! Detection-driven recording.
//!
//! - `TriggerRule`: which detections count as the subject being present.
//! - `RecordingPolicy`: fixed-duration bound plus optional trailing-silence bound.
//! - `RecordingWindow`: per-window bookkeeping (trigger frame, last sighting, origin).
//! - `Recorder`: the per-stream state machine that owns the lazily opened sink.

mod policy;
mod recorder;
mod window;

pub use policy::{
    Backpressure, RecordingPolicy, TriggerRule, DEFAULT_MIN_CONFIDENCE,
    DEFAULT_SECONDS_TO_RECORD, DEFAULT_SECONDS_WITHOUT_PERSON, DEFAULT_TARGET_LABEL,
};
pub use recorder::{ClipOutcome, ClosedWindow, OutputPlan, Recorder, Step};
pub use window::{CloseBound, CloseReason, RecordingWindow};
