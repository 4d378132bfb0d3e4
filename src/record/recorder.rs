use anyhow::Result;
use chrono::Local;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use super::policy::{Backpressure, RecordingPolicy, TriggerRule};
use super::window::{CloseReason, RecordingWindow};
use crate::detect::Detection;
use crate::error::RecordError;
use crate::frame::{Frame, TrackInfo};
use crate::sink::{clip_path, Codec, OutputSink, SinkFactory, SinkRequest};

/// Where clips for one stream go and what they look like.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputPlan {
    pub output_dir: PathBuf,
    pub track: TrackInfo,
}

impl OutputPlan {
    pub fn new(output_dir: impl Into<PathBuf>, track: TrackInfo) -> Self {
        Self {
            output_dir: output_dir.into(),
            track,
        }
    }

    fn request(&self, origin: Duration) -> SinkRequest {
        let (width, height) = self.track.output_dimensions();
        SinkRequest {
            path: clip_path(&self.output_dir, Local::now()),
            codec: Codec::H264,
            width,
            height,
            frame_rate: self.track.nominal_frame_rate,
            origin,
        }
    }
}

/// What `Recorder::process` did with a frame.
#[derive(Debug)]
pub enum Step {
    /// No window open and the frame did not trigger one.
    Idle,
    /// The frame triggered a new window and was handed to it.
    Started,
    /// The frame was handed to the open window.
    Recording,
    /// The frame was the window's last; the window is finalized and reset.
    Closed(ClosedWindow),
}

/// Result of finalizing a window's sink.
#[derive(Debug)]
pub enum ClipOutcome {
    Saved(PathBuf),
    /// No sink could be opened, so nothing was written.
    NotWritten(RecordError),
    FinalizeFailed(RecordError),
}

/// Summary of one finished window.
#[derive(Debug)]
pub struct ClosedWindow {
    pub start_frame_index: u64,
    pub last_person_frame_index: u64,
    /// Last frame that belonged to the window.
    pub last_frame_index: u64,
    pub frames_written: u64,
    /// Frames lost to backpressure timeouts or append failures.
    pub frames_dropped: u64,
    pub reason: CloseReason,
    pub outcome: ClipOutcome,
}

/// Frame-driven recording state machine for one stream.
///
/// Frames must arrive with indices increasing by exactly 1. A qualifying
/// detection opens a window at the current frame; the window writes every
/// frame until its close bound, then finalizes its sink and resets so a later
/// detection can open a new one.
pub struct Recorder {
    policy: RecordingPolicy,
    trigger: TriggerRule,
    backpressure: Backpressure,
    factory: Box<dyn SinkFactory>,
    plan: OutputPlan,
    window: RecordingWindow,
    sink: Option<Box<dyn OutputSink>>,
    sink_error: Option<RecordError>,
    frames_written: u64,
    frames_dropped: u64,
    window_last_index: Option<u64>,
    last_frame_index: Option<u64>,
}

impl Recorder {
    pub fn new<F: SinkFactory + 'static>(
        policy: RecordingPolicy,
        trigger: TriggerRule,
        factory: F,
        plan: OutputPlan,
    ) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            trigger,
            backpressure: Backpressure::default(),
            factory: Box::new(factory),
            plan,
            window: RecordingWindow::default(),
            sink: None,
            sink_error: None,
            frames_written: 0,
            frames_dropped: 0,
            window_last_index: None,
            last_frame_index: None,
        })
    }

    pub fn with_backpressure(mut self, backpressure: Backpressure) -> Self {
        self.backpressure = backpressure;
        self
    }

    pub fn window(&self) -> &RecordingWindow {
        &self.window
    }

    pub fn policy(&self) -> &RecordingPolicy {
        &self.policy
    }

    /// Consume one frame and its detections.
    pub fn process(&mut self, frame: &Frame, detections: &[Detection]) -> Result<Step, RecordError> {
        if let Some(last) = self.last_frame_index {
            if frame.index != last + 1 {
                return Err(RecordError::FrameOutOfOrder {
                    expected: last + 1,
                    got: frame.index,
                });
            }
        }
        self.last_frame_index = Some(frame.index);

        let qualifies = self.trigger.matches(detections);
        let started = if self.window.is_open() {
            if qualifies {
                self.window.mark_person(frame.index);
            }
            false
        } else if qualifies {
            self.window.open(frame.index, frame.timestamp);
            log::info!("Recorder: start recording at frame index {}", frame.index);
            true
        } else {
            return Ok(Step::Idle);
        };

        let Some(bound) = self
            .window
            .close_bound(&self.policy, self.plan.track.nominal_frame_rate)
        else {
            return Ok(Step::Idle);
        };

        self.write(frame);
        self.window_last_index = Some(frame.index);

        if frame.index >= bound.last_frame_index {
            return Ok(Step::Closed(self.close(bound.reason)));
        }
        Ok(if started { Step::Started } else { Step::Recording })
    }

    /// Close any open window at the end of the stream.
    pub fn finish(&mut self) -> Option<ClosedWindow> {
        if self.window.is_open() {
            Some(self.close(CloseReason::StreamEnded))
        } else {
            None
        }
    }

    fn write(&mut self, frame: &Frame) {
        let Some(origin) = self.window.start_timestamp else {
            return;
        };
        let backpressure = self.backpressure;
        let Some(sink) = self.open_sink_if_absent(origin) else {
            return;
        };

        let written = if !wait_until_ready(&**sink, &backpressure) {
            log::warn!(
                "Recorder: sink not ready after {:?}; dropping frame {}",
                backpressure.ready_timeout,
                frame.index
            );
            false
        } else {
            let pts = frame.timestamp.saturating_sub(origin);
            match sink.append(frame, pts) {
                Ok(()) => true,
                Err(err) => {
                    log::warn!("Recorder: {}", err);
                    false
                }
            }
        };

        if written {
            self.frames_written += 1;
        } else {
            self.frames_dropped += 1;
        }
    }

    /// The window's sink, opened on first use. One open attempt per window.
    fn open_sink_if_absent(&mut self, origin: Duration) -> Option<&mut Box<dyn OutputSink>> {
        if self.sink.is_none() && self.sink_error.is_none() {
            let request = self.plan.request(origin);
            match self.factory.open(&request) {
                Ok(sink) => {
                    log::info!("Recorder: writing clip to {}", sink.path().display());
                    self.sink = Some(sink);
                    self.window.is_writing = true;
                }
                Err(err) => {
                    log::warn!("Recorder: {}; window continues without writing", err);
                    self.sink_error = Some(err);
                }
            }
        }
        self.sink.as_mut()
    }

    fn close(&mut self, reason: CloseReason) -> ClosedWindow {
        let start = self.window.start_frame_index.unwrap_or_default();
        let last_person = self.window.last_person_frame_index.unwrap_or(start);
        let last_frame = self.window_last_index.unwrap_or(start);

        let outcome = match self.sink.take() {
            Some(sink) => match sink.finalize() {
                Ok(path) => ClipOutcome::Saved(path),
                Err(err) => {
                    log::warn!("Recorder: {}", err);
                    ClipOutcome::FinalizeFailed(err)
                }
            },
            None => ClipOutcome::NotWritten(self.sink_error.take().unwrap_or_else(|| {
                RecordError::SinkCreationFailed {
                    path: self.plan.output_dir.clone(),
                    reason: "no sink was opened".to_string(),
                }
            })),
        };

        let closed = ClosedWindow {
            start_frame_index: start,
            last_person_frame_index: last_person,
            last_frame_index: last_frame,
            frames_written: self.frames_written,
            frames_dropped: self.frames_dropped,
            reason,
            outcome,
        };
        log::info!(
            "Recorder: window {}..={} closed ({:?}), {} frames written",
            closed.start_frame_index,
            closed.last_frame_index,
            closed.reason,
            closed.frames_written
        );

        self.window.reset();
        self.sink_error = None;
        self.frames_written = 0;
        self.frames_dropped = 0;
        self.window_last_index = None;
        closed
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(closed) = self.finish() {
            log::warn!(
                "Recorder: dropped with window {}..={} open; finalized on drop",
                closed.start_frame_index,
                closed.last_frame_index
            );
        }
    }
}

/// Poll `is_ready` until it holds or the timeout passes.
fn wait_until_ready(sink: &dyn OutputSink, backpressure: &Backpressure) -> bool {
    let deadline = Instant::now() + backpressure.ready_timeout;
    while !sink.is_ready() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(backpressure.poll_interval);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::NormalizedRect;
    use crate::frame::Rotation;
    use crate::sink::MemorySinkFactory;

    fn track() -> TrackInfo {
        TrackInfo {
            width: 4,
            height: 2,
            rotation: Rotation::Deg0,
            nominal_frame_rate: 10.0,
        }
    }

    fn frame(index: u64) -> Frame {
        Frame::new(index, Duration::from_millis(index * 100), 4, 2, vec![0; 24])
    }

    fn person() -> Vec<Detection> {
        vec![Detection::new("person", 0.95, NormalizedRect::default())]
    }

    fn recorder(policy: RecordingPolicy, factory: MemorySinkFactory) -> Recorder {
        Recorder::new(
            policy,
            TriggerRule::default(),
            factory,
            OutputPlan::new(std::env::temp_dir().join("clipwatch-recorder-tests"), track()),
        )
        .unwrap()
        .with_backpressure(Backpressure {
            poll_interval: Duration::from_millis(1),
            ready_timeout: Duration::from_millis(50),
        })
    }

    #[test]
    fn rejects_gaps_and_duplicates() {
        let mut rec = recorder(RecordingPolicy::fixed(1.0), MemorySinkFactory::new());
        rec.process(&frame(0), &[]).unwrap();
        assert!(matches!(
            rec.process(&frame(0), &[]),
            Err(RecordError::FrameOutOfOrder { expected: 1, got: 0 })
        ));
        assert!(matches!(
            rec.process(&frame(2), &[]),
            Err(RecordError::FrameOutOfOrder { expected: 1, got: 2 })
        ));
    }

    #[test]
    fn output_timestamps_start_at_zero() {
        let factory = MemorySinkFactory::new();
        let mut rec = recorder(RecordingPolicy::fixed(0.3), factory.clone());
        for index in 0..5 {
            let detections = if index == 1 { person() } else { Vec::new() };
            rec.process(&frame(index), &detections).unwrap();
        }
        let clips = factory.clips();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].request.origin, Duration::from_millis(100));
        assert_eq!(
            clips[0].frames,
            vec![
                (1, Duration::ZERO),
                (2, Duration::from_millis(100)),
                (3, Duration::from_millis(200)),
            ]
        );
    }

    #[test]
    fn backpressure_waits_for_readiness() {
        let factory = MemorySinkFactory::new().with_busy_polls(3);
        let mut rec = recorder(RecordingPolicy::fixed(0.2), factory.clone());
        let step = rec.process(&frame(0), &person()).unwrap();
        assert!(matches!(step, Step::Started));
        let step = rec.process(&frame(1), &[]).unwrap();
        match step {
            Step::Closed(closed) => {
                assert_eq!(closed.frames_written, 2);
                assert_eq!(closed.frames_dropped, 0);
            }
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[test]
    fn ready_timeout_drops_frames_without_ending_the_window() {
        // Far more busy polls than fit in the 50 ms timeout at 1 ms per poll.
        let factory = MemorySinkFactory::new().with_busy_polls(1_000_000);
        let mut rec = recorder(RecordingPolicy::fixed(0.3), factory.clone());
        assert!(matches!(
            rec.process(&frame(0), &person()).unwrap(),
            Step::Started
        ));
        assert!(matches!(
            rec.process(&frame(1), &[]).unwrap(),
            Step::Recording
        ));
        match rec.process(&frame(2), &[]).unwrap() {
            Step::Closed(closed) => {
                assert_eq!(closed.last_frame_index, 2);
                assert_eq!(closed.reason, CloseReason::DurationReached);
                assert_eq!(closed.frames_written, 0);
                assert_eq!(closed.frames_dropped, 3);
                assert!(matches!(closed.outcome, ClipOutcome::Saved(_)));
            }
            other => panic!("expected close, got {other:?}"),
        }
        let clips = factory.clips();
        assert!(clips[0].frames.is_empty());
        assert_eq!(clips[0].finalize_calls, 1);
    }

    #[test]
    fn single_frame_window_opens_and_closes_on_trigger() {
        let factory = MemorySinkFactory::new();
        let mut rec = recorder(RecordingPolicy::fixed(0.01), factory.clone());
        match rec.process(&frame(0), &person()).unwrap() {
            Step::Closed(closed) => {
                assert_eq!(closed.start_frame_index, 0);
                assert_eq!(closed.last_frame_index, 0);
                assert!(matches!(closed.outcome, ClipOutcome::Saved(_)));
            }
            other => panic!("expected close, got {other:?}"),
        }
        assert!(!rec.window().is_open());
        assert_eq!(factory.clips()[0].finalize_calls, 1);
    }

    #[test]
    fn drop_finalizes_open_window() {
        let factory = MemorySinkFactory::new();
        {
            let mut rec = recorder(RecordingPolicy::fixed(10.0), factory.clone());
            rec.process(&frame(0), &person()).unwrap();
        }
        assert_eq!(factory.clips()[0].finalize_calls, 1);
    }
}
