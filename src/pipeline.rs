//! Per-stream processing session.
//!
//! A session owns one frame source, one recorder and a handle to a detector
//! backend, and runs Source → Detector → Recorder sequentially on a single
//! worker. Detections are also published to an optional `OverlaySlot` for
//! display; the recording path never waits on it.
//!
//! The loop ends when the source is exhausted, a read fails, or the stop flag
//! is set. In every case an open window is finalized exactly once before the
//! worker returns.

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::detect::{Detection, SharedBackend};
use crate::error::RecordError;
use crate::frame::{Frame, TrackInfo};
use crate::ingest::FrameSource;
use crate::overlay::OverlaySlot;
use crate::persist::ClipArchive;
use crate::record::{
    Backpressure, ClipOutcome, ClosedWindow, OutputPlan, Recorder, RecordingPolicy, Step,
    TriggerRule,
};
use crate::sink::SinkFactory;

/// Recording parameters for one session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSettings {
    pub policy: RecordingPolicy,
    pub trigger: TriggerRule,
    pub backpressure: Backpressure,
    /// Working directory for clips being written.
    pub output_dir: PathBuf,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            policy: RecordingPolicy::default(),
            trigger: TriggerRule::default(),
            backpressure: Backpressure::default(),
            output_dir: std::env::temp_dir().join("clipwatch"),
        }
    }
}

/// Why a session stopped reading frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndReason {
    Exhausted,
    Stopped,
    ReadFailed(String),
}

#[derive(Debug)]
pub struct SessionSummary {
    pub frames_processed: u64,
    /// Frames whose detection call failed and were treated as empty.
    pub detector_failures: u64,
    pub clips: Vec<ClosedWindow>,
    /// Archived clip paths, in window order.
    pub persisted: Vec<PathBuf>,
    pub persistence_failures: Vec<RecordError>,
    pub ended: EndReason,
}

impl SessionSummary {
    fn new() -> Self {
        Self {
            frames_processed: 0,
            detector_failures: 0,
            clips: Vec::new(),
            persisted: Vec::new(),
            persistence_failures: Vec::new(),
            ended: EndReason::Exhausted,
        }
    }

    /// Clips that finalized successfully.
    pub fn saved(&self) -> impl Iterator<Item = &PathBuf> {
        self.clips.iter().filter_map(|clip| match &clip.outcome {
            ClipOutcome::Saved(path) => Some(path),
            _ => None,
        })
    }
}

pub struct Session {
    source: Box<dyn FrameSource>,
    detector: SharedBackend,
    recorder: Recorder,
    track: TrackInfo,
    overlay: Option<Arc<OverlaySlot>>,
    archive: Option<ClipArchive>,
    stop: Arc<AtomicBool>,
}

impl Session {
    /// Connect the source, read its track and warm up the detector.
    pub fn new<F: SinkFactory + 'static>(
        mut source: Box<dyn FrameSource>,
        detector: SharedBackend,
        factory: F,
        settings: SessionSettings,
    ) -> Result<Self> {
        source.connect().context("connect frame source")?;
        let track = source.track();
        log::info!(
            "Session: track {}x{} rotation {}° at {:.2} fps",
            track.width,
            track.height,
            track.rotation.degrees(),
            track.nominal_frame_rate
        );

        {
            let mut backend = detector
                .lock()
                .map_err(|_| anyhow!("detector lock poisoned"))?;
            backend
                .warm_up()
                .with_context(|| format!("warm up detector '{}'", backend.name()))?;
        }

        let recorder = Recorder::new(
            settings.policy,
            settings.trigger,
            factory,
            OutputPlan::new(settings.output_dir, track),
        )?
        .with_backpressure(settings.backpressure);

        Ok(Self {
            source,
            detector,
            recorder,
            track,
            overlay: None,
            archive: None,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_overlay(mut self, slot: Arc<OverlaySlot>) -> Self {
        self.overlay = Some(slot);
        self
    }

    /// Move finalized clips into `archive`.
    pub fn with_archive(mut self, archive: ClipArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn track(&self) -> &TrackInfo {
        &self.track
    }

    /// Flag that ends the session after the current frame.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Process frames on the calling thread until the stream ends.
    ///
    /// Returns `Err` only for out-of-order frames from the source, after the
    /// open window (if any) has been finalized.
    pub fn run(mut self) -> Result<SessionSummary> {
        let mut summary = SessionSummary::new();

        loop {
            if self.stop.load(Ordering::SeqCst) {
                log::info!("Session: stop requested");
                summary.ended = EndReason::Stopped;
                break;
            }

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!(
                        "Session: source exhausted after {} frames",
                        self.source.frames_read()
                    );
                    summary.ended = EndReason::Exhausted;
                    break;
                }
                Err(err) => {
                    let err = RecordError::ReadError(format!("{:#}", err));
                    log::error!("Session: {}", err);
                    summary.ended = EndReason::ReadFailed(err.to_string());
                    break;
                }
            };

            let detections = self.detect(&frame, &mut summary);
            if let Some(slot) = &self.overlay {
                slot.publish(frame.index, detections.clone());
            }

            match self.recorder.process(&frame, &detections) {
                Ok(Step::Closed(closed)) => self.record_closed(closed, &mut summary),
                Ok(_) => {}
                Err(err) => {
                    if let Some(closed) = self.recorder.finish() {
                        self.record_closed(closed, &mut summary);
                    }
                    return Err(anyhow::Error::new(err).context("session aborted"));
                }
            }
            summary.frames_processed += 1;
        }

        if let Some(closed) = self.recorder.finish() {
            self.record_closed(closed, &mut summary);
        }
        log::info!(
            "Session: {} frames processed, {} clips",
            summary.frames_processed,
            summary.clips.len()
        );
        Ok(summary)
    }

    /// Run on a dedicated worker thread.
    pub fn spawn(self) -> Result<SessionHandle> {
        let stop = self.stop.clone();
        let join = std::thread::Builder::new()
            .name("clipwatch-session".to_string())
            .spawn(move || self.run())
            .context("spawn session worker")?;
        Ok(SessionHandle {
            stop,
            join: Some(join),
        })
    }

    /// Detector failures are logged and the frame counts as having no detections.
    fn detect(&self, frame: &Frame, summary: &mut SessionSummary) -> Vec<Detection> {
        let result = match self.detector.lock() {
            Ok(mut backend) => backend.detect(frame),
            Err(_) => Err(anyhow!("detector lock poisoned")),
        };
        match result {
            Ok(detections) => detections,
            Err(err) => {
                summary.detector_failures += 1;
                log::warn!("Session: detection failed on frame {}: {:#}", frame.index, err);
                Vec::new()
            }
        }
    }

    fn record_closed(&self, closed: ClosedWindow, summary: &mut SessionSummary) {
        if let (Some(archive), ClipOutcome::Saved(path)) = (&self.archive, &closed.outcome) {
            match archive.persist(path) {
                Ok(saved) => summary.persisted.push(saved),
                Err(err) => {
                    log::warn!("Session: {}", err);
                    summary.persistence_failures.push(err);
                }
            }
        }
        summary.clips.push(closed);
    }
}

/// A session running on its own thread.
#[derive(Debug)]
pub struct SessionHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<Result<SessionSummary>>>,
}

impl SessionHandle {
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Ask the worker to stop and wait for its summary.
    pub fn stop(self) -> Result<SessionSummary> {
        self.stop.store(true, Ordering::SeqCst);
        self.join()
    }

    /// Wait for the worker to end on its own.
    pub fn join(mut self) -> Result<SessionSummary> {
        let join = self
            .join
            .take()
            .ok_or_else(|| anyhow!("session already joined"))?;
        join.join()
            .map_err(|_| anyhow!("session worker panicked"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{shared, StubBackend};
    use crate::ingest::{FileConfig, FileSource};
    use crate::record::CloseReason;
    use crate::sink::MemorySinkFactory;

    fn source(url: &str) -> Box<dyn FrameSource> {
        Box::new(FileSource::new(FileConfig::new(url)).unwrap())
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            policy: RecordingPolicy::fixed(1.0),
            output_dir: std::env::temp_dir().join("clipwatch-session-tests"),
            ..SessionSettings::default()
        }
    }

    #[test]
    fn exhausted_stream_finalizes_open_window() -> Result<()> {
        let factory = MemorySinkFactory::new();
        let session = Session::new(
            source("stub://door?frames=20&fps=10"),
            shared(StubBackend::new().with_detection(15..=15, "person", 0.95)),
            factory.clone(),
            settings(),
        )?;
        let summary = session.run()?;

        assert_eq!(summary.ended, EndReason::Exhausted);
        assert_eq!(summary.frames_processed, 20);
        assert_eq!(summary.clips.len(), 1);
        assert_eq!(summary.clips[0].reason, CloseReason::StreamEnded);
        assert_eq!(factory.clips()[0].frame_indices(), (15..20).collect::<Vec<_>>());
        assert_eq!(factory.clips()[0].finalize_calls, 1);
        Ok(())
    }

    #[test]
    fn overlay_receives_latest_detections() -> Result<()> {
        let slot = Arc::new(OverlaySlot::new());
        let session = Session::new(
            source("stub://door?frames=5&fps=10"),
            shared(StubBackend::new().with_detection(0..=4, "dog", 0.5)),
            MemorySinkFactory::new(),
            settings(),
        )?
        .with_overlay(slot.clone());
        session.run()?;

        let pending = slot.take().expect("overlay published");
        assert_eq!(pending.frame_index, 4);
        assert_eq!(pending.detections[0].label, "dog");
        Ok(())
    }

    #[test]
    fn stop_flag_ends_infinite_stream() -> Result<()> {
        let factory = MemorySinkFactory::new();
        let session = Session::new(
            source("stub://cam?frames=inf&fps=1000&width=4&height=2"),
            shared(StubBackend::new().with_detection(0..=u64::MAX, "person", 0.99)),
            factory.clone(),
            SessionSettings {
                policy: RecordingPolicy::fixed(3600.0),
                ..settings()
            },
        )?;
        let handle = session.spawn()?;
        std::thread::sleep(std::time::Duration::from_millis(50));
        let summary = handle.stop()?;

        assert_eq!(summary.ended, EndReason::Stopped);
        assert_eq!(summary.clips.len(), 1);
        assert_eq!(factory.clips()[0].finalize_calls, 1);
        Ok(())
    }
}
