//! In-memory sink for dry runs and tests.
//!
//! Records which frames were appended (index and output timestamp) and how
//! often each clip was finalized, without encoding anything.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{OutputSink, SinkFactory, SinkRequest};
use crate::error::RecordError;
use crate::frame::Frame;

/// What one in-memory sink received.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedClip {
    pub request: SinkRequest,
    /// `(frame index, pts)` for every appended frame, in order.
    pub frames: Vec<(u64, Duration)>,
    pub finalize_calls: u32,
}

impl RecordedClip {
    pub fn frame_indices(&self) -> Vec<u64> {
        self.frames.iter().map(|(index, _)| *index).collect()
    }
}

/// Factory for in-memory sinks. Clones share the same record.
#[derive(Clone, Debug, Default)]
pub struct MemorySinkFactory {
    clips: Arc<Mutex<Vec<RecordedClip>>>,
    open_attempts: Arc<AtomicUsize>,
    fail_open: bool,
    fail_finalize: bool,
    busy_polls: usize,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `open` fails, as if storage were unavailable.
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Every `finalize` fails after recording the call.
    pub fn failing_finalize(mut self) -> Self {
        self.fail_finalize = true;
        self
    }

    /// Report not-ready for `polls` readiness checks before each append.
    pub fn with_busy_polls(mut self, polls: usize) -> Self {
        self.busy_polls = polls;
        self
    }

    pub fn clips(&self) -> Vec<RecordedClip> {
        self.clips.lock().map(|clips| clips.clone()).unwrap_or_default()
    }

    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::Acquire)
    }
}

impl SinkFactory for MemorySinkFactory {
    fn open(&mut self, request: &SinkRequest) -> Result<Box<dyn OutputSink>, RecordError> {
        self.open_attempts.fetch_add(1, Ordering::AcqRel);
        if self.fail_open {
            return Err(RecordError::SinkCreationFailed {
                path: request.path.clone(),
                reason: "memory sink configured to fail".to_string(),
            });
        }
        let mut clips = self
            .clips
            .lock()
            .map_err(|_| RecordError::SinkCreationFailed {
                path: request.path.clone(),
                reason: "memory sink lock poisoned".to_string(),
            })?;
        clips.push(RecordedClip {
            request: request.clone(),
            frames: Vec::new(),
            finalize_calls: 0,
        });
        Ok(Box::new(MemorySink {
            slot: clips.len() - 1,
            path: request.path.clone(),
            clips: self.clips.clone(),
            fail_finalize: self.fail_finalize,
            busy_polls: self.busy_polls,
            polls_left: AtomicUsize::new(self.busy_polls),
        }))
    }
}

struct MemorySink {
    slot: usize,
    path: PathBuf,
    clips: Arc<Mutex<Vec<RecordedClip>>>,
    fail_finalize: bool,
    busy_polls: usize,
    polls_left: AtomicUsize,
}

impl MemorySink {
    fn with_clip<T>(&self, f: impl FnOnce(&mut RecordedClip) -> T) -> Option<T> {
        let mut clips = self.clips.lock().ok()?;
        clips.get_mut(self.slot).map(f)
    }
}

impl OutputSink for MemorySink {
    fn path(&self) -> &Path {
        &self.path
    }

    fn is_ready(&self) -> bool {
        self.polls_left
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_err()
    }

    fn append(&mut self, frame: &Frame, pts: Duration) -> Result<(), RecordError> {
        if self.polls_left.load(Ordering::Acquire) > 0 {
            return Err(RecordError::SinkNotReady);
        }
        self.polls_left.store(self.busy_polls, Ordering::Release);
        self.with_clip(|clip| clip.frames.push((frame.index, pts)))
            .ok_or_else(|| RecordError::AppendFailed {
                index: frame.index,
                reason: "memory sink record missing".to_string(),
            })
    }

    fn finalize(self: Box<Self>) -> Result<PathBuf, RecordError> {
        self.with_clip(|clip| clip.finalize_calls += 1);
        if self.fail_finalize {
            return Err(RecordError::FinalizeFailed {
                path: self.path.clone(),
                reason: "memory sink configured to fail".to_string(),
            });
        }
        Ok(self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Codec;

    fn request() -> SinkRequest {
        SinkRequest {
            path: PathBuf::from("/clips/a.mp4"),
            codec: Codec::H264,
            width: 2,
            height: 1,
            frame_rate: 30.0,
            origin: Duration::ZERO,
        }
    }

    fn frame(index: u64) -> Frame {
        Frame::new(index, Duration::ZERO, 2, 1, vec![0; 6])
    }

    #[test]
    fn busy_polls_gate_each_append() -> Result<(), RecordError> {
        let mut factory = MemorySinkFactory::new().with_busy_polls(2);
        let mut sink = factory.open(&request())?;

        assert!(matches!(
            sink.append(&frame(0), Duration::ZERO),
            Err(RecordError::SinkNotReady)
        ));
        assert!(!sink.is_ready());
        assert!(!sink.is_ready());
        assert!(sink.is_ready());
        sink.append(&frame(0), Duration::ZERO)?;
        assert!(!sink.is_ready());

        sink.finalize()?;
        let clips = factory.clips();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].frame_indices(), vec![0]);
        assert_eq!(clips[0].finalize_calls, 1);
        Ok(())
    }

    #[test]
    fn failing_open_counts_attempts() {
        let mut factory = MemorySinkFactory::new().failing_open();
        assert!(factory.open(&request()).is_err());
        assert_eq!(factory.open_attempts(), 1);
        assert!(factory.clips().is_empty());
    }
}
