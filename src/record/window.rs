use std::time::Duration;

use super::policy::RecordingPolicy;

/// Why a window stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The fixed duration bound was reached.
    DurationReached,
    /// The subject was absent for the configured silence duration.
    SilenceReached,
    /// The stream ended (exhausted, failed, or stopped) while the window was open.
    StreamEnded,
}

/// Last frame a window will write, and which bound put it there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloseBound {
    pub last_frame_index: u64,
    pub reason: CloseReason,
}

/// Mutable state of one recording window.
///
/// All fields are absent between windows. `start_frame_index` and
/// `last_person_frame_index` are set together on the trigger frame, so the
/// silence bound never sees a stale or missing detection index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordingWindow {
    pub start_frame_index: Option<u64>,
    pub last_person_frame_index: Option<u64>,
    /// Presentation time of the trigger frame; zero in the output clip.
    pub start_timestamp: Option<Duration>,
    /// True once a sink is open and accepting this window's frames.
    pub is_writing: bool,
}

impl RecordingWindow {
    pub fn is_open(&self) -> bool {
        self.start_frame_index.is_some()
    }

    pub(crate) fn open(&mut self, frame_index: u64, timestamp: Duration) {
        debug_assert!(!self.is_open(), "window opened twice");
        self.start_frame_index = Some(frame_index);
        self.last_person_frame_index = Some(frame_index);
        self.start_timestamp = Some(timestamp);
        self.is_writing = false;
    }

    pub(crate) fn mark_person(&mut self, frame_index: u64) {
        let last = self.last_person_frame_index.get_or_insert(frame_index);
        *last = (*last).max(frame_index);
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Earliest of the fixed-duration and silence bounds, `None` when idle.
    ///
    /// On a tie the fixed bound is reported. Bounds past `u64::MAX` saturate,
    /// leaving the end of the stream to close the window.
    pub fn close_bound(&self, policy: &RecordingPolicy, frame_rate: f32) -> Option<CloseBound> {
        let start = self.start_frame_index?;
        let fixed = CloseBound {
            last_frame_index: start.saturating_add(policy.frames_to_record(frame_rate) - 1),
            reason: CloseReason::DurationReached,
        };
        let silence = policy.silence_frames(frame_rate).map(|gap| CloseBound {
            last_frame_index: self
                .last_person_frame_index
                .unwrap_or(start)
                .saturating_add(gap),
            reason: CloseReason::SilenceReached,
        });
        Some(match silence {
            Some(silence) if silence.last_frame_index < fixed.last_frame_index => silence,
            _ => fixed,
        })
    }
}
