use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::detect::Detection;

pub const DEFAULT_TARGET_LABEL: &str = "person";
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.9;
pub const DEFAULT_SECONDS_TO_RECORD: f32 = 10.0;
pub const DEFAULT_SECONDS_WITHOUT_PERSON: f32 = 5.0;

/// Which detections start or extend a recording window.
#[derive(Clone, Debug, PartialEq)]
pub struct TriggerRule {
    pub label: String,
    pub min_confidence: f32,
}

impl TriggerRule {
    pub fn new(label: impl Into<String>, min_confidence: f32) -> Self {
        Self {
            label: label.into(),
            min_confidence,
        }
    }

    pub fn matches(&self, detections: &[Detection]) -> bool {
        detections
            .iter()
            .any(|d| d.label == self.label && d.confidence >= self.min_confidence)
    }
}

impl Default for TriggerRule {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_LABEL, DEFAULT_MIN_CONFIDENCE)
    }
}

/// How long a window stays open once triggered.
///
/// The fixed bound always applies. The silence bound applies when
/// `seconds_without_person` is set; whichever is reached first closes the
/// window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecordingPolicy {
    pub seconds_to_record: f32,
    pub seconds_without_person: Option<f32>,
}

impl RecordingPolicy {
    /// Record a fixed duration regardless of later detections.
    pub fn fixed(seconds_to_record: f32) -> Self {
        Self {
            seconds_to_record,
            seconds_without_person: None,
        }
    }

    /// Record up to `seconds_to_record`, stopping early after
    /// `seconds_without_person` without a qualifying detection.
    pub fn trailing_silence(seconds_to_record: f32, seconds_without_person: f32) -> Self {
        Self {
            seconds_to_record,
            seconds_without_person: Some(seconds_without_person),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.seconds_to_record.is_finite() && self.seconds_to_record > 0.0) {
            return Err(anyhow!(
                "seconds_to_record must be a positive number, got {}",
                self.seconds_to_record
            ));
        }
        if let Some(silence) = self.seconds_without_person {
            if !(silence.is_finite() && silence >= 0.0) {
                return Err(anyhow!(
                    "seconds_without_person must be zero or positive, got {}",
                    silence
                ));
            }
        }
        Ok(())
    }

    /// Frames written under the fixed bound: `max(1, ceil(S × R))`.
    pub fn frames_to_record(&self, frame_rate: f32) -> u64 {
        ceil_frames(self.seconds_to_record, frame_rate).max(1)
    }

    /// Frames tolerated after the last qualifying detection, if bounded.
    pub fn silence_frames(&self, frame_rate: f32) -> Option<u64> {
        self.seconds_without_person
            .map(|seconds| ceil_frames(seconds, frame_rate))
    }
}

impl Default for RecordingPolicy {
    fn default() -> Self {
        Self::trailing_silence(DEFAULT_SECONDS_TO_RECORD, DEFAULT_SECONDS_WITHOUT_PERSON)
    }
}

/// Bounded wait applied before every append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backpressure {
    pub poll_interval: Duration,
    /// Give up on a frame after waiting this long.
    pub ready_timeout: Duration,
}

impl Default for Backpressure {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            ready_timeout: Duration::from_secs(10),
        }
    }
}

/// `ceil(seconds × rate)` in frames; 0 for unusable rates.
pub(crate) fn ceil_frames(seconds: f32, frame_rate: f32) -> u64 {
    if !(frame_rate.is_finite() && frame_rate > 0.0 && seconds.is_finite() && seconds > 0.0) {
        return 0;
    }
    // f32 inputs like 0.1 s carry representation error; don't let it add a frame.
    let exact = seconds as f64 * frame_rate as f64;
    (exact - 1e-6).ceil().max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::NormalizedRect;

    fn detection(label: &str, confidence: f32) -> Detection {
        Detection::new(label, confidence, NormalizedRect::default())
    }

    #[test]
    fn trigger_needs_label_and_confidence() {
        let rule = TriggerRule::default();
        assert!(!rule.matches(&[]));
        assert!(!rule.matches(&[detection("person", 0.89)]));
        assert!(!rule.matches(&[detection("dog", 0.99)]));
        assert!(rule.matches(&[detection("dog", 0.99), detection("person", 0.9)]));
    }

    #[test]
    fn frame_counts_round_up() {
        let policy = RecordingPolicy::fixed(10.0);
        assert_eq!(policy.frames_to_record(30.0), 300);
        assert_eq!(policy.frames_to_record(29.97), 300);
        assert_eq!(RecordingPolicy::fixed(0.1).frames_to_record(30.0), 3);
        assert_eq!(RecordingPolicy::fixed(0.01).frames_to_record(30.0), 1);
    }

    #[test]
    fn unusable_rate_still_records_one_frame() {
        let policy = RecordingPolicy::fixed(10.0);
        assert_eq!(policy.frames_to_record(0.0), 1);
        assert_eq!(policy.frames_to_record(f32::NAN), 1);
        assert_eq!(
            RecordingPolicy::trailing_silence(10.0, 5.0).silence_frames(0.0),
            Some(0)
        );
    }

    #[test]
    fn silence_frames_only_when_enabled() {
        assert_eq!(RecordingPolicy::fixed(10.0).silence_frames(30.0), None);
        assert_eq!(
            RecordingPolicy::trailing_silence(10.0, 5.0).silence_frames(30.0),
            Some(150)
        );
    }

    #[test]
    fn validate_rejects_nonsense() {
        assert!(RecordingPolicy::fixed(0.0).validate().is_err());
        assert!(RecordingPolicy::fixed(f32::INFINITY).validate().is_err());
        assert!(RecordingPolicy::trailing_silence(10.0, -1.0).validate().is_err());
        assert!(RecordingPolicy::trailing_silence(10.0, 0.0).validate().is_ok());
        assert!(RecordingPolicy::default().validate().is_ok());
    }
}
