use std::ops::RangeInclusive;

use anyhow::{anyhow, Context, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::LabelSet;
use crate::detect::result::{Detection, NormalizedRect};
use crate::frame::Frame;

/// Box used for scripted detections that do not specify one.
const DEFAULT_BOX: NormalizedRect = NormalizedRect {
    x: 0.25,
    y: 0.25,
    width: 0.5,
    height: 0.5,
};

/// Scripted backend for tests and dry runs.
///
/// Detections are keyed by frame index, so a run over a synthetic source is
/// fully deterministic.
#[derive(Default)]
pub struct StubBackend {
    script: Vec<ScriptEntry>,
    labels: LabelSet,
}

#[derive(Clone, Debug)]
struct ScriptEntry {
    frames: RangeInclusive<u64>,
    detection: Detection,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `label` at `confidence` on every frame in `frames`.
    pub fn with_detection(
        mut self,
        frames: RangeInclusive<u64>,
        label: &str,
        confidence: f32,
    ) -> Self {
        self.push(frames, Detection::new(label, confidence, DEFAULT_BOX));
        self
    }

    /// Parse a script of `;`-separated entries, each `label:confidence@start[-end]`.
    ///
    /// `"person:0.95@50-80;dog:0.6@10"` emits a person on frames 50..=80 and a
    /// dog on frame 10.
    pub fn parse_script(script: &str) -> Result<Self> {
        let mut backend = Self::new();
        for entry in script.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (detection, frames) = entry
                .split_once('@')
                .ok_or_else(|| anyhow!("script entry '{}' is missing '@frames'", entry))?;
            let (label, confidence) = detection
                .rsplit_once(':')
                .ok_or_else(|| anyhow!("script entry '{}' is missing ':confidence'", entry))?;
            let confidence: f32 = confidence
                .trim()
                .parse()
                .with_context(|| format!("invalid confidence in script entry '{}'", entry))?;
            let frames = parse_frame_range(frames)
                .with_context(|| format!("invalid frame range in script entry '{}'", entry))?;
            backend.push(frames, Detection::new(label.trim(), confidence, DEFAULT_BOX));
        }
        Ok(backend)
    }

    fn push(&mut self, frames: RangeInclusive<u64>, detection: Detection) {
        if !self.labels.contains(&detection.label) {
            self.labels = self
                .labels
                .iter()
                .map(str::to_string)
                .chain(std::iter::once(detection.label.clone()))
                .collect();
        }
        self.script.push(ScriptEntry { frames, detection });
    }
}

fn parse_frame_range(value: &str) -> Result<RangeInclusive<u64>> {
    let value = value.trim();
    let (start, end) = match value.split_once('-') {
        Some((start, end)) => (start.trim().parse()?, end.trim().parse()?),
        None => {
            let single = value.parse()?;
            (single, single)
        }
    };
    if end < start {
        return Err(anyhow!("range end {} precedes start {}", end, start));
    }
    Ok(start..=end)
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn labels(&self) -> &LabelSet {
        &self.labels
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut detections: Vec<Detection> = self
            .script
            .iter()
            .filter(|entry| entry.frames.contains(&frame.index))
            .map(|entry| entry.detection.clone())
            .collect();
        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(detections)
    }
}
