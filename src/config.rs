use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::LabelSet;
use crate::pipeline::SessionSettings;
use crate::record::{
    Backpressure, RecordingPolicy, TriggerRule, DEFAULT_MIN_CONFIDENCE,
    DEFAULT_SECONDS_TO_RECORD, DEFAULT_SECONDS_WITHOUT_PERSON, DEFAULT_TARGET_LABEL,
};

const DEFAULT_OUTPUT_DIR: &str = "clips";
const DEFAULT_DETECTOR: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 300;
const DEFAULT_READY_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 720;

const DETECTORS: &[&str] = &["stub", "tract"];

#[derive(Debug, Deserialize, Default)]
struct ClipwatchConfigFile {
    recording: Option<RecordingConfigFile>,
    detector: Option<DetectorConfigFile>,
    output: Option<OutputConfigFile>,
    camera: Option<CameraConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct RecordingConfigFile {
    target_label: Option<String>,
    min_confidence: Option<f32>,
    seconds_to_record: Option<f32>,
    seconds_without_person: Option<f32>,
    /// `false` records the full duration regardless of later detections.
    stop_on_silence: Option<bool>,
    ready_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    labels: Option<String>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    script: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    dir: Option<PathBuf>,
    archive_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ClipwatchConfig {
    pub recording: RecordingSettings,
    pub detector: DetectorSettings,
    pub output_dir: PathBuf,
    pub archive_dir: Option<PathBuf>,
    pub camera: CameraSettings,
}

#[derive(Debug, Clone)]
pub struct RecordingSettings {
    pub target_label: String,
    pub min_confidence: f32,
    pub seconds_to_record: f32,
    /// `None` disables the trailing-silence bound.
    pub seconds_without_person: Option<f32>,
    pub ready_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    /// Comma-separated class names; COCO when unset.
    pub labels: Option<String>,
    pub input_width: u32,
    pub input_height: u32,
    /// Detection script for the stub backend.
    pub script: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl ClipwatchConfig {
    /// Load from `CLIPWATCH_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CLIPWATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (if any), then apply env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ClipwatchConfigFile) -> Self {
        let recording = file.recording.unwrap_or_default();
        let stop_on_silence = recording.stop_on_silence.unwrap_or(true);
        let recording = RecordingSettings {
            target_label: recording
                .target_label
                .unwrap_or_else(|| DEFAULT_TARGET_LABEL.to_string()),
            min_confidence: recording.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
            seconds_to_record: recording
                .seconds_to_record
                .unwrap_or(DEFAULT_SECONDS_TO_RECORD),
            seconds_without_person: stop_on_silence.then(|| {
                recording
                    .seconds_without_person
                    .unwrap_or(DEFAULT_SECONDS_WITHOUT_PERSON)
            }),
            ready_timeout: Duration::from_millis(
                recording
                    .ready_timeout_ms
                    .unwrap_or(DEFAULT_READY_TIMEOUT_MS),
            ),
        };

        let detector = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            model_path: detector.model_path,
            labels: detector.labels,
            input_width: detector.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
            input_height: detector.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
            script: detector.script,
        };

        let output = file.output.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        Self {
            recording,
            detector,
            output_dir: output
                .dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            archive_dir: output.archive_dir,
            camera: CameraSettings {
                device: camera
                    .device
                    .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(dir) = env_non_empty("CLIPWATCH_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_non_empty("CLIPWATCH_ARCHIVE_DIR") {
            self.archive_dir = Some(PathBuf::from(dir));
        }
        if let Some(label) = env_non_empty("CLIPWATCH_TARGET_LABEL") {
            self.recording.target_label = label.trim().to_string();
        }
        if let Some(value) = env_non_empty("CLIPWATCH_MIN_CONFIDENCE") {
            self.recording.min_confidence = value.trim().parse().map_err(|_| {
                anyhow!("CLIPWATCH_MIN_CONFIDENCE must be a number between 0 and 1")
            })?;
        }
        if let Some(value) = env_non_empty("CLIPWATCH_SECONDS_TO_RECORD") {
            self.recording.seconds_to_record = value.trim().parse().map_err(|_| {
                anyhow!("CLIPWATCH_SECONDS_TO_RECORD must be a number of seconds")
            })?;
        }
        if let Some(value) = env_non_empty("CLIPWATCH_SECONDS_WITHOUT_PERSON") {
            self.recording.seconds_without_person = match value.trim() {
                "off" | "none" => None,
                seconds => Some(seconds.parse().map_err(|_| {
                    anyhow!("CLIPWATCH_SECONDS_WITHOUT_PERSON must be a number of seconds or 'off'")
                })?),
            };
        }
        if let Some(backend) = env_non_empty("CLIPWATCH_DETECTOR") {
            self.detector.backend = backend.trim().to_string();
        }
        if let Some(path) = env_non_empty("CLIPWATCH_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(labels) = env_non_empty("CLIPWATCH_LABELS") {
            self.detector.labels = Some(labels);
        }
        if let Some(script) = env_non_empty("CLIPWATCH_STUB_SCRIPT") {
            self.detector.script = Some(script);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.recording.target_label.trim().is_empty() {
            return Err(anyhow!("target label must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.recording.min_confidence) {
            return Err(anyhow!(
                "min_confidence must be between 0 and 1, got {}",
                self.recording.min_confidence
            ));
        }
        self.policy().validate()?;
        if self.recording.ready_timeout.is_zero() {
            return Err(anyhow!("ready_timeout_ms must be greater than zero"));
        }

        self.detector.backend = self.detector.backend.to_lowercase();
        if !DETECTORS.contains(&self.detector.backend.as_str()) {
            return Err(anyhow!(
                "unknown detector backend '{}' (expected one of: {})",
                self.detector.backend,
                DETECTORS.join(", ")
            ));
        }
        if self.detector.backend == "tract" && self.detector.model_path.is_none() {
            return Err(anyhow!("the tract detector requires a model path"));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input size must be greater than zero"));
        }
        if self.labels().is_empty() {
            return Err(anyhow!("detector label list is empty"));
        }

        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        Ok(())
    }

    pub fn policy(&self) -> RecordingPolicy {
        RecordingPolicy {
            seconds_to_record: self.recording.seconds_to_record,
            seconds_without_person: self.recording.seconds_without_person,
        }
    }

    pub fn trigger(&self) -> TriggerRule {
        TriggerRule::new(
            self.recording.target_label.clone(),
            self.recording.min_confidence,
        )
    }

    pub fn backpressure(&self) -> Backpressure {
        Backpressure {
            ready_timeout: self.recording.ready_timeout,
            ..Backpressure::default()
        }
    }

    pub fn labels(&self) -> LabelSet {
        match &self.detector.labels {
            Some(csv) => LabelSet::from_csv(csv),
            None => LabelSet::coco(),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            policy: self.policy(),
            trigger: self.trigger(),
            backpressure: self.backpressure(),
            output_dir: self.output_dir.clone(),
        }
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<ClipwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
