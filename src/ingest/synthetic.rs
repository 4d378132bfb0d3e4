//! Synthetic `stub://` streams.
//!
//! `stub://name?frames=300&fps=30&width=160&height=120&rotation=0&fail_at=N`
//! describes a finite generated stream. Every parameter is optional.
//! `fail_at` makes the read of that frame index fail, which is how tests
//! exercise mid-stream read errors.

use anyhow::{anyhow, Context, Result};
use std::time::Duration;

use crate::frame::{Frame, Rotation, TrackInfo};

const DEFAULT_FRAMES: u64 = 300;
const DEFAULT_FPS: f32 = 30.0;
const DEFAULT_WIDTH: u32 = 160;
const DEFAULT_HEIGHT: u32 = 120;

/// Parameters of a synthetic stream.
#[derive(Clone, Debug, PartialEq)]
pub struct StubParams {
    pub name: String,
    /// Total frames before the stream is exhausted; `None` runs forever.
    pub frames: Option<u64>,
    pub fps: f32,
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    pub fail_at: Option<u64>,
}

impl StubParams {
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("'{}' is not a stub:// url", url))?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));
        let mut params = Self {
            name: name.to_string(),
            frames: Some(DEFAULT_FRAMES),
            fps: DEFAULT_FPS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            rotation: Rotation::Deg0,
            fail_at: None,
        };

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("stub parameter '{}' has no value", pair))?;
            let context = || format!("invalid stub parameter {}={}", key, value);
            match key {
                "frames" if value == "inf" => params.frames = None,
                "frames" => params.frames = Some(value.parse().with_context(context)?),
                "fps" => params.fps = value.parse().with_context(context)?,
                "width" => params.width = value.parse().with_context(context)?,
                "height" => params.height = value.parse().with_context(context)?,
                "rotation" => {
                    params.rotation = Rotation::from_degrees(value.parse().with_context(context)?)
                }
                "fail_at" => params.fail_at = Some(value.parse().with_context(context)?),
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }

        if params.width == 0 || params.height == 0 {
            return Err(anyhow!("stub dimensions must be non-zero"));
        }
        if !(params.fps.is_finite() && params.fps > 0.0) {
            return Err(anyhow!("stub fps must be positive"));
        }
        Ok(params)
    }
}

/// Deterministic frame generator shared by the stub file and camera sources.
pub(crate) struct SyntheticStream {
    params: StubParams,
    next_index: u64,
}

impl SyntheticStream {
    pub(crate) fn new(params: StubParams) -> Self {
        Self {
            params,
            next_index: 0,
        }
    }

    pub(crate) fn params(&self) -> &StubParams {
        &self.params
    }

    pub(crate) fn track(&self) -> TrackInfo {
        TrackInfo {
            width: self.params.width,
            height: self.params.height,
            rotation: self.params.rotation,
            nominal_frame_rate: self.params.fps,
        }
    }

    pub(crate) fn frames_read(&self) -> u64 {
        self.next_index
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        let index = self.next_index;
        if self.params.fail_at == Some(index) {
            return Err(anyhow!(
                "synthetic read failure at frame {} of {}",
                index,
                self.params.name
            ));
        }
        if self.params.frames.is_some_and(|total| index >= total) {
            return Ok(None);
        }
        self.next_index += 1;

        // Frames come out upright, like decoded file frames do.
        let (width, height) = self.track().output_dimensions();
        let timestamp = Duration::from_secs_f64(index as f64 / self.params.fps as f64);
        let pixels = generate_pixels(width, height, index);
        Ok(Some(Frame::new(index, timestamp, width, height, pixels)))
    }
}

/// Moving gradient so consecutive frames differ.
fn generate_pixels(width: u32, height: u32, index: u64) -> Vec<u8> {
    let pixel_count = (width * height * 3) as usize;
    let mut pixels = vec![0u8; pixel_count];
    for (i, pixel) in pixels.iter_mut().enumerate() {
        *pixel = ((i as u64 + index) % 256) as u8;
    }
    pixels
}
