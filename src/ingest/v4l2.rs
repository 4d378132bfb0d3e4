//! V4L2 frame source.
//!
//! This module provides `V4l2Source` for live capture from a local V4L2
//! device. Timestamps are measured from the moment the stream connects, so a
//! live session looks like a file whose first frame is at zero.
//!
//! `stub://` device paths produce an unbounded synthetic stream at the
//! configured rate and size (or whatever the url's query asks for).

use anyhow::{Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::synthetic::{StubParams, SyntheticStream};
use super::FrameSource;
use crate::frame::{Frame, Rotation, TrackInfo};

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Requested frame rate. Also the nominal rate used for clip durations.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 30,
            width: 1280,
            height: 720,
        }
    }
}

/// V4L2 frame source.
///
/// Uses libv4l for real devices, with a synthetic fallback for `stub://` paths.
pub struct V4l2Source {
    backend: V4l2Backend,
}

enum V4l2Backend {
    Synthetic(SyntheticStream),
    Device(DeviceV4l2Source),
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Result<Self> {
        if config.device.starts_with("stub://") {
            let mut params = StubParams::parse(&config.device)?;
            if !config.device.contains('?') {
                params.frames = None;
                params.fps = config.target_fps.max(1) as f32;
                params.width = config.width;
                params.height = config.height;
            }
            Ok(Self {
                backend: V4l2Backend::Synthetic(SyntheticStream::new(params)),
            })
        } else {
            Ok(Self {
                backend: V4l2Backend::Device(DeviceV4l2Source::new(config)),
            })
        }
    }
}

impl FrameSource for V4l2Source {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            V4l2Backend::Synthetic(stream) => {
                log::info!(
                    "V4l2Source: connected to {} (synthetic)",
                    stream.params().name
                );
                Ok(())
            }
            V4l2Backend::Device(source) => source.connect(),
        }
    }

    fn track(&self) -> TrackInfo {
        match &self.backend {
            V4l2Backend::Synthetic(stream) => stream.track(),
            V4l2Backend::Device(source) => source.track(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            V4l2Backend::Synthetic(stream) => stream.next_frame(),
            V4l2Backend::Device(source) => source.next_frame().map(Some),
        }
    }

    fn frames_read(&self) -> u64 {
        match &self.backend {
            V4l2Backend::Synthetic(stream) => stream.frames_read(),
            V4l2Backend::Device(source) => source.frame_count,
        }
    }
}

// ----------------------------------------------------------------------------
// Production V4L2 source using libv4l
// ----------------------------------------------------------------------------

struct DeviceV4l2Source {
    config: V4l2Config,
    state: Option<DeviceV4l2State>,
    frame_count: u64,
    started_at: Option<Instant>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl DeviceV4l2Source {
    fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            frame_count: 0,
            started_at: None,
        }
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceV4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);
        self.started_at = Some(Instant::now());

        log::info!(
            "V4l2Source: connected to {} ({}x{})",
            self.config.device,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    fn track(&self) -> TrackInfo {
        TrackInfo {
            width: self.active_width,
            height: self.active_height,
            rotation: Rotation::Deg0,
            nominal_frame_rate: self.config.target_fps.max(1) as f32,
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let expected = self.active_width as usize * self.active_height as usize * 3;
        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let pixels = state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, _meta) = fields.stream.next().context("capture v4l2 frame")?;
            Ok(buf
                .get(..expected)
                .context("v4l2 buffer is shorter than the negotiated RGB frame")?
                .to_vec())
        })?;

        let index = self.frame_count;
        self.frame_count += 1;
        let timestamp = self
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or(Duration::ZERO);

        Ok(Frame::new(
            index,
            timestamp,
            self.active_width,
            self.active_height,
            pixels,
        ))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> V4l2Config {
        V4l2Config {
            device: "stub://test".to_string(),
            target_fps: 15,
            width: 64,
            height: 48,
        }
    }

    #[test]
    fn v4l2_stub_uses_configured_geometry() -> Result<()> {
        let mut source = V4l2Source::new(stub_config())?;
        source.connect()?;

        let track = source.track();
        assert_eq!((track.width, track.height), (64, 48));
        assert_eq!(track.nominal_frame_rate, 15.0);

        let frame = source.next_frame()?.expect("live stub never ends");
        assert_eq!(frame.index, 0);
        assert_eq!(frame.byte_len(), 64 * 48 * 3);
        Ok(())
    }

    #[test]
    fn v4l2_stub_indices_are_contiguous() -> Result<()> {
        let mut source = V4l2Source::new(stub_config())?;
        source.connect()?;
        for expected in 0..5 {
            let frame = source.next_frame()?.expect("frame");
            assert_eq!(frame.index, expected);
        }
        assert_eq!(source.frames_read(), 5);
        Ok(())
    }
}
