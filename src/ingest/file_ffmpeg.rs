//! Local file frame source using FFmpeg.
//!
//! Frames are decoded in-memory, converted to RGB24 and turned upright using
//! the track's rotation tag, so the frames a detector sees have the same
//! orientation as the clip written from them.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use std::time::Duration;

use super::file::FileConfig;
use crate::frame::{rotate_rgb, Frame, Rotation, TrackInfo};

pub(crate) struct FfmpegFileSource {
    config: FileConfig,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    time_base: f64,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    track: TrackInfo,
    first_pts: Option<i64>,
    frame_count: u64,
    eof_sent: bool,
}

impl FfmpegFileSource {
    pub(crate) fn new(config: FileConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&config.path)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", config.path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let time_base = f64::from(input_stream.time_base());
        let rotation = input_stream
            .metadata()
            .get("rotate")
            .and_then(|value| value.parse::<f64>().ok())
            .map(Rotation::from_degrees)
            .unwrap_or_default();
        let reported_rate = f64::from(input_stream.avg_frame_rate()) as f32;

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let nominal_frame_rate = if reported_rate.is_finite() && reported_rate > 0.0 {
            reported_rate
        } else {
            config
                .fallback_frame_rate
                .ok_or_else(|| anyhow!("'{}' reports no frame rate", config.path))?
        };
        let track = TrackInfo {
            width: decoder.width(),
            height: decoder.height(),
            rotation,
            nominal_frame_rate,
        };

        Ok(Self {
            config,
            input,
            stream_index,
            time_base,
            decoder,
            scaler,
            track,
            first_pts: None,
            frame_count: 0,
            eof_sent: false,
        })
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        log::info!(
            "FileSource: opened {} (ffmpeg, {}x{} @ {:.2} fps, rotation {})",
            self.config.path,
            self.track.width,
            self.track.height,
            self.track.nominal_frame_rate,
            self.track.rotation.degrees()
        );
        Ok(())
    }

    pub(crate) fn track(&self) -> TrackInfo {
        self.track
    }

    pub(crate) fn frames_read(&self) -> u64 {
        self.frame_count
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
            if self.eof_sent {
                return Ok(None);
            }

            let next = self
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match next {
                Some((index, packet)) if index == self.stream_index => {
                    self.decoder
                        .send_packet(&packet)
                        .context("send packet to ffmpeg decoder")?;
                }
                Some(_) => continue,
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.eof_sent = true;
                }
            }
        }
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        let (pixels, width, height) = rotate_rgb(&pixels, width, height, self.track.rotation)?;

        let index = self.frame_count;
        self.frame_count += 1;

        let timestamp = match decoded.timestamp() {
            Some(pts) => {
                let first = *self.first_pts.get_or_insert(pts);
                Duration::from_secs_f64(((pts - first) as f64 * self.time_base).max(0.0))
            }
            None => Duration::from_secs_f64(index as f64 / self.track.nominal_frame_rate as f64),
        };

        Ok(Frame::new(index, timestamp, width, height, pixels))
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let pixels = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
