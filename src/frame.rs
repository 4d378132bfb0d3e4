//! Decoded frames and source track metadata.
//!
//! - `Frame`: one decoded RGB24 picture with its stream index and presentation time.
//! - `TrackInfo`: what a source knows about its video track (size, rotation, nominal rate).
//! - `Rotation`: quarter-turn orientation of a track, used to size output clips.

use anyhow::{anyhow, Result};
use std::time::Duration;

/// A decoded video frame.
///
/// Pixel data is owned by the frame and lives for one pass through the
/// session loop. Consumers borrow it through `pixels()`.
pub struct Frame {
    /// Position in the stream, starting at 0 and increasing by 1 per frame.
    pub index: u64,
    /// Presentation timestamp relative to the start of the stream.
    pub timestamp: Duration,
    pub width: u32,
    pub height: u32,
    /// Packed RGB24, row-major, no padding.
    pixels: Vec<u8>,
}

impl Frame {
    pub fn new(index: u64, timestamp: Duration, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            index,
            timestamp,
            width,
            height,
            pixels,
        }
    }

    /// Build a frame and check that the pixel buffer matches its dimensions.
    pub fn from_rgb(
        index: u64,
        timestamp: Duration,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    ) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self::new(index, timestamp, width, height, pixels))
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("timestamp", &self.timestamp)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Clockwise rotation a player applies when displaying a track.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Snap an arbitrary angle to the nearest quarter turn. Negative angles
    /// wrap, so -90 is `Deg270`.
    pub fn from_degrees(degrees: f64) -> Self {
        if !degrees.is_finite() {
            return Rotation::Deg0;
        }
        match ((degrees / 90.0).round() as i64).rem_euclid(4) {
            1 => Rotation::Deg90,
            2 => Rotation::Deg180,
            3 => Rotation::Deg270,
            _ => Rotation::Deg0,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// True for ±90°, where display width and height trade places.
    pub fn is_quarter_turn(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Video track description reported by a frame source.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackInfo {
    /// Natural (stored) width before rotation.
    pub width: u32,
    /// Natural (stored) height before rotation.
    pub height: u32,
    pub rotation: Rotation,
    /// Frames per second used for all duration arithmetic.
    pub nominal_frame_rate: f32,
}

impl TrackInfo {
    /// Dimensions of a clip written from this track: swapped for ±90°,
    /// preserved for 0°/180°.
    pub fn output_dimensions(&self) -> (u32, u32) {
        if self.rotation.is_quarter_turn() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

/// Rotate a packed RGB24 buffer clockwise. Returns the new buffer and its
/// dimensions.
pub fn rotate_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    rotation: Rotation,
) -> Result<(Vec<u8>, u32, u32)> {
    let expected = rgb_len(width, height)?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "expected {} RGB bytes, received {}",
            expected,
            pixels.len()
        ));
    }
    if rotation == Rotation::Deg0 {
        return Ok((pixels.to_vec(), width, height));
    }

    let (w, h) = (width as usize, height as usize);
    let (out_w, out_h) = if rotation.is_quarter_turn() {
        (h, w)
    } else {
        (w, h)
    };
    let mut out = vec![0u8; expected];
    for y in 0..out_h {
        for x in 0..out_w {
            let (src_x, src_y) = match rotation {
                Rotation::Deg90 => (y, h - 1 - x),
                Rotation::Deg180 => (w - 1 - x, h - 1 - y),
                Rotation::Deg270 => (w - 1 - y, x),
                Rotation::Deg0 => (x, y),
            };
            let src = (src_y * w + src_x) * 3;
            let dst = (y * out_w + x) * 3;
            out[dst..dst + 3].copy_from_slice(&pixels[src..src + 3]);
        }
    }
    Ok((out, out_w as u32, out_h as u32))
}

fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2x1 image: red, green.
    fn strip() -> Vec<u8> {
        vec![255, 0, 0, 0, 255, 0]
    }

    #[test]
    fn rotation_snaps_to_quarter_turns() {
        assert_eq!(Rotation::from_degrees(0.0), Rotation::Deg0);
        assert_eq!(Rotation::from_degrees(90.0), Rotation::Deg90);
        assert_eq!(Rotation::from_degrees(-90.0), Rotation::Deg270);
        assert_eq!(Rotation::from_degrees(180.0004), Rotation::Deg180);
        assert_eq!(Rotation::from_degrees(-180.0), Rotation::Deg180);
        assert_eq!(Rotation::from_degrees(450.0), Rotation::Deg90);
        assert_eq!(Rotation::from_degrees(f64::NAN), Rotation::Deg0);
    }

    #[test]
    fn output_dimensions_follow_rotation() {
        let mut track = TrackInfo {
            width: 1920,
            height: 1080,
            rotation: Rotation::Deg0,
            nominal_frame_rate: 30.0,
        };
        assert_eq!(track.output_dimensions(), (1920, 1080));
        track.rotation = Rotation::Deg180;
        assert_eq!(track.output_dimensions(), (1920, 1080));
        track.rotation = Rotation::Deg90;
        assert_eq!(track.output_dimensions(), (1080, 1920));
        track.rotation = Rotation::Deg270;
        assert_eq!(track.output_dimensions(), (1080, 1920));
    }

    #[test]
    fn rotate_clockwise_moves_left_pixel_to_top() {
        let (out, w, h) = rotate_rgb(&strip(), 2, 1, Rotation::Deg90).unwrap();
        assert_eq!((w, h), (1, 2));
        assert_eq!(out, vec![255, 0, 0, 0, 255, 0]);

        let (out, w, h) = rotate_rgb(&strip(), 2, 1, Rotation::Deg270).unwrap();
        assert_eq!((w, h), (1, 2));
        assert_eq!(out, vec![0, 255, 0, 255, 0, 0]);

        let (out, w, h) = rotate_rgb(&strip(), 2, 1, Rotation::Deg180).unwrap();
        assert_eq!((w, h), (2, 1));
        assert_eq!(out, vec![0, 255, 0, 255, 0, 0]);
    }

    #[test]
    fn rotate_rejects_short_buffers() {
        assert!(rotate_rgb(&[0u8; 5], 2, 1, Rotation::Deg90).is_err());
        assert!(Frame::from_rgb(0, Duration::ZERO, 2, 2, vec![0; 11]).is_err());
        assert!(Frame::from_rgb(0, Duration::ZERO, 2, 2, vec![0; 12]).is_ok());
    }
}
