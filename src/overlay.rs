//! Presentation of detections over a video preview.
//!
//! The preview is as wide as the viewport and has a 16:9 (portrait) content
//! area, letterboxed vertically. Detector boxes are normalized with a
//! bottom-left origin; screen rects are in points with a top-left origin.
//!
//! This assumes the detector saw the full frame stretched to its input
//! (scale-fill). A different crop or scale before detection needs a
//! different mapping.
//!
//! The worker publishes each frame's detections into an `OverlaySlot`; the
//! display side takes whatever is newest. Unrendered results are overwritten,
//! never queued.

use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::detect::{Detection, LabelSet, NormalizedRect};

/// Boxes drawn per frame; extra detections are ignored.
pub const MAX_BOUNDING_BOXES: usize = 10;

/// Content height per unit of viewport width.
const CONTENT_ASPECT: f32 = 16.0 / 9.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    /// Portrait preview sized from a track's output frames.
    ///
    /// The mapping assumes 16:9 content shown upright, so the short side is
    /// the width whatever the track's orientation; a landscape track gets no
    /// negative letterbox offset.
    pub fn portrait_preview(width: u32, height: u32) -> Self {
        Self {
            width: width.min(height) as f32,
            height: width.max(height) as f32,
        }
    }
}

/// Top-left-origin rectangle in viewport points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScreenRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Map a normalized detector box into viewport coordinates.
///
/// Scale by `(W, H)` with `H = W × 16/9`, flip vertically, then translate by
/// `(0, −H − offset_y)` where `offset_y = (viewport height − H) / 2`.
pub fn map_to_viewport(bbox: &NormalizedRect, viewport: Viewport) -> ScreenRect {
    let content_height = viewport.width * CONTENT_ASPECT;
    let offset_y = (viewport.height - content_height) / 2.0;

    let scaled_top = bbox.max_y() * content_height;
    ScreenRect {
        x: bbox.x * viewport.width,
        y: -(scaled_top - content_height - offset_y),
        width: bbox.width * viewport.width,
        height: bbox.height * content_height,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const RED: Rgb = Rgb { r: 255, g: 0, b: 0 };
}

/// One color per label, assigned once at setup.
#[derive(Clone, Debug, Default)]
pub struct LabelPalette {
    colors: HashMap<String, Rgb>,
}

impl LabelPalette {
    pub fn random(labels: &LabelSet) -> Self {
        Self::with_rng(labels, &mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(labels: &LabelSet, rng: &mut R) -> Self {
        let colors = labels
            .iter()
            .map(|label| {
                let color = Rgb {
                    r: rng.gen(),
                    g: rng.gen(),
                    b: rng.gen(),
                };
                (label.to_string(), color)
            })
            .collect();
        Self { colors }
    }

    /// Unknown labels are drawn red.
    pub fn color_for(&self, label: &str) -> Rgb {
        self.colors.get(label).copied().unwrap_or(Rgb::RED)
    }
}

/// A box ready to draw.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayBox {
    pub rect: ScreenRect,
    pub label: String,
    pub color: Rgb,
}

/// `"person 97.3"`: label plus confidence as a percentage.
pub fn format_label(detection: &Detection) -> String {
    format!("{} {:.1}", detection.label, detection.confidence * 100.0)
}

pub struct Overlay {
    palette: LabelPalette,
}

impl Overlay {
    pub fn new(palette: LabelPalette) -> Self {
        Self { palette }
    }

    /// Boxes for the first `MAX_BOUNDING_BOXES` detections, in detector order.
    /// Slots past the returned length are hidden.
    pub fn layout(&self, detections: &[Detection], viewport: Viewport) -> Vec<OverlayBox> {
        detections
            .iter()
            .take(MAX_BOUNDING_BOXES)
            .map(|detection| OverlayBox {
                rect: map_to_viewport(&detection.bbox, viewport),
                label: format_label(detection),
                color: self.palette.color_for(&detection.label),
            })
            .collect()
    }
}

/// Detections of one frame waiting to be drawn.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingOverlay {
    pub frame_index: u64,
    pub detections: Vec<Detection>,
}

/// Single-slot, latest-wins handoff from a session worker to the display.
#[derive(Debug, Default)]
pub struct OverlaySlot {
    pending: Mutex<Option<PendingOverlay>>,
    overwritten: AtomicU64,
}

impl OverlaySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever is pending. Returns true if an unrendered result was dropped.
    pub fn publish(&self, frame_index: u64, detections: Vec<Detection>) -> bool {
        let next = PendingOverlay {
            frame_index,
            detections,
        };
        // A poisoned slot only ever held display state; keep going with it.
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let replaced = pending.replace(next).is_some();
        if replaced {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        replaced
    }

    pub fn take(&self) -> Option<PendingOverlay> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Results replaced before the display took them.
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const PHONE: Viewport = Viewport {
        width: 375.0,
        height: 812.0,
    };

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn full_frame_box_covers_letterboxed_content() {
        let rect = map_to_viewport(&NormalizedRect::new(0.0, 0.0, 1.0, 1.0), PHONE);
        let content_height = 375.0 * 16.0 / 9.0;
        assert!(approx(rect.x, 0.0));
        assert!(approx(rect.y, (812.0 - content_height) / 2.0));
        assert!(approx(rect.width, 375.0));
        assert!(approx(rect.height, content_height));
    }

    #[test]
    fn bottom_left_box_lands_at_bottom_of_content() {
        let viewport = Viewport {
            width: 90.0,
            height: 160.0,
        };
        // No letterbox: content is exactly 90x160.
        let rect = map_to_viewport(&NormalizedRect::new(0.0, 0.0, 0.5, 0.25), viewport);
        assert!(approx(rect.x, 0.0));
        assert!(approx(rect.y, 120.0));
        assert!(approx(rect.width, 45.0));
        assert!(approx(rect.height, 40.0));

        let top = map_to_viewport(&NormalizedRect::new(0.5, 0.75, 0.5, 0.25), viewport);
        assert!(approx(top.x, 45.0));
        assert!(approx(top.y, 0.0));
    }

    #[test]
    fn landscape_track_previews_in_portrait() {
        let viewport = Viewport::portrait_preview(1280, 720);
        assert_eq!(viewport, Viewport::portrait_preview(720, 1280));
        assert!(approx(viewport.width, 720.0));
        assert!(approx(viewport.height, 1280.0));

        let rect = map_to_viewport(&NormalizedRect::new(0.0, 0.0, 1.0, 1.0), viewport);
        assert!(approx(rect.y, 0.0));
        assert!(approx(rect.height, 1280.0));
        let top = map_to_viewport(&NormalizedRect::new(0.2, 0.9, 0.1, 0.1), viewport);
        assert!(top.y >= 0.0 && top.y + top.height <= viewport.height + 1e-3);
    }

    #[test]
    fn mapping_is_deterministic() {
        let bbox = NormalizedRect::new(0.13, 0.42, 0.2, 0.31);
        assert_eq!(map_to_viewport(&bbox, PHONE), map_to_viewport(&bbox, PHONE));
    }

    #[test]
    fn layout_caps_boxes_and_formats_labels() {
        let labels = LabelSet::from_csv("person,dog");
        let palette = LabelPalette::with_rng(&labels, &mut StdRng::seed_from_u64(7));
        let overlay = Overlay::new(palette.clone());

        let detections: Vec<Detection> = (0..12)
            .map(|_| Detection::new("person", 0.973, NormalizedRect::new(0.1, 0.1, 0.2, 0.2)))
            .chain(std::iter::once(Detection::new(
                "cat",
                0.5,
                NormalizedRect::default(),
            )))
            .collect();
        let boxes = overlay.layout(&detections, PHONE);
        assert_eq!(boxes.len(), MAX_BOUNDING_BOXES);
        assert_eq!(boxes[0].label, "person 97.3");
        assert_eq!(boxes[0].color, palette.color_for("person"));

        let unknown = overlay.layout(&detections[12..], PHONE);
        assert_eq!(unknown[0].color, Rgb::RED);
    }

    #[test]
    fn slot_keeps_only_latest() {
        let slot = OverlaySlot::new();
        assert!(slot.take().is_none());
        assert!(!slot.publish(1, vec![]));
        assert!(slot.publish(2, vec![]));
        assert_eq!(slot.take().map(|p| p.frame_index), Some(2));
        assert!(slot.take().is_none());
        assert_eq!(slot.overwritten(), 1);
    }
}
