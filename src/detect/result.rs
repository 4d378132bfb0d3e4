/// Axis-aligned box in normalized image coordinates.
///
/// Origin is the bottom-left corner of the image; all extents are in `0..=1`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Convert from top-left-origin corners (`ymin, xmin, ymax, xmax`), the
    /// layout most SSD exports use.
    pub fn from_top_left_corners(ymin: f32, xmin: f32, ymax: f32, xmax: f32) -> Self {
        let xmin = xmin.clamp(0.0, 1.0);
        let xmax = xmax.clamp(0.0, 1.0);
        let ymin = ymin.clamp(0.0, 1.0);
        let ymax = ymax.clamp(0.0, 1.0);
        Self {
            x: xmin,
            y: 1.0 - ymax,
            width: (xmax - xmin).max(0.0),
            height: (ymax - ymin).max(0.0),
        }
    }

    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union.
    pub fn iou(&self, other: &NormalizedRect) -> f32 {
        let ix = (self.max_x().min(other.max_x()) - self.x.max(other.x)).max(0.0);
        let iy = (self.max_y().min(other.max_y()) - self.y.max(other.y)).max(0.0);
        let intersection = ix * iy;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// One labeled, confidence-scored box produced by a detector.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: String,
    /// Confidence in `0..=1`.
    pub confidence: f32,
    pub bbox: NormalizedRect,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: NormalizedRect) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// Greedy per-label non-maximum suppression. Output is sorted by descending
/// confidence.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = kept.iter().any(|k| {
            k.label == candidate.label && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_left_corners_flip_to_bottom_left_origin() {
        let rect = NormalizedRect::from_top_left_corners(0.1, 0.2, 0.4, 0.6);
        assert!((rect.x - 0.2).abs() < 1e-6);
        assert!((rect.y - 0.6).abs() < 1e-6);
        assert!((rect.width - 0.4).abs() < 1e-6);
        assert!((rect.height - 0.3).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = NormalizedRect::new(0.0, 0.0, 0.5, 0.5);
        let b = NormalizedRect::new(0.5, 0.5, 0.5, 0.5);
        assert_eq!(a.iou(&b), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn confidence_is_clamped() {
        let d = Detection::new("person", 1.4, NormalizedRect::default());
        assert_eq!(d.confidence, 1.0);
        let d = Detection::new("person", f32::NAN, NormalizedRect::default());
        assert_eq!(d.confidence, 0.0);
    }

    #[test]
    fn nms_keeps_best_box_per_label() {
        let boxed = NormalizedRect::new(0.1, 0.1, 0.5, 0.5);
        let shifted = NormalizedRect::new(0.12, 0.1, 0.5, 0.5);
        let kept = non_max_suppression(
            vec![
                Detection::new("person", 0.7, boxed),
                Detection::new("person", 0.95, shifted),
                Detection::new("dog", 0.8, boxed),
            ],
            0.5,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].label, "person");
        assert_eq!(kept[0].confidence, 0.95);
        assert_eq!(kept[1].label, "dog");
    }
}
