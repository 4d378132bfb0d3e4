#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::LabelSet;
use crate::detect::result::{non_max_suppression, Detection, NormalizedRect};
use crate::frame::Frame;

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.3;
const DEFAULT_IOU_THRESHOLD: f32 = 0.5;

/// Tract-based backend for SSD-style ONNX detectors.
///
/// Expects two outputs: class scores `[1, N, C]` and boxes `[1, N, 4]` laid
/// out as top-left-origin `ymin, xmin, ymax, xmax`. When `C` is one more than
/// the label count, class 0 is treated as background.
///
/// Frames are stretched to the model input (scale-fill), which is what the
/// overlay mapping assumes.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    labels: LabelSet,
    width: u32,
    height: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32, labels: LabelSet) -> Result<Self> {
        if labels.is_empty() {
            return Err(anyhow!("tract backend needs a non-empty label set"));
        }
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            labels,
            width,
            height,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    /// Override the minimum score a box needs to be reported.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let pixels = frame.pixels();
        let (src_w, src_h) = (frame.width as usize, frame.height as usize);
        if src_w == 0 || src_h == 0 || pixels.len() != src_w * src_h * 3 {
            return Err(anyhow!(
                "frame {} has {} bytes for {}x{}",
                frame.index,
                pixels.len(),
                src_w,
                src_h
            ));
        }

        let (dst_w, dst_h) = (self.width as usize, self.height as usize);
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, dst_h, dst_w), |(_, channel, y, x)| {
            let sx = x * src_w / dst_w;
            let sy = y * src_h / dst_h;
            pixels[(sy * src_w + sx) * 3 + channel] as f32 / 255.0
        });

        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        let scores = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no score output"))?
            .to_array_view::<f32>()
            .context("score tensor was not f32")?;
        let boxes = outputs
            .get(1)
            .ok_or_else(|| anyhow!("model produced no box output"))?
            .to_array_view::<f32>()
            .context("box tensor was not f32")?;

        let (score_shape, box_shape) = (scores.shape(), boxes.shape());
        if score_shape.len() != 3 || box_shape.len() != 3 || box_shape[2] != 4 {
            return Err(anyhow!(
                "unexpected output shapes {:?} / {:?}",
                score_shape,
                box_shape
            ));
        }
        let anchors = score_shape[1].min(box_shape[1]);
        let classes = score_shape[2];
        let background = usize::from(classes == self.labels.len() + 1);

        let mut detections = Vec::new();
        for anchor in 0..anchors {
            let best = (background..classes)
                .map(|class| (class, scores[[0, anchor, class]]))
                .max_by(|a, b| a.1.total_cmp(&b.1));
            let Some((class, score)) = best else {
                continue;
            };
            if score < self.confidence_threshold {
                continue;
            }
            let Some(label) = self.labels.get(class - background) else {
                continue;
            };
            let bbox = NormalizedRect::from_top_left_corners(
                boxes[[0, anchor, 0]],
                boxes[[0, anchor, 1]],
                boxes[[0, anchor, 2]],
                boxes[[0, anchor, 3]],
            );
            detections.push(Detection::new(label, score, bbox));
        }

        Ok(non_max_suppression(detections, self.iou_threshold))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn labels(&self) -> &LabelSet {
        &self.labels
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::new(
            0,
            std::time::Duration::ZERO,
            self.width,
            self.height,
            vec![0; self.width as usize * self.height as usize * 3],
        );
        self.detect(&blank).map(|_| ())
    }
}
