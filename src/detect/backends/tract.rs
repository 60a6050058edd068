#![cfg(feature = "backend-tract")]

use std::path::Path;
use std::time::Instant;

use tract_onnx::prelude::*;

use crate::detect::backend::{BackendCapabilities, BackendType, DetectorBackend};
use crate::detect::result::{BoundingBox, Detection, DetectionResult};
use crate::error::{ArgosError, Result};
use crate::frame::{Frame, PixelFormat};

use super::stub::default_capabilities;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

const BOX_OFFSET: usize = 4;

/// Tract-based backend for YOLO-style ONNX detection models.
///
/// The model input must match the frame size; output is expected as
/// `[1, 4 + classes, anchors]` with center-size boxes.
pub struct TractBackend {
    model: Option<Plan>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
    nms_threshold: f32,
    class_names: Vec<String>,
}

impl TractBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            model: None,
            width,
            height,
            confidence_threshold: 0.5,
            nms_threshold: 0.45,
            class_names: Vec::new(),
        }
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_class_names(mut self, class_names: Vec<String>) -> Self {
        self.class_names = class_names;
        self
    }

    fn load_plan(&self, model_path: &Path) -> TractResult<Plan> {
        tract_onnx::onnx()
            .model_for_path(model_path)?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, self.height as usize, self.width as usize),
                ),
            )?
            .into_optimized()?
            .into_runnable()
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width != self.width || frame.height != self.height {
            return Err(ArgosError::backend_failure(
                "tract",
                format!(
                    "frame size {}x{} does not match model input {}x{}",
                    frame.width, frame.height, self.width, self.height
                ),
            ));
        }

        let pixels = frame.pixels();
        let width = frame.width as usize;
        let swap = frame.format == PixelFormat::Bgr;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, frame.height as usize, width),
            |(_, channel, y, x)| {
                let channel = if swap { 2 - channel } else { channel };
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }

    fn class_name(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| ArgosError::backend_failure("tract", "model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .map_err(|e| ArgosError::backend_failure("tract", e))?;
        let shape = preds.shape();
        if shape.len() != 3 || shape[1] <= BOX_OFFSET {
            return Err(ArgosError::backend_failure(
                "tract",
                format!("unexpected output shape {:?}", shape),
            ));
        }
        let (rows, anchors) = (shape[1], shape[2]);

        let mut candidates = Vec::new();
        for a in 0..anchors {
            let mut best = (0usize, f32::NEG_INFINITY);
            for c in BOX_OFFSET..rows {
                let score = preds[[0, c, a]];
                if score > best.1 {
                    best = (c - BOX_OFFSET, score);
                }
            }
            if best.1 < self.confidence_threshold {
                continue;
            }
            let (cx, cy, w, h) = (
                preds[[0, 0, a]],
                preds[[0, 1, a]],
                preds[[0, 2, a]],
                preds[[0, 3, a]],
            );
            let bbox = BoundingBox::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0);
            candidates.push(Detection::new(
                best.0 as u32,
                &self.class_name(best.0),
                best.1,
                bbox,
            ));
        }

        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let mut kept: Vec<Detection> = Vec::new();
        for cand in candidates {
            let suppressed = kept.iter().any(|k| {
                k.class_id == cand.class_id && k.bbox.iou(&cand.bbox) > self.nms_threshold
            });
            if !suppressed {
                kept.push(cand);
            }
        }
        Ok(kept)
    }
}

impl DetectorBackend for TractBackend {
    fn capabilities(&self) -> BackendCapabilities {
        default_capabilities(BackendType::Tract)
    }

    fn load_model(&mut self, model_name: &str) -> Result<()> {
        let plan = self.load_plan(Path::new(model_name)).map_err(|e| {
            ArgosError::backend_failure(
                "tract",
                format!("failed to load ONNX model from {}: {}", model_name, e),
            )
        })?;
        self.model = Some(plan);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let start = Instant::now();
        let input = self.build_input(frame)?;
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| ArgosError::backend_failure("tract", "no model loaded"))?;
        let outputs = model
            .run(tvec!(input.into()))
            .map_err(|e| ArgosError::backend_failure("tract", format!("ONNX inference failed: {}", e)))?;
        let detections = self.decode(outputs)?;

        Ok(DetectionResult {
            detections,
            inference_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            frame_width: frame.width,
            frame_height: frame.height,
            backend_type: BackendType::Tract,
            timestamp: frame.timestamp,
        })
    }

    fn release(&mut self) {
        self.model = None;
    }
}
