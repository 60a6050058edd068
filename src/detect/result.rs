use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::backend::BackendType;

/// Keypoints under this confidence are treated as absent by consumers.
pub const KEYPOINT_VISIBILITY_THRESHOLD: f32 = 0.3;

/// A single pose keypoint in pixel space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
    #[serde(default)]
    pub name: String,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32, name: &str) -> Self {
        Self {
            x,
            y,
            confidence,
            name: name.to_string(),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.confidence >= KEYPOINT_VISIBILITY_THRESHOLD
    }
}

/// Axis-aligned box in pixel coordinates (`x1 < x2`, `y1 < y2`).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Midpoint of the bottom edge (feet/paws), the zone reference point.
    pub fn bottom_center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, self.y2)
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 > x1 && y2 > y1 {
            (x2 - x1) * (y2 - y1)
        } else {
            0.0
        }
    }

    /// Intersection over union. Zero for disjoint or degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let area_a = self.area();
        let area_b = other.area();
        if area_a <= 0.0 || area_b <= 0.0 {
            return 0.0;
        }
        let intersection = self.intersection_area(other);
        let union = area_a + area_b - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// A single detection from any backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keypoints: Vec<Keypoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_source: Option<BackendType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker_id: Option<u64>,
}

impl Detection {
    pub fn new(class_id: u32, class_name: &str, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            class_name: class_name.to_string(),
            confidence,
            bbox,
            keypoints: Vec::new(),
            backend_source: None,
            tracker_id: None,
        }
    }

    pub fn with_keypoints(mut self, keypoints: Vec<Keypoint>) -> Self {
        self.keypoints = keypoints;
        self
    }

    pub fn with_tracker_id(mut self, tracker_id: u64) -> Self {
        self.tracker_id = Some(tracker_id);
        self
    }

    pub fn with_source(mut self, source: BackendType) -> Self {
        self.backend_source = Some(source);
        self
    }
}

/// One backend's output for one frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub inference_time_ms: f64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub backend_type: BackendType,
    /// Epoch seconds.
    pub timestamp: f64,
}

impl DetectionResult {
    pub fn empty(backend_type: BackendType, frame_width: u32, frame_height: u32) -> Self {
        Self {
            detections: Vec::new(),
            inference_time_ms: 0.0,
            frame_width,
            frame_height,
            backend_type,
            timestamp: crate::frame::now_epoch_secs(),
        }
    }
}

/// Output of fusing several backends' results for one frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FusedDetectionResult {
    pub detections: Vec<Detection>,
    /// Wall time spent waiting on all backends.
    pub inference_time_ms: f64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub backends_used: Vec<BackendType>,
    pub fusion_strategy: String,
    /// Per-backend results kept for diagnostics.
    #[serde(default)]
    pub individual_results: Vec<DetectionResult>,
    /// Backend ids excluded this frame (error, timeout, or busy).
    #[serde(default)]
    pub failed_backends: Vec<String>,
    pub timestamp: f64,
}

impl FusedDetectionResult {
    pub fn counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for det in &self.detections {
            *counts.entry(det.class_name.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn total_objects(&self) -> usize {
        self.detections.len()
    }
}
