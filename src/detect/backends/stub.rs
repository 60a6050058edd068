use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::detect::backend::{BackendCapabilities, BackendType, DetectorBackend, TargetType};
use crate::detect::result::{Detection, DetectionResult};
use crate::error::{ArgosError, Result};
use crate::frame::Frame;

/// Scripted backend for testing and for the daemon's `stub://` pipeline.
///
/// Replays a fixed sequence of per-frame detections, cycling when exhausted.
/// It can impersonate any backend type so presets that name real detectors
/// can be exercised without inference runtimes.
pub struct ScriptedBackend {
    backend_type: BackendType,
    frames: Vec<Vec<Detection>>,
    /// Answers `detect_pose`; empty falls back to `frames`.
    pose_frames: Vec<Vec<Detection>>,
    cursor: usize,
    delay: Duration,
    fail_detect: bool,
    fail_load: bool,
    loaded: bool,
    released: Arc<AtomicBool>,
}

/// JSON shape accepted through a backend instance's free-form config.
#[derive(Debug, Default, Deserialize)]
struct ScriptConfig {
    #[serde(default)]
    detections: Vec<Detection>,
    #[serde(default)]
    frames: Vec<Vec<Detection>>,
    #[serde(default)]
    pose_detections: Vec<Detection>,
    #[serde(default)]
    delay_ms: u64,
    #[serde(default)]
    fail_detect: bool,
    #[serde(default)]
    fail_load: bool,
}

impl ScriptedBackend {
    pub fn new(backend_type: BackendType) -> Self {
        Self {
            backend_type,
            frames: Vec::new(),
            pose_frames: Vec::new(),
            cursor: 0,
            delay: Duration::ZERO,
            fail_detect: false,
            fail_load: false,
            loaded: false,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Build from a backend instance config. Unknown keys are ignored.
    pub fn from_config(backend_type: BackendType, config: &serde_json::Value) -> Result<Self> {
        let script: ScriptConfig = if config.is_null() {
            ScriptConfig::default()
        } else {
            serde_json::from_value(config.clone())
                .map_err(|e| ArgosError::Config(format!("invalid stub script: {}", e)))?
        };
        let mut backend = Self::new(backend_type).with_delay(Duration::from_millis(script.delay_ms));
        backend.frames = if script.frames.is_empty() && !script.detections.is_empty() {
            vec![script.detections]
        } else {
            script.frames
        };
        if !script.pose_detections.is_empty() {
            backend.pose_frames = vec![script.pose_detections];
        }
        backend.fail_detect = script.fail_detect;
        backend.fail_load = script.fail_load;
        Ok(backend)
    }

    /// Report the same detections every frame.
    pub fn with_detections(mut self, detections: Vec<Detection>) -> Self {
        self.frames = vec![detections];
        self
    }

    /// Report `frames[n % len]` on the n-th call.
    pub fn with_sequence(mut self, frames: Vec<Vec<Detection>>) -> Self {
        self.frames = frames;
        self
    }

    /// Report these from `detect_pose` instead of the `detect` script.
    pub fn with_pose_detections(mut self, detections: Vec<Detection>) -> Self {
        self.pose_frames = vec![detections];
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_detect = true;
        self
    }

    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Flag set once `release` has been called.
    pub fn release_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }
}

impl DetectorBackend for ScriptedBackend {
    fn capabilities(&self) -> BackendCapabilities {
        default_capabilities(self.backend_type)
    }

    fn load_model(&mut self, model_name: &str) -> Result<()> {
        if self.fail_load {
            return Err(ArgosError::backend_failure(
                self.backend_type.as_str(),
                format!("model '{}' could not be loaded", model_name),
            ));
        }
        self.loaded = true;
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        self.replay(frame, false)
    }

    fn detect_pose(&mut self, frame: &Frame) -> Result<DetectionResult> {
        self.replay(frame, true)
    }

    fn release(&mut self) {
        self.loaded = false;
        self.released.store(true, Ordering::SeqCst);
    }
}

impl ScriptedBackend {
    fn replay(&mut self, frame: &Frame, pose: bool) -> Result<DetectionResult> {
        let start = Instant::now();
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.fail_detect {
            return Err(ArgosError::backend_failure(
                self.backend_type.as_str(),
                "scripted failure",
            ));
        }

        let script = if pose && !self.pose_frames.is_empty() {
            &self.pose_frames
        } else {
            &self.frames
        };
        let detections = if script.is_empty() {
            Vec::new()
        } else {
            let frame_dets = script[self.cursor % script.len()].clone();
            self.cursor += 1;
            frame_dets
        };

        Ok(DetectionResult {
            detections,
            inference_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            frame_width: frame.width,
            frame_height: frame.height,
            backend_type: self.backend_type,
            timestamp: frame.timestamp,
        })
    }
}

/// Capability table for the known backend types.
pub fn default_capabilities(backend_type: BackendType) -> BackendCapabilities {
    match backend_type {
        BackendType::Yolo | BackendType::Tract => BackendCapabilities {
            backend_type,
            supports_pose: backend_type == BackendType::Yolo,
            supports_tracking: true,
            supports_3d: false,
            supports_multi_animal: false,
            max_fps: 30,
            supported_targets: vec![TargetType::Human, TargetType::Quadruped, TargetType::Bird],
            requires_gpu: false,
        },
        BackendType::DeepLabCut => BackendCapabilities {
            backend_type,
            supports_pose: true,
            supports_tracking: true,
            supports_3d: false,
            supports_multi_animal: true,
            max_fps: 15,
            supported_targets: vec![TargetType::Quadruped, TargetType::Bird, TargetType::Rodent],
            requires_gpu: true,
        },
        BackendType::Sleap => BackendCapabilities {
            backend_type,
            supports_pose: true,
            supports_tracking: true,
            supports_3d: false,
            supports_multi_animal: true,
            max_fps: 60,
            supported_targets: vec![TargetType::Rodent, TargetType::Custom],
            requires_gpu: true,
        },
        BackendType::Stub => BackendCapabilities {
            backend_type,
            supports_pose: false,
            supports_tracking: false,
            supports_3d: false,
            supports_multi_animal: false,
            max_fps: 120,
            supported_targets: vec![TargetType::Custom],
            requires_gpu: false,
        },
    }
}
