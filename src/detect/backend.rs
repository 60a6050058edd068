use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ArgosError, Result};
use crate::frame::Frame;

use super::result::DetectionResult;

/// Type tag of a detection backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Yolo,
    DeepLabCut,
    Sleap,
    Stub,
    Tract,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Yolo => "yolo",
            BackendType::DeepLabCut => "deeplabcut",
            BackendType::Sleap => "sleap",
            BackendType::Stub => "stub",
            BackendType::Tract => "tract",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = ArgosError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "yolo" => Ok(BackendType::Yolo),
            "deeplabcut" => Ok(BackendType::DeepLabCut),
            "sleap" => Ok(BackendType::Sleap),
            "stub" => Ok(BackendType::Stub),
            "tract" => Ok(BackendType::Tract),
            other => Err(ArgosError::Config(format!("unknown backend type '{}'", other))),
        }
    }
}

/// Kinds of subject a backend can track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Human,
    Quadruped,
    Bird,
    Rodent,
    Custom,
}

/// What a backend can do.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    pub backend_type: BackendType,
    pub supports_pose: bool,
    pub supports_tracking: bool,
    pub supports_3d: bool,
    pub supports_multi_animal: bool,
    pub max_fps: u32,
    pub supported_targets: Vec<TargetType>,
    #[serde(default)]
    pub requires_gpu: bool,
}

/// Detector backend contract.
///
/// `detect` takes `&mut self`; the pipeline wraps every backend in a `Mutex` and
/// the fusion engine calls it from a worker thread, so implementations must be
/// `Send`. Backends that have no separate pose model inherit `detect_pose`.
pub trait DetectorBackend: Send {
    fn capabilities(&self) -> BackendCapabilities;

    fn load_model(&mut self, model_name: &str) -> Result<()>;

    fn is_loaded(&self) -> bool;

    /// Run detection on one frame. May fail; the caller excludes the backend
    /// for this frame.
    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult>;

    fn detect_pose(&mut self, frame: &Frame) -> Result<DetectionResult> {
        self.detect(frame)
    }

    /// Release model handles. Called on removal and teardown.
    fn release(&mut self) {}
}
