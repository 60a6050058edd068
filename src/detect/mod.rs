mod backend;
pub mod backends;
mod registry;
mod result;

pub use backend::{BackendCapabilities, BackendType, DetectorBackend, TargetType};
pub use backends::{default_capabilities, ScriptedBackend};
pub use registry::{BackendFactory, SharedBackend};
pub use result::{
    BoundingBox, Detection, DetectionResult, FusedDetectionResult, Keypoint,
    KEYPOINT_VISIBILITY_THRESHOLD,
};
