//! Argos detection core
//!
//! Multi-backend object detection with result fusion, geofencing zones and
//! debounced alerts.
//!
//! # Architecture
//!
//! Per frame, data flows through five stages:
//!
//! 1. **Pipeline**: the active backends, chosen by preset or one by one.
//! 2. **Fusion**: every backend runs concurrently under a deadline; results
//!    are merged with one of five strategies.
//! 3. **Tracker**: fused detections get stable identities.
//! 4. **Zones**: identities are tested against polygons and diffed against
//!    the previous frame into enter/inside/exit events.
//! 5. **Alerts**: events pass a frame-count and cooldown debounce, land in a
//!    bounded history and go out through a push sink on a worker thread.
//!
//! # Module Structure
//!
//! - `frame`: frames and frame sources
//! - `detect`: backend contract, registry, detection types
//! - `fusion`: concurrent dispatch and fusion strategies
//! - `pipeline`: backend instances and presets
//! - `tracker`: identity tracker contract and a simple IoU tracker
//! - `zones`: zones and transition events
//! - `alerts`: debounce policy and delivery
//! - `runtime`: the detection loop
//! - `config`: file and environment configuration

pub mod alerts;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod fusion;
pub mod pipeline;
pub mod runtime;
pub mod tracker;
pub mod zones;

pub use alerts::{Alert, AlertConfig, AlertNotifier, AlertPriority, AlertSink, LogSink, PushMessage};
pub use detect::{
    BackendCapabilities, BackendFactory, BackendType, BoundingBox, Detection, DetectionResult,
    DetectorBackend, FusedDetectionResult, Keypoint, ScriptedBackend, SharedBackend, TargetType,
};
pub use error::{ArgosError, Result};
pub use frame::{Frame, FrameSource, PixelFormat, SyntheticSource};
pub use fusion::{ConfidenceAggregation, FusionConfig, FusionEngine, FusionStrategy};
pub use pipeline::{BackendSpec, BackendState, CombinedCapabilities, PipelineManager, Preset};
pub use runtime::{DetectionLoop, FrameReport, LoopStats};
pub use tracker::{
    IouTracker, IouTrackerConfig, PassthroughTracker, TrackedObject, Tracker, TrackerKind,
};
pub use zones::{Zone, ZoneEvent, ZoneEventKind, ZoneManager, ZoneType};
