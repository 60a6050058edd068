//! Pipeline manager.
//!
//! Owns the configured backend instances and the active fusion configuration.
//! Presets swap the whole backend set and fusion config in one call: the old
//! backends are released before the new ones are created.

mod preset;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, TryLockError};
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::detect::{
    BackendCapabilities, BackendFactory, BackendType, FusedDetectionResult, SharedBackend,
    TargetType,
};
use crate::error::{ArgosError, Result};
use crate::frame::Frame;
use crate::fusion::{FusionConfig, FusionEngine};

pub use preset::{builtin_presets, BackendSpec, Preset};

/// Lifecycle of a backend instance. Removal drops the instance entirely.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendState {
    /// Constructed, no model requested.
    Registered,
    Loaded,
    /// Model load failed; kept for introspection.
    LoadFailed,
}

/// A configured adapter owned by the pipeline.
pub struct BackendInstance {
    pub backend_id: String,
    pub backend_type: BackendType,
    pub enabled: bool,
    pub model_name: String,
    pub config: serde_json::Value,
    pub state: BackendState,
    detector: SharedBackend,
}

impl BackendInstance {
    pub fn detector(&self) -> SharedBackend {
        self.detector.clone()
    }

    /// Capabilities, or `None` while the backend is busy on a worker thread.
    pub fn capabilities(&self) -> Option<BackendCapabilities> {
        self.detector.try_lock().ok().map(|d| d.capabilities())
    }

    /// Release the backend without waiting on a worker that still holds it.
    ///
    /// A backend left running by a timed-out frame is released on a
    /// background thread once its `detect` call returns.
    fn release(&self) {
        match self.detector.try_lock() {
            Ok(mut detector) => detector.release(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().release(),
            Err(TryLockError::WouldBlock) => {
                log::warn!(
                    "backend {} still busy; release deferred until it returns",
                    self.backend_id
                );
                let detector = self.detector.clone();
                let backend_id = self.backend_id.clone();
                let spawned = thread::Builder::new()
                    .name(format!("release-{}", self.backend_id))
                    .spawn(move || {
                        match detector.lock() {
                            Ok(mut detector) => detector.release(),
                            Err(poisoned) => poisoned.into_inner().release(),
                        }
                        log::debug!("deferred release of {} done", backend_id);
                    });
                if let Err(e) = spawned {
                    log::error!("backend {}: deferred release failed: {}", self.backend_id, e);
                }
            }
        }
    }

    pub fn status(&self) -> BackendStatus {
        BackendStatus {
            backend_id: self.backend_id.clone(),
            backend_type: self.backend_type,
            enabled: self.enabled,
            model_name: self.model_name.clone(),
            state: self.state,
            capabilities: self.capabilities(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct BackendStatus {
    pub backend_id: String,
    pub backend_type: BackendType,
    pub enabled: bool,
    pub model_name: String,
    pub state: BackendState,
    pub capabilities: Option<BackendCapabilities>,
}

/// Capabilities of the active backends taken together.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CombinedCapabilities {
    pub supports_pose: bool,
    pub supports_tracking: bool,
    pub supports_3d: bool,
    pub supports_multi_animal: bool,
    /// The slowest active backend bounds the pipeline.
    pub max_fps: u32,
    pub supported_targets: Vec<TargetType>,
    pub backends_count: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct PipelineStatus {
    pub active_preset: Option<String>,
    pub backends: Vec<BackendStatus>,
    pub fusion: FusionConfig,
    pub capabilities: CombinedCapabilities,
}

pub struct PipelineManager {
    factory: BackendFactory,
    backends: Vec<BackendInstance>,
    engine: FusionEngine,
    presets: Vec<Preset>,
    active_preset: Option<String>,
    backend_counter: u64,
}

impl PipelineManager {
    pub fn new(factory: BackendFactory) -> Self {
        Self {
            factory,
            backends: Vec::new(),
            engine: FusionEngine::default(),
            presets: builtin_presets(),
            active_preset: None,
            backend_counter: 0,
        }
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.engine.set_backend_timeout(timeout);
        self
    }

    pub fn factory_mut(&mut self) -> &mut BackendFactory {
        &mut self.factory
    }

    pub fn active_preset(&self) -> Option<&str> {
        self.active_preset.as_deref()
    }

    pub fn backends(&self) -> &[BackendInstance] {
        &self.backends
    }

    pub fn backend(&self, backend_id: &str) -> Option<&BackendInstance> {
        self.backends.iter().find(|b| b.backend_id == backend_id)
    }

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    pub fn preset(&self, preset_id: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.id == preset_id)
    }

    /// Add or replace a preset by id.
    pub fn register_preset(&mut self, preset: Preset) -> Result<()> {
        preset.fusion.validate()?;
        match self.presets.iter_mut().find(|p| p.id == preset.id) {
            Some(existing) => *existing = preset,
            None => self.presets.push(preset),
        }
        Ok(())
    }

    /// Swap to a preset's backends and fusion config.
    ///
    /// Unknown ids leave the pipeline untouched. Individual backends that fail
    /// to construct are logged and skipped.
    pub fn apply_preset(&mut self, preset_id: &str) -> Result<()> {
        let preset = self
            .preset(preset_id)
            .cloned()
            .ok_or_else(|| ArgosError::PresetNotFound(preset_id.to_string()))?;

        log::info!("applying preset: {}", preset.name);
        self.clear_all_backends();
        self.engine.update_config(preset.fusion.clone());

        for spec in &preset.backends {
            if let Err(err) =
                self.add_backend(spec.backend_type, &spec.model, spec.constructor_config())
            {
                log::warn!(
                    "preset {}: skipping {} backend: {}",
                    preset.id,
                    spec.backend_type,
                    err
                );
            }
        }

        self.active_preset = Some(preset.id.clone());
        log::info!(
            "preset '{}' applied with {} backends",
            preset.name,
            self.backends.len()
        );
        Ok(())
    }

    /// Instantiate and register a backend. Returns its id.
    ///
    /// A failed model load keeps the backend registered in `LoadFailed`.
    pub fn add_backend(
        &mut self,
        backend_type: BackendType,
        model_name: &str,
        config: serde_json::Value,
    ) -> Result<String> {
        let mut detector = self.factory.create(backend_type, &config)?;

        self.backend_counter += 1;
        let backend_id = format!("{}_{}", backend_type, self.backend_counter);

        let state = if model_name.is_empty() {
            BackendState::Registered
        } else {
            match detector.load_model(model_name) {
                Ok(()) => BackendState::Loaded,
                Err(err) => {
                    log::warn!("failed to load model '{}' for {}: {}", model_name, backend_id, err);
                    BackendState::LoadFailed
                }
            }
        };

        let detector: SharedBackend = Arc::new(Mutex::new(BoxedBackend(detector)));
        self.backends.push(BackendInstance {
            backend_id: backend_id.clone(),
            backend_type,
            enabled: true,
            model_name: model_name.to_string(),
            config,
            state,
            detector,
        });
        log::info!(
            "added backend: {} ({})",
            backend_id,
            if model_name.is_empty() { "default model" } else { model_name }
        );
        Ok(backend_id)
    }

    pub fn remove_backend(&mut self, backend_id: &str) -> Result<()> {
        let idx = self
            .backends
            .iter()
            .position(|b| b.backend_id == backend_id)
            .ok_or_else(|| ArgosError::BackendNotFound(backend_id.to_string()))?;
        let instance = self.backends.remove(idx);
        instance.release();
        log::info!("removed backend: {}", backend_id);
        Ok(())
    }

    pub fn enable_backend(&mut self, backend_id: &str, enabled: bool) -> Result<()> {
        let instance = self
            .backends
            .iter_mut()
            .find(|b| b.backend_id == backend_id)
            .ok_or_else(|| ArgosError::BackendNotFound(backend_id.to_string()))?;
        instance.enabled = enabled;
        log::info!(
            "backend {} {}",
            backend_id,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// Release and drop every backend.
    pub fn clear_all_backends(&mut self) {
        for instance in self.backends.drain(..) {
            instance.release();
            log::debug!("released backend: {}", instance.backend_id);
        }
    }

    /// Enabled backends, in registration order.
    pub fn active_backends(&self) -> Vec<(String, SharedBackend)> {
        self.backends
            .iter()
            .filter(|b| b.enabled)
            .map(|b| (b.backend_id.clone(), b.detector()))
            .collect()
    }

    pub fn combined_capabilities(&self) -> CombinedCapabilities {
        let caps: Vec<BackendCapabilities> = self
            .backends
            .iter()
            .filter(|b| b.enabled)
            .filter_map(|b| b.capabilities())
            .collect();
        if caps.is_empty() {
            return CombinedCapabilities::default();
        }

        let targets: BTreeSet<TargetType> = caps
            .iter()
            .flat_map(|c| c.supported_targets.iter().copied())
            .collect();
        CombinedCapabilities {
            supports_pose: caps.iter().any(|c| c.supports_pose),
            supports_tracking: caps.iter().any(|c| c.supports_tracking),
            supports_3d: caps.iter().any(|c| c.supports_3d),
            supports_multi_animal: caps.iter().any(|c| c.supports_multi_animal),
            max_fps: caps.iter().map(|c| c.max_fps).min().unwrap_or(0),
            supported_targets: targets.into_iter().collect(),
            backends_count: caps.len(),
        }
    }

    pub fn fusion_config(&self) -> &FusionConfig {
        self.engine.config()
    }

    pub fn update_fusion_config(&mut self, config: FusionConfig) -> Result<()> {
        config.validate()?;
        self.engine.update_config(config);
        Ok(())
    }

    /// Run the active backends on a frame and fuse their results.
    pub fn process_frame(&self, frame: &Frame) -> FusedDetectionResult {
        self.engine.process(frame, &self.active_backends())
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            active_preset: self.active_preset.clone(),
            backends: self.backends.iter().map(|b| b.status()).collect(),
            fusion: self.engine.config().clone(),
            capabilities: self.combined_capabilities(),
        }
    }

    /// Release every backend. Also runs on drop.
    pub fn shutdown(&mut self) {
        if !self.backends.is_empty() {
            log::info!("releasing {} backends", self.backends.len());
        }
        self.clear_all_backends();
        self.active_preset = None;
    }
}

impl Default for PipelineManager {
    fn default() -> Self {
        Self::new(BackendFactory::with_defaults())
    }
}

impl Drop for PipelineManager {
    fn drop(&mut self) {
        self.clear_all_backends();
    }
}

/// Adapts a boxed constructor output to the sized `Mutex<T>` slot behind
/// `SharedBackend`.
struct BoxedBackend(Box<dyn crate::detect::DetectorBackend>);

impl crate::detect::DetectorBackend for BoxedBackend {
    fn capabilities(&self) -> BackendCapabilities {
        self.0.capabilities()
    }

    fn load_model(&mut self, model_name: &str) -> Result<()> {
        self.0.load_model(model_name)
    }

    fn is_loaded(&self) -> bool {
        self.0.is_loaded()
    }

    fn detect(&mut self, frame: &Frame) -> Result<crate::detect::DetectionResult> {
        self.0.detect(frame)
    }

    fn detect_pose(&mut self, frame: &Frame) -> Result<crate::detect::DetectionResult> {
        self.0.detect_pose(frame)
    }

    fn release(&mut self) {
        self.0.release()
    }
}
