use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{ArgosError, Result};

use super::backend::{BackendType, DetectorBackend};
use super::backends::ScriptedBackend;

/// Backend handle shared between the pipeline and fusion worker threads.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
pub type SharedBackend = Arc<Mutex<dyn DetectorBackend>>;

type Constructor =
    Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn DetectorBackend>> + Send + Sync>;

/// Registry mapping backend types to constructors.
///
/// New backend kinds are added by registering a constructor; neither the
/// pipeline nor the fusion engine needs to change.
pub struct BackendFactory {
    constructors: HashMap<BackendType, Constructor>,
}

impl BackendFactory {
    /// An empty factory. Every `create` fails with `UnsupportedBackend`.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Factory with the backends this crate ships: the scripted stub, and the
    /// ONNX backend when built with `backend-tract`.
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register(BackendType::Stub, |config| {
            Ok(Box::new(ScriptedBackend::from_config(BackendType::Stub, config)?))
        });
        #[cfg(feature = "backend-tract")]
        factory.register(BackendType::Tract, |config| {
            let width = config.get("width").and_then(|v| v.as_u64()).unwrap_or(640) as u32;
            let height = config.get("height").and_then(|v| v.as_u64()).unwrap_or(640) as u32;
            let mut backend = super::backends::TractBackend::new(width, height);
            if let Some(threshold) = config.get("confidence_threshold").and_then(|v| v.as_f64()) {
                backend = backend.with_threshold(threshold as f32);
            }
            if let Some(names) = config.get("class_names").and_then(|v| v.as_array()) {
                let names = names
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect();
                backend = backend.with_class_names(names);
            }
            Ok(Box::new(backend))
        });
        factory
    }

    /// Register (or replace) the constructor for a backend type.
    pub fn register<F>(&mut self, backend_type: BackendType, constructor: F)
    where
        F: Fn(&serde_json::Value) -> Result<Box<dyn DetectorBackend>> + Send + Sync + 'static,
    {
        self.constructors.insert(backend_type, Box::new(constructor));
    }

    /// Let scripted backends stand in for a real detector type.
    pub fn register_scripted(&mut self, backend_type: BackendType) {
        self.register(backend_type, move |config| {
            Ok(Box::new(ScriptedBackend::from_config(backend_type, config)?))
        });
    }

    pub fn supports(&self, backend_type: BackendType) -> bool {
        self.constructors.contains_key(&backend_type)
    }

    /// Registered types, sorted.
    pub fn list(&self) -> Vec<BackendType> {
        let mut types: Vec<BackendType> = self.constructors.keys().copied().collect();
        types.sort();
        types
    }

    pub fn create(
        &self,
        backend_type: BackendType,
        config: &serde_json::Value,
    ) -> Result<Box<dyn DetectorBackend>> {
        let constructor = self
            .constructors
            .get(&backend_type)
            .ok_or(ArgosError::UnsupportedBackend(backend_type))?;
        constructor(config)
    }
}

impl Default for BackendFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_is_unsupported() {
        let factory = BackendFactory::with_defaults();
        let err = factory
            .create(BackendType::DeepLabCut, &serde_json::Value::Null)
            .err()
            .expect("deeplabcut has no constructor by default");
        assert!(matches!(err, ArgosError::UnsupportedBackend(BackendType::DeepLabCut)));
    }

    #[test]
    fn scripted_registration_impersonates_type() {
        let mut factory = BackendFactory::new();
        factory.register_scripted(BackendType::Yolo);
        assert!(factory.supports(BackendType::Yolo));
        let backend = factory.create(BackendType::Yolo, &serde_json::Value::Null).unwrap();
        assert_eq!(backend.capabilities().backend_type, BackendType::Yolo);
        assert_eq!(factory.list(), vec![BackendType::Yolo]);
    }
}
