use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::detect::BackendType;
use crate::fusion::{ConfidenceAggregation, FusionConfig, FusionStrategy};

/// One backend a preset asks for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendSpec {
    #[serde(rename = "type")]
    pub backend_type: BackendType,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
    /// Free-form backend config passed to the constructor.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

impl BackendSpec {
    pub fn new(backend_type: BackendType, model: &str) -> Self {
        Self {
            backend_type,
            model: model.to_string(),
            targets: Vec::new(),
            config: serde_json::Value::Null,
        }
    }

    pub fn with_targets(mut self, targets: &[&str]) -> Self {
        self.targets = targets.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Config handed to the backend constructor: the spec's own config with
    /// `targets` folded in when present.
    pub fn constructor_config(&self) -> serde_json::Value {
        let mut config = match &self.config {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        if !self.targets.is_empty() {
            config.insert("targets".to_string(), serde_json::json!(self.targets));
        }
        serde_json::Value::Object(config)
    }
}

/// Named, reusable bundle of backends plus a fusion configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub backends: Vec<BackendSpec>,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
}

impl Preset {
    fn new(id: &str, name: &str, description: &str, fusion: FusionConfig) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            backends: Vec::new(),
            fusion,
            features: BTreeMap::new(),
        }
    }

    fn backend(mut self, spec: BackendSpec) -> Self {
        self.backends.push(spec);
        self
    }

    fn feature(mut self, name: &str) -> Self {
        self.features.insert(name.to_string(), true);
        self
    }
}

/// Presets shipped with the pipeline, in display order.
pub fn builtin_presets() -> Vec<Preset> {
    vec![
        Preset::new(
            "home_security",
            "Home Security",
            "Detects people and pets, intrusion alerts",
            FusionConfig::with_strategy(FusionStrategy::FirstWins),
        )
        .backend(BackendSpec::new(BackendType::Yolo, "yolo11n.pt").with_targets(&["person", "dog", "cat"]))
        .feature("intrusion_alerts")
        .feature("zone_monitoring"),
        Preset::new(
            "pet_monitor",
            "Pet Monitor",
            "Detailed pet tracking with skeleton",
            FusionConfig {
                prefer_pose_from: Some(BackendType::DeepLabCut),
                ..FusionConfig::with_strategy(FusionStrategy::Cascade)
            },
        )
        .backend(BackendSpec::new(BackendType::Yolo, "yolo11n.pt").with_targets(&["dog", "cat"]))
        .backend(BackendSpec::new(BackendType::DeepLabCut, "superanimal_quadruped"))
        .feature("skeleton_overlay")
        .feature("behavior_analysis")
        .feature("activity_tracking"),
        Preset::new(
            "high_precision",
            "High Precision",
            "Maximum precision by requiring two backends to agree",
            FusionConfig {
                min_backends_agree: 2,
                confidence_aggregation: Some(ConfidenceAggregation::Mean),
                ..FusionConfig::with_strategy(FusionStrategy::Consensus)
            },
        )
        .backend(BackendSpec::new(BackendType::Yolo, "yolo11m.pt"))
        .backend(BackendSpec::new(BackendType::DeepLabCut, "superanimal_quadruped"))
        .feature("dual_verification")
        .feature("reduce_false_positives"),
        Preset::new(
            "lab_research",
            "Lab Research",
            "High-speed multi-animal tracking",
            FusionConfig::with_strategy(FusionStrategy::FirstWins),
        )
        .backend(BackendSpec::new(BackendType::Sleap, "custom_trained"))
        .feature("multi_animal")
        .feature("trajectory_export")
        .feature("frame_by_frame"),
        Preset::new(
            "wildlife",
            "Wildlife",
            "Detection plus pose for wild animals",
            FusionConfig {
                prefer_pose_from: Some(BackendType::DeepLabCut),
                ..FusionConfig::with_strategy(FusionStrategy::ParallelMerge)
            },
        )
        .backend(
            BackendSpec::new(BackendType::Yolo, "yolo11n.pt")
                .with_targets(&["bird", "bear", "elephant", "zebra", "giraffe"]),
        )
        .backend(BackendSpec::new(BackendType::DeepLabCut, "superanimal_quadruped"))
        .feature("species_identification")
        .feature("pose_estimation"),
        Preset::new(
            "industrial",
            "Industrial",
            "Object detection and workplace safety",
            FusionConfig::with_strategy(FusionStrategy::FirstWins),
        )
        .backend(BackendSpec::new(BackendType::Yolo, "yolo11m.pt"))
        .feature("ppe_detection")
        .feature("safety_zones")
        .feature("vehicle_tracking"),
        Preset::new(
            "custom",
            "Custom",
            "Manual backend configuration",
            FusionConfig::with_strategy(FusionStrategy::ParallelMerge),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_preset_ids_are_unique() {
        let presets = builtin_presets();
        let mut ids: Vec<&str> = presets.iter().map(|p| p.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), presets.len());
    }

    #[test]
    fn high_precision_requires_agreement() {
        let presets = builtin_presets();
        let preset = presets.iter().find(|p| p.id == "high_precision").unwrap();
        assert_eq!(preset.fusion.strategy, FusionStrategy::Consensus);
        assert_eq!(preset.fusion.min_backends_agree, 2);
        assert_eq!(preset.backends.len(), 2);
    }

    #[test]
    fn constructor_config_carries_targets() {
        let spec = BackendSpec::new(BackendType::Yolo, "yolo11n.pt").with_targets(&["dog"]);
        assert_eq!(spec.constructor_config()["targets"][0], "dog");
    }
}
