use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::detect::BackendType;
use crate::error::{ArgosError, Result};

/// How results from several backends are reconciled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    /// Keep a detection only when enough backends agree.
    Consensus,
    /// Boxes from a fast detector, keypoints from a pose backend.
    Cascade,
    /// Union of all detections, de-duplicated by IoU.
    #[default]
    #[serde(alias = "parallel")]
    ParallelMerge,
    /// Per-backend-type confidence weights, then parallel merge.
    Weighted,
    /// First available backend's detections only.
    FirstWins,
}

impl FusionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionStrategy::Consensus => "consensus",
            FusionStrategy::Cascade => "cascade",
            FusionStrategy::ParallelMerge => "parallel_merge",
            FusionStrategy::Weighted => "weighted",
            FusionStrategy::FirstWins => "first_wins",
        }
    }
}

impl fmt::Display for FusionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FusionStrategy {
    type Err = ArgosError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "consensus" => Ok(FusionStrategy::Consensus),
            "cascade" => Ok(FusionStrategy::Cascade),
            "parallel" | "parallel_merge" => Ok(FusionStrategy::ParallelMerge),
            "weighted" => Ok(FusionStrategy::Weighted),
            "first_wins" => Ok(FusionStrategy::FirstWins),
            other => Err(ArgosError::Config(format!("unknown fusion strategy '{}'", other))),
        }
    }
}

/// How a cluster's final confidence is computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceAggregation {
    Max,
    Mean,
    Min,
}

impl ConfidenceAggregation {
    /// Aggregate a non-empty slice of confidences. Empty input yields 0.
    pub fn aggregate(&self, values: &[f32]) -> f32 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            ConfidenceAggregation::Max => values.iter().copied().fold(f32::MIN, f32::max),
            ConfidenceAggregation::Min => values.iter().copied().fold(f32::MAX, f32::min),
            ConfidenceAggregation::Mean => values.iter().sum::<f32>() / values.len() as f32,
        }
    }
}

impl FromStr for ConfidenceAggregation {
    type Err = ArgosError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "max" => Ok(ConfidenceAggregation::Max),
            "mean" => Ok(ConfidenceAggregation::Mean),
            "min" => Ok(ConfidenceAggregation::Min),
            other => Err(ArgosError::Config(format!(
                "unknown confidence aggregation '{}'",
                other
            ))),
        }
    }
}

/// Configuration for merging multi-backend results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub strategy: FusionStrategy,
    /// Distinct backends that must report a cluster under `consensus`.
    pub min_backends_agree: usize,
    pub iou_threshold: f32,
    /// Prefer keypoints from this backend type when merging.
    pub prefer_pose_from: Option<BackendType>,
    /// `None` uses the strategy default: max for merges, mean for consensus.
    pub confidence_aggregation: Option<ConfidenceAggregation>,
    pub backend_weights: BTreeMap<BackendType, f32>,
    pub cascade_box_source: BackendType,
    pub cascade_pose_sources: Vec<BackendType>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            strategy: FusionStrategy::ParallelMerge,
            min_backends_agree: 1,
            iou_threshold: 0.5,
            prefer_pose_from: None,
            confidence_aggregation: None,
            backend_weights: BTreeMap::new(),
            cascade_box_source: BackendType::Yolo,
            cascade_pose_sources: vec![BackendType::DeepLabCut, BackendType::Sleap],
        }
    }
}

impl FusionConfig {
    pub fn with_strategy(strategy: FusionStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Aggregation applied to clusters for the configured strategy.
    pub fn effective_aggregation(&self) -> ConfidenceAggregation {
        self.confidence_aggregation.unwrap_or(match self.strategy {
            FusionStrategy::Consensus => ConfidenceAggregation::Mean,
            _ => ConfidenceAggregation::Max,
        })
    }

    pub fn weight_for(&self, backend_type: BackendType) -> f32 {
        self.backend_weights.get(&backend_type).copied().unwrap_or(1.0)
    }

    pub fn is_pose_source(&self, backend_type: BackendType) -> bool {
        self.cascade_pose_sources.contains(&backend_type)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(ArgosError::Config(format!(
                "iou_threshold must be within 0..=1, got {}",
                self.iou_threshold
            )));
        }
        if self.min_backends_agree == 0 {
            return Err(ArgosError::Config(
                "min_backends_agree must be at least 1".to_string(),
            ));
        }
        if let Some((backend, weight)) = self
            .backend_weights
            .iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(ArgosError::Config(format!(
                "weight for backend {} must be a non-negative number, got {}",
                backend, weight
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_modes() {
        let values = [0.9, 0.6, 0.3];
        assert_eq!(ConfidenceAggregation::Max.aggregate(&values), 0.9);
        assert_eq!(ConfidenceAggregation::Min.aggregate(&values), 0.3);
        assert!((ConfidenceAggregation::Mean.aggregate(&values) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn strategy_defaults_pick_aggregation() {
        assert_eq!(
            FusionConfig::with_strategy(FusionStrategy::Consensus).effective_aggregation(),
            ConfidenceAggregation::Mean
        );
        assert_eq!(
            FusionConfig::default().effective_aggregation(),
            ConfidenceAggregation::Max
        );
        let explicit = FusionConfig {
            confidence_aggregation: Some(ConfidenceAggregation::Min),
            ..FusionConfig::with_strategy(FusionStrategy::Consensus)
        };
        assert_eq!(explicit.effective_aggregation(), ConfidenceAggregation::Min);
    }

    #[test]
    fn strategy_parses_legacy_name() {
        assert_eq!(
            "parallel".parse::<FusionStrategy>().unwrap(),
            FusionStrategy::ParallelMerge
        );
        assert!("fastest".parse::<FusionStrategy>().is_err());
    }

    #[test]
    fn validate_rejects_bad_threshold() {
        let cfg = FusionConfig {
            iou_threshold: 1.5,
            ..FusionConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert!(FusionConfig::default().validate().is_ok());
    }
}
