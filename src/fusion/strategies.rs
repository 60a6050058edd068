//! Fusion strategies.
//!
//! Every strategy is a pure function of the fusion config and the successful
//! backend outputs for one frame. Inputs are never mutated; merged detections
//! are fresh values.
//!
//! Clustering compares every unclustered seed against all later detections,
//! so it is quadratic in the per-frame detection count. That is fine at
//! surveillance scales (tens of objects per frame).

use std::collections::BTreeSet;

use crate::detect::{BackendType, Detection, DetectionResult, Keypoint};

use super::config::{ConfidenceAggregation, FusionConfig, FusionStrategy};

/// A successful backend result, keyed by the backend instance that produced it.
#[derive(Clone, Debug)]
pub struct BackendOutput {
    pub backend_id: String,
    pub result: DetectionResult,
}

impl BackendOutput {
    pub fn new(backend_id: &str, result: DetectionResult) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            result,
        }
    }

    /// Detections tagged with this output's backend type.
    fn tagged_detections(&self) -> impl Iterator<Item = Tagged<'_>> {
        self.result.detections.iter().map(move |det| Tagged {
            backend_id: &self.backend_id,
            det: tag(det, self.result.backend_type),
        })
    }
}

struct Tagged<'a> {
    backend_id: &'a str,
    det: Detection,
}

fn tag(det: &Detection, source: BackendType) -> Detection {
    let mut tagged = det.clone();
    tagged.backend_source = Some(source);
    tagged
}

/// Apply the configured strategy.
pub fn fuse(config: &FusionConfig, outputs: &[BackendOutput]) -> Vec<Detection> {
    match config.strategy {
        FusionStrategy::ParallelMerge => parallel_merge(config, outputs),
        FusionStrategy::Consensus => consensus(config, outputs),
        FusionStrategy::Cascade => cascade(config, outputs),
        FusionStrategy::Weighted => weighted(config, outputs),
        FusionStrategy::FirstWins => first_wins(outputs),
    }
}

pub fn parallel_merge(config: &FusionConfig, outputs: &[BackendOutput]) -> Vec<Detection> {
    let tagged: Vec<Tagged<'_>> = outputs.iter().flat_map(|o| o.tagged_detections()).collect();
    merge_clusters(config, &tagged)
}

pub fn consensus(config: &FusionConfig, outputs: &[BackendOutput]) -> Vec<Detection> {
    let tagged: Vec<Tagged<'_>> = outputs.iter().flat_map(|o| o.tagged_detections()).collect();
    let aggregation = config.effective_aggregation();

    cluster(&tagged, config.iou_threshold)
        .into_iter()
        .filter(|group| {
            let backends: BTreeSet<&str> = group.iter().map(|&i| tagged[i].backend_id).collect();
            backends.len() >= config.min_backends_agree
        })
        .map(|group| collapse(&tagged, &group, aggregation, config.prefer_pose_from))
        .collect()
}

pub fn weighted(config: &FusionConfig, outputs: &[BackendOutput]) -> Vec<Detection> {
    let tagged: Vec<Tagged<'_>> = outputs
        .iter()
        .flat_map(|o| {
            let weight = config.weight_for(o.result.backend_type);
            o.tagged_detections().map(move |mut t| {
                t.det.confidence = (t.det.confidence * weight).min(1.0);
                t
            })
        })
        .collect();
    merge_clusters(config, &tagged)
}

pub fn first_wins(outputs: &[BackendOutput]) -> Vec<Detection> {
    outputs
        .first()
        .map(|o| o.tagged_detections().map(|t| t.det).collect())
        .unwrap_or_default()
}

pub fn cascade(config: &FusionConfig, outputs: &[BackendOutput]) -> Vec<Detection> {
    let box_output = outputs
        .iter()
        .find(|o| o.result.backend_type == config.cascade_box_source);
    let pose_output = outputs
        .iter()
        .find(|o| config.is_pose_source(o.result.backend_type));

    let Some(box_output) = box_output else {
        return first_wins(outputs);
    };
    let box_dets: Vec<Detection> = box_output.tagged_detections().map(|t| t.det).collect();
    let Some(pose_output) = pose_output else {
        return box_dets;
    };
    let pose_dets: Vec<Detection> = pose_output.tagged_detections().map(|t| t.det).collect();

    let mut fused = Vec::with_capacity(box_dets.len() + pose_dets.len());
    let mut used = vec![false; pose_dets.len()];
    for box_det in box_dets {
        match best_match(&box_det, &pose_dets, &used, config.iou_threshold) {
            Some(idx) => {
                used[idx] = true;
                fused.push(merge_cascade_pair(box_det, &pose_dets[idx]));
            }
            None => fused.push(box_det),
        }
    }
    fused.extend(
        pose_dets
            .into_iter()
            .zip(used)
            .filter(|(_, used)| !used)
            .map(|(det, _)| det),
    );
    fused
}

/// Same-class pose detection with the best IoU strictly above the threshold.
fn best_match(
    det: &Detection,
    candidates: &[Detection],
    used: &[bool],
    threshold: f32,
) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, cand) in candidates.iter().enumerate() {
        if used[idx] || cand.class_id != det.class_id {
            continue;
        }
        let iou = det.bbox.iou(&cand.bbox);
        if iou <= threshold {
            continue;
        }
        if best.map_or(true, |(_, best_iou)| iou > best_iou) {
            best = Some((idx, iou));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Box from the detector, keypoints from the pose backend when it has any.
fn merge_cascade_pair(box_det: Detection, pose_det: &Detection) -> Detection {
    let keypoints = if pose_det.keypoints.is_empty() {
        box_det.keypoints.clone()
    } else {
        pose_det.keypoints.clone()
    };
    Detection {
        confidence: box_det.confidence.max(pose_det.confidence),
        keypoints,
        tracker_id: box_det.tracker_id.or(pose_det.tracker_id),
        ..box_det
    }
}

fn merge_clusters(config: &FusionConfig, tagged: &[Tagged<'_>]) -> Vec<Detection> {
    let aggregation = config.effective_aggregation();
    cluster(tagged, config.iou_threshold)
        .into_iter()
        .map(|group| collapse(tagged, &group, aggregation, config.prefer_pose_from))
        .collect()
}

/// Greedy IoU clustering: each unclustered detection seeds a group holding every
/// later unclustered detection of the same class with IoU >= threshold to it.
fn cluster(tagged: &[Tagged<'_>], threshold: f32) -> Vec<Vec<usize>> {
    let mut used = vec![false; tagged.len()];
    let mut groups = Vec::new();

    for i in 0..tagged.len() {
        if used[i] {
            continue;
        }
        used[i] = true;
        let seed = &tagged[i].det;
        let mut group = vec![i];
        for j in (i + 1)..tagged.len() {
            if used[j] || tagged[j].det.class_id != seed.class_id {
                continue;
            }
            if seed.bbox.iou(&tagged[j].det.bbox) >= threshold {
                used[j] = true;
                group.push(j);
            }
        }
        groups.push(group);
    }
    groups
}

/// Collapse a cluster onto its highest-confidence member.
fn collapse(
    tagged: &[Tagged<'_>],
    group: &[usize],
    aggregation: ConfidenceAggregation,
    prefer: Option<BackendType>,
) -> Detection {
    let mut best = group[0];
    for &idx in &group[1..] {
        if tagged[idx].det.confidence > tagged[best].det.confidence {
            best = idx;
        }
    }

    let confidences: Vec<f32> = group.iter().map(|&i| tagged[i].det.confidence).collect();
    let mut donor = &tagged[group[0]].det;
    for &idx in &group[1..] {
        donor = select_keypoints(donor, &tagged[idx].det, prefer);
    }

    let mut merged = tagged[best].det.clone();
    merged.confidence = aggregation.aggregate(&confidences);
    merged.keypoints = donor.keypoints.clone();
    if merged.tracker_id.is_none() {
        merged.tracker_id = group.iter().find_map(|&i| tagged[i].det.tracker_id);
    }
    merged
}

/// Keypoint-merge rule: a preferred backend with keypoints wins, otherwise the
/// side with more keypoints; ties go to `a`.
pub fn select_keypoints<'a>(
    a: &'a Detection,
    b: &'a Detection,
    prefer: Option<BackendType>,
) -> &'a Detection {
    if let Some(preferred) = prefer {
        if a.backend_source == Some(preferred) && !a.keypoints.is_empty() {
            return a;
        }
        if b.backend_source == Some(preferred) && !b.keypoints.is_empty() {
            return b;
        }
    }
    if a.keypoints.len() >= b.keypoints.len() {
        a
    } else {
        b
    }
}

/// Keypoints chosen for a pair of detections under the keypoint-merge rule.
pub fn merge_keypoints(a: &Detection, b: &Detection, prefer: Option<BackendType>) -> Vec<Keypoint> {
    select_keypoints(a, b, prefer).keypoints.clone()
}
