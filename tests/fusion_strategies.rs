use std::sync::{Arc, Mutex};

use argos_core::fusion::strategies::{self, BackendOutput};
use argos_core::{
    BackendType, BoundingBox, ConfidenceAggregation, Detection, DetectionResult, FusionConfig,
    FusionEngine, FusionStrategy, Keypoint, ScriptedBackend, SharedBackend,
};

fn person(conf: f32, bbox: BoundingBox) -> Detection {
    Detection::new(0, "person", conf, bbox)
}

fn output(id: &str, backend_type: BackendType, detections: Vec<Detection>) -> BackendOutput {
    let mut result = DetectionResult::empty(backend_type, 640, 480);
    result.detections = detections;
    BackendOutput::new(id, result)
}

fn box_a() -> BoundingBox {
    BoundingBox::new(0.0, 0.0, 10.0, 10.0)
}

fn box_b() -> BoundingBox {
    BoundingBox::new(1.0, 1.0, 11.0, 11.0)
}

fn skeleton(n: usize) -> Vec<Keypoint> {
    (0..n)
        .map(|i| Keypoint::new(i as f32, i as f32, 0.9, &format!("kp{}", i)))
        .collect()
}

#[test]
fn iou_identity_disjoint_and_symmetric() {
    let a = box_a();
    let b = box_b();
    let far = BoundingBox::new(100.0, 100.0, 110.0, 110.0);
    assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    assert_eq!(a.iou(&far), 0.0);
    assert!((a.iou(&b) - b.iou(&a)).abs() < 1e-6);
    assert!((a.iou(&b) - 81.0 / 119.0).abs() < 1e-4);
    let degenerate = BoundingBox::new(5.0, 5.0, 5.0, 9.0);
    assert_eq!(a.iou(&degenerate), 0.0);
}

#[test]
fn parallel_merge_collapses_overlapping_pair_onto_strongest() {
    let outputs = vec![
        output("yolo_1", BackendType::Yolo, vec![person(0.9, box_a())]),
        output("dlc_2", BackendType::DeepLabCut, vec![person(0.6, box_b())]),
    ];
    let fused = strategies::parallel_merge(&FusionConfig::default(), &outputs);
    assert_eq!(fused.len(), 1);
    assert!((fused[0].confidence - 0.9).abs() < 1e-6);
    assert_eq!(fused[0].bbox, box_a());
    assert_eq!(fused[0].backend_source, Some(BackendType::Yolo));
}

#[test]
fn parallel_merge_keeps_disjoint_and_cross_class_detections() {
    let outputs = vec![
        output("yolo_1", BackendType::Yolo, vec![person(0.9, box_a())]),
        output(
            "dlc_2",
            BackendType::DeepLabCut,
            vec![
                person(0.6, BoundingBox::new(200.0, 200.0, 220.0, 220.0)),
                Detection::new(16, "dog", 0.7, box_b()),
            ],
        ),
    ];
    let fused = strategies::parallel_merge(&FusionConfig::default(), &outputs);
    assert_eq!(fused.len(), 3);
}

#[test]
fn parallel_merge_takes_keypoints_from_richer_member() {
    let outputs = vec![
        output("yolo_1", BackendType::Yolo, vec![person(0.9, box_a())]),
        output(
            "dlc_2",
            BackendType::DeepLabCut,
            vec![person(0.6, box_b()).with_keypoints(skeleton(5))],
        ),
    ];
    let fused = strategies::parallel_merge(&FusionConfig::default(), &outputs);
    assert_eq!(fused[0].keypoints.len(), 5);
    assert_eq!(fused[0].bbox, box_a());
}

#[test]
fn preferred_pose_source_wins_keypoint_merge() {
    let a = person(0.9, box_a()).with_keypoints(skeleton(17)).with_source(BackendType::Yolo);
    let b = person(0.6, box_b()).with_keypoints(skeleton(5)).with_source(BackendType::DeepLabCut);
    assert_eq!(strategies::merge_keypoints(&a, &b, None).len(), 17);
    assert_eq!(
        strategies::merge_keypoints(&a, &b, Some(BackendType::DeepLabCut)).len(),
        5
    );
    // Equal counts: first argument wins.
    let tied: Vec<Keypoint> = (0..17).map(|i| Keypoint::new(i as f32, 0.0, 0.8, "tied")).collect();
    let c = person(0.5, box_a()).with_keypoints(tied).with_source(BackendType::Sleap);
    assert_eq!(strategies::merge_keypoints(&c, &a, None)[0].name, "tied");
    assert_eq!(strategies::merge_keypoints(&a, &c, None)[0].name, "kp0");
}

#[test]
fn consensus_averages_agreeing_backends() {
    let config = FusionConfig {
        min_backends_agree: 2,
        ..FusionConfig::with_strategy(FusionStrategy::Consensus)
    };
    let outputs = vec![
        output("yolo_1", BackendType::Yolo, vec![person(0.9, box_a())]),
        output("dlc_2", BackendType::DeepLabCut, vec![person(0.6, box_b())]),
    ];
    let fused = strategies::consensus(&config, &outputs);
    assert_eq!(fused.len(), 1);
    assert!((fused[0].confidence - 0.75).abs() < 1e-6);
}

#[test]
fn consensus_rejects_single_reporter() {
    let config = FusionConfig {
        min_backends_agree: 2,
        ..FusionConfig::with_strategy(FusionStrategy::Consensus)
    };
    let outputs = vec![
        output("yolo_1", BackendType::Yolo, vec![person(0.95, box_a())]),
        output("dlc_2", BackendType::DeepLabCut, vec![]),
    ];
    assert!(strategies::consensus(&config, &outputs).is_empty());

    // Two detections from the same backend are still one reporter.
    let outputs = vec![output(
        "yolo_1",
        BackendType::Yolo,
        vec![person(0.95, box_a()), person(0.9, box_b())],
    )];
    assert!(strategies::consensus(&config, &outputs).is_empty());
}

#[test]
fn consensus_respects_explicit_aggregation() {
    let config = FusionConfig {
        min_backends_agree: 2,
        confidence_aggregation: Some(ConfidenceAggregation::Min),
        ..FusionConfig::with_strategy(FusionStrategy::Consensus)
    };
    let outputs = vec![
        output("yolo_1", BackendType::Yolo, vec![person(0.9, box_a())]),
        output("dlc_2", BackendType::DeepLabCut, vec![person(0.6, box_b())]),
    ];
    let fused = strategies::consensus(&config, &outputs);
    assert!((fused[0].confidence - 0.6).abs() < 1e-6);
}

#[test]
fn weighted_scales_and_clamps_confidence() {
    let mut config = FusionConfig::with_strategy(FusionStrategy::Weighted);
    config.backend_weights.insert(BackendType::Yolo, 0.5);
    config.backend_weights.insert(BackendType::Sleap, 2.0);
    let outputs = vec![
        output("yolo_1", BackendType::Yolo, vec![person(0.9, box_a())]),
        output(
            "sleap_2",
            BackendType::Sleap,
            vec![person(0.8, BoundingBox::new(300.0, 300.0, 320.0, 320.0))],
        ),
    ];
    let mut fused = strategies::weighted(&config, &outputs);
    fused.sort_by(|a, b| a.bbox.x1.total_cmp(&b.bbox.x1));
    assert!((fused[0].confidence - 0.45).abs() < 1e-6);
    assert_eq!(fused[1].confidence, 1.0);
}

#[test]
fn first_wins_uses_first_available_output() {
    let outputs = vec![
        output("sleap_1", BackendType::Sleap, vec![person(0.4, box_a())]),
        output("yolo_2", BackendType::Yolo, vec![person(0.9, box_b())]),
    ];
    let fused = strategies::first_wins(&outputs);
    assert_eq!(fused.len(), 1);
    assert_eq!(fused[0].backend_source, Some(BackendType::Sleap));
    assert!(strategies::first_wins(&[]).is_empty());
}

#[test]
fn cascade_attaches_pose_keypoints_to_detector_boxes() {
    let config = FusionConfig::with_strategy(FusionStrategy::Cascade);
    let outputs = vec![
        output(
            "yolo_1",
            BackendType::Yolo,
            vec![
                person(0.7, box_a()),
                person(0.8, BoundingBox::new(100.0, 100.0, 120.0, 140.0)),
            ],
        ),
        output(
            "dlc_2",
            BackendType::DeepLabCut,
            vec![
                person(0.9, box_b()).with_keypoints(skeleton(12)),
                person(0.5, BoundingBox::new(400.0, 10.0, 420.0, 30.0)),
            ],
        ),
    ];
    let fused = strategies::cascade(&config, &outputs);
    assert_eq!(fused.len(), 3);
    assert_eq!(fused[0].bbox, box_a());
    assert_eq!(fused[0].keypoints.len(), 12);
    assert!((fused[0].confidence - 0.9).abs() < 1e-6);
    assert!(fused[1].keypoints.is_empty());
    assert_eq!(fused[2].backend_source, Some(BackendType::DeepLabCut));
}

#[test]
fn cascade_degrades_when_a_role_is_missing() {
    let config = FusionConfig::with_strategy(FusionStrategy::Cascade);
    let pose_only = vec![output("dlc_1", BackendType::DeepLabCut, vec![person(0.5, box_a())])];
    assert_eq!(strategies::cascade(&config, &pose_only).len(), 1);
    let box_only = vec![output("yolo_1", BackendType::Yolo, vec![person(0.5, box_a())])];
    let fused = strategies::cascade(&config, &box_only);
    assert_eq!(fused.len(), 1);
    assert_eq!(fused[0].backend_source, Some(BackendType::Yolo));
}

#[test]
fn engine_runs_backends_concurrently_and_tags_sources() {
    let yolo: SharedBackend = Arc::new(Mutex::new(
        ScriptedBackend::new(BackendType::Yolo).with_detections(vec![person(0.9, box_a())]),
    ));
    let dlc: SharedBackend = Arc::new(Mutex::new(
        ScriptedBackend::new(BackendType::DeepLabCut)
            .with_detections(vec![person(0.6, box_b()).with_keypoints(skeleton(8))]),
    ));
    let engine = FusionEngine::new(FusionConfig::with_strategy(FusionStrategy::Cascade));
    let frame = argos_core::Frame::blank(64, 48).with_timestamp(42.0);
    let result = engine.process(
        &frame,
        &[("yolo_1".to_string(), yolo), ("dlc_2".to_string(), dlc)],
    );
    assert_eq!(result.fusion_strategy, "cascade");
    assert_eq!(result.backends_used, vec![BackendType::Yolo, BackendType::DeepLabCut]);
    assert_eq!(result.timestamp, 42.0);
    assert_eq!(result.detections.len(), 1);
    assert_eq!(result.detections[0].keypoints.len(), 8);
    assert_eq!(result.individual_results.len(), 2);
    assert!(result.failed_backends.is_empty());
}

#[test]
fn cascade_routes_pose_sources_through_detect_pose() {
    let backends = || -> Vec<(String, SharedBackend)> {
        let yolo: SharedBackend = Arc::new(Mutex::new(
            ScriptedBackend::new(BackendType::Yolo).with_detections(vec![person(0.9, box_a())]),
        ));
        let dlc: SharedBackend = Arc::new(Mutex::new(
            ScriptedBackend::new(BackendType::DeepLabCut)
                .with_detections(vec![person(0.6, box_b())])
                .with_pose_detections(vec![person(0.6, box_b()).with_keypoints(skeleton(6))]),
        ));
        vec![("yolo_1".to_string(), yolo), ("dlc_2".to_string(), dlc)]
    };
    let frame = argos_core::Frame::blank(64, 48);

    let cascade = FusionEngine::new(FusionConfig::with_strategy(FusionStrategy::Cascade));
    let result = cascade.process(&frame, &backends());
    assert_eq!(result.detections.len(), 1);
    assert_eq!(result.detections[0].keypoints.len(), 6);

    let merge = FusionEngine::new(FusionConfig::with_strategy(FusionStrategy::ParallelMerge));
    let result = merge.process(&frame, &backends());
    assert_eq!(result.detections.len(), 1);
    assert!(result.detections[0].keypoints.is_empty());
}
