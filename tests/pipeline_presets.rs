use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use argos_core::pipeline::BackendStatus;
use argos_core::{
    ArgosError, BackendFactory, BackendSpec, BackendState, BackendType, Frame, FusionConfig,
    FusionStrategy, PipelineManager, Preset, ScriptedBackend,
};

fn scripted_factory() -> BackendFactory {
    let mut factory = BackendFactory::with_defaults();
    for backend_type in [BackendType::Yolo, BackendType::DeepLabCut, BackendType::Sleap] {
        factory.register_scripted(backend_type);
    }
    factory
}

/// Backend state with instance ids stripped.
fn shape(pm: &PipelineManager) -> (Vec<(BackendType, String, bool, BackendState)>, FusionConfig) {
    let backends = pm
        .status()
        .backends
        .into_iter()
        .map(|b: BackendStatus| (b.backend_type, b.model_name, b.enabled, b.state))
        .collect();
    (backends, pm.fusion_config().clone())
}

#[test]
fn applying_a_preset_twice_is_idempotent() {
    let mut pm = PipelineManager::new(scripted_factory());
    pm.apply_preset("pet_monitor").unwrap();
    let once = shape(&pm);
    let first_ids: Vec<String> = pm.backends().iter().map(|b| b.backend_id.clone()).collect();

    pm.apply_preset("pet_monitor").unwrap();
    let twice = shape(&pm);
    let second_ids: Vec<String> = pm.backends().iter().map(|b| b.backend_id.clone()).collect();

    assert_eq!(once, twice);
    assert_eq!(pm.active_preset(), Some("pet_monitor"));
    assert_eq!(once.1.strategy, FusionStrategy::Cascade);
    assert_ne!(first_ids, second_ids);
}

#[test]
fn preset_switch_releases_previous_backends() {
    let released = Arc::new(Mutex::new(Vec::new()));
    let mut factory = scripted_factory();
    let sink = released.clone();
    factory.register(BackendType::Yolo, move |_| {
        let backend = ScriptedBackend::new(BackendType::Yolo);
        sink.lock().unwrap().push(backend.release_flag());
        Ok(Box::new(backend))
    });

    let mut pm = PipelineManager::new(factory);
    pm.apply_preset("home_security").unwrap();
    assert_eq!(released.lock().unwrap().len(), 1);
    assert!(!released.lock().unwrap()[0].load(Ordering::SeqCst));

    pm.apply_preset("lab_research").unwrap();
    assert!(released.lock().unwrap()[0].load(Ordering::SeqCst));
    assert_eq!(pm.backends().len(), 1);
    assert_eq!(pm.backends()[0].backend_type, BackendType::Sleap);
}

#[test]
fn preset_switch_does_not_wait_for_a_hung_backend() {
    let released = Arc::new(Mutex::new(Vec::new()));
    let mut factory = scripted_factory();
    let sink = released.clone();
    factory.register(BackendType::Yolo, move |_| {
        let backend =
            ScriptedBackend::new(BackendType::Yolo).with_delay(Duration::from_millis(1500));
        sink.lock().unwrap().push(backend.release_flag());
        Ok(Box::new(backend))
    });

    let mut pm = PipelineManager::new(factory).with_backend_timeout(Duration::from_millis(100));
    pm.apply_preset("home_security").unwrap();
    let result = pm.process_frame(&Frame::blank(16, 16));
    assert_eq!(result.failed_backends, vec!["yolo_1".to_string()]);

    // yolo_1 is still inside detect on its worker thread.
    let start = Instant::now();
    pm.apply_preset("lab_research").unwrap();
    assert!(start.elapsed() < Duration::from_millis(1000));
    assert_eq!(pm.backends()[0].backend_type, BackendType::Sleap);

    let flag = released.lock().unwrap()[0].clone();
    assert!(!flag.load(Ordering::SeqCst));
    let deadline = Instant::now() + Duration::from_secs(5);
    while !flag.load(Ordering::SeqCst) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert!(flag.load(Ordering::SeqCst));
}

#[test]
fn preset_backends_without_constructor_are_skipped() {
    // Only the stub and (optionally) tract are registered by default.
    let mut pm = PipelineManager::new(BackendFactory::with_defaults());
    pm.apply_preset("wildlife").unwrap();
    assert!(pm.backends().is_empty());
    assert_eq!(pm.active_preset(), Some("wildlife"));
    assert_eq!(pm.fusion_config().prefer_pose_from, Some(BackendType::DeepLabCut));
    assert_eq!(pm.combined_capabilities().max_fps, 0);
}

#[test]
fn unknown_preset_is_rejected() {
    let mut pm = PipelineManager::new(scripted_factory());
    let err = pm.apply_preset("nope").unwrap_err();
    assert!(matches!(err, ArgosError::PresetNotFound(ref id) if id == "nope"));
    assert!(pm.active_preset().is_none());
}

#[test]
fn registered_preset_can_be_applied() {
    let mut pm = PipelineManager::new(scripted_factory());
    let mut spec = BackendSpec::new(BackendType::Stub, "");
    spec.config = serde_json::json!({
        "detections": [{
            "class_id": 0,
            "class_name": "person",
            "confidence": 0.8,
            "bbox": {"x1": 0.0, "y1": 0.0, "x2": 10.0, "y2": 10.0}
        }]
    });
    let preset = Preset {
        id: "porch".to_string(),
        name: "Porch".to_string(),
        description: String::new(),
        backends: vec![spec],
        fusion: FusionConfig::with_strategy(FusionStrategy::FirstWins),
        features: Default::default(),
    };
    pm.register_preset(preset).unwrap();
    pm.apply_preset("porch").unwrap();

    let result = pm.process_frame(&Frame::blank(32, 32));
    assert_eq!(result.detections.len(), 1);
    assert_eq!(result.backends_used, vec![BackendType::Stub]);
    assert_eq!(pm.backends()[0].state, BackendState::Registered);
}

#[test]
fn remove_backend_releases_and_forgets_it() {
    let mut pm = PipelineManager::new(scripted_factory());
    let id = pm
        .add_backend(BackendType::Sleap, "custom_trained", serde_json::Value::Null)
        .unwrap();
    pm.remove_backend(&id).unwrap();
    assert!(pm.backend(&id).is_none());
    assert!(matches!(
        pm.remove_backend(&id),
        Err(ArgosError::BackendNotFound(_))
    ));
}

#[test]
fn disabled_backend_skipped_by_process_frame() {
    let mut pm = PipelineManager::new(scripted_factory());
    pm.update_fusion_config(FusionConfig::with_strategy(FusionStrategy::ParallelMerge))
        .unwrap();
    let person = serde_json::json!({
        "detections": [{
            "class_id": 0,
            "class_name": "person",
            "confidence": 0.7,
            "bbox": {"x1": 0.0, "y1": 0.0, "x2": 10.0, "y2": 10.0}
        }]
    });
    let a = pm.add_backend(BackendType::Yolo, "", person.clone()).unwrap();
    let _b = pm.add_backend(BackendType::Sleap, "", person).unwrap();
    pm.enable_backend(&a, false).unwrap();

    let result = pm.process_frame(&Frame::blank(16, 16));
    assert_eq!(result.backends_used, vec![BackendType::Sleap]);
    assert_eq!(result.detections.len(), 1);
}
