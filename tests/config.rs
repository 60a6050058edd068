use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use argos_core::config::ArgosConfig;
use argos_core::{BackendType, FusionStrategy, TrackerKind, ZoneType};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "ARGOS_CONFIG",
        "ARGOS_PRESET",
        "ARGOS_MAX_FPS",
        "ARGOS_NTFY_TOPIC",
        "ARGOS_NTFY_SERVER",
        "ARGOS_ALERT_CLASSES",
        "ARGOS_BACKEND_TIMEOUT_MS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r##"
        [pipeline]
        preset = "pet_monitor"
        max_fps = 12
        backend_timeout_ms = 750
        scripted_backends = ["yolo", "deeplabcut"]
        tracker = "passthrough"

        [pipeline.fusion]
        strategy = "consensus"
        min_backends_agree = 2

        [alerts]
        min_frames_in_zone = 5
        cooldown_seconds = 60.0
        alert_classes = ["person"]

        [source]
        url = "stub://backyard"
        width = 320
        height = 240

        [[zones]]
        id = "gate"
        name = "Gate"
        type = "danger"
        polygon = [[0.0, 0.0], [0.5, 0.0], [0.5, 0.5]]
        color = "#ef4444"
        "##,
    );

    std::env::set_var("ARGOS_CONFIG", file.path());
    std::env::set_var("ARGOS_MAX_FPS", "5");
    std::env::set_var("ARGOS_ALERT_CLASSES", "person, dog");
    std::env::set_var("ARGOS_NTFY_TOPIC", "backyard-alerts");

    let cfg = ArgosConfig::load().expect("load config");

    assert_eq!(cfg.pipeline.preset, "pet_monitor");
    assert_eq!(cfg.pipeline.max_fps, 5);
    assert_eq!(cfg.pipeline.backend_timeout, Duration::from_millis(750));
    assert_eq!(
        cfg.pipeline.scripted_backends,
        vec![BackendType::Yolo, BackendType::DeepLabCut]
    );
    assert_eq!(cfg.pipeline.tracker, TrackerKind::Passthrough);
    let fusion = cfg.pipeline.fusion.as_ref().unwrap();
    assert_eq!(fusion.strategy, FusionStrategy::Consensus);
    assert_eq!(fusion.min_backends_agree, 2);
    assert_eq!(fusion.iou_threshold, 0.5);
    assert_eq!(cfg.alerts.min_frames_in_zone, 5);
    assert_eq!(cfg.alerts.alert_classes, vec!["person", "dog"]);
    assert_eq!(cfg.alerts.ntfy_topic, "backyard-alerts");
    assert_eq!(cfg.alerts.ntfy_server, "https://ntfy.sh");
    assert_eq!(cfg.source.url, "stub://backyard");
    assert_eq!((cfg.source.width, cfg.source.height), (320, 240));
    assert_eq!(cfg.zones.len(), 1);
    assert_eq!(cfg.zones[0].zone_type, ZoneType::Danger);
    assert!(cfg.zone_manager().unwrap().zone("gate").is_some());

    clear_env();
}

#[test]
fn defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ArgosConfig::load().expect("load defaults");
    assert_eq!(cfg.pipeline.preset, "home_security");
    assert_eq!(cfg.pipeline.max_fps, 10);
    assert_eq!(cfg.alerts.min_frames_in_zone, 3);
    assert_eq!(cfg.zones.len(), 2);
    assert_eq!(cfg.source.url, "stub://camera");
    assert_eq!(cfg.pipeline.tracker, TrackerKind::Iou);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("ARGOS_MAX_FPS", "fast");
    assert!(ArgosConfig::load().is_err());
    std::env::set_var("ARGOS_MAX_FPS", "0");
    assert!(ArgosConfig::load().is_err());
    clear_env();

    std::env::set_var("ARGOS_PRESET", "does_not_exist");
    assert!(ArgosConfig::load().is_err());
    clear_env();

    let file = write_config(
        r#"
        [[zones]]
        id = "line"
        name = "Line"
        type = "warning"
        polygon = [[0.0, 0.0], [1.0, 1.0]]
        "#,
    );
    std::env::set_var("ARGOS_CONFIG", file.path());
    let err = ArgosConfig::load().unwrap_err();
    assert!(format!("{:#}", err).contains("line"));

    clear_env();
}

#[test]
fn reads_json_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".json")
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(
        &mut file,
        br#"{"pipeline": {"preset": "industrial"}, "alerts": {"ntfy_topic": ""}}"#,
    )
    .expect("write config");

    let cfg = ArgosConfig::load_from(Some(file.path())).expect("load json");
    assert_eq!(cfg.pipeline.preset, "industrial");
    assert!(cfg.alerts.ntfy_topic.is_empty());

    clear_env();
}
