//! Daemon configuration.
//!
//! `ArgosConfig::load` reads the TOML file named by `ARGOS_CONFIG` (a `.json`
//! file is accepted too), fills in defaults, applies `ARGOS_*` environment
//! overrides, then validates. Every field has a default, so running without a
//! file is fine.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::alerts::AlertConfig;
use crate::detect::BackendType;
use crate::fusion::FusionConfig;
use crate::pipeline::{builtin_presets, Preset};
use crate::tracker::TrackerKind;
use crate::zones::{default_zones, Zone, ZoneManager};

const DEFAULT_PRESET: &str = "home_security";
const DEFAULT_MAX_FPS: u32 = 10;
const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 2000;
const DEFAULT_SOURCE_URL: &str = "stub://camera";
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;

#[derive(Debug, Deserialize, Default)]
struct ArgosConfigFile {
    pipeline: Option<PipelineConfigFile>,
    alerts: Option<AlertConfig>,
    zones: Option<Vec<Zone>>,
    presets: Option<Vec<Preset>>,
    source: Option<SourceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    preset: Option<String>,
    max_fps: Option<u32>,
    backend_timeout_ms: Option<u64>,
    fusion: Option<FusionConfig>,
    scripted_backends: Option<Vec<BackendType>>,
    tracker: Option<TrackerKind>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ArgosConfig {
    pub pipeline: PipelineSettings,
    pub alerts: AlertConfig,
    pub zones: Vec<Zone>,
    /// Presets declared in the file, in addition to the built-ins.
    pub presets: Vec<Preset>,
    pub source: SourceSettings,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub preset: String,
    pub max_fps: u32,
    pub backend_timeout: Duration,
    /// Replaces the preset's fusion config after it is applied.
    pub fusion: Option<FusionConfig>,
    /// Backend types served by the scripted stub when no real detector is
    /// linked in.
    pub scripted_backends: Vec<BackendType>,
    /// How identities are assigned before zone checks.
    pub tracker: TrackerKind,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

impl Default for ArgosConfig {
    fn default() -> Self {
        Self::from_file(ArgosConfigFile::default())
    }
}

impl ArgosConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ARGOS_CONFIG").ok();
        match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Self::load_from(Some(Path::new(path))),
            _ => Self::load_from(None),
        }
    }

    /// Like `load`, with an explicit file instead of `ARGOS_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => ArgosConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without consulting the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: ArgosConfigFile = toml::from_str(raw).context("invalid TOML config")?;
        let cfg = Self::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ArgosConfigFile) -> Self {
        let pipeline = file.pipeline.unwrap_or_default();
        let source = file.source.unwrap_or_default();
        Self {
            pipeline: PipelineSettings {
                preset: pipeline.preset.unwrap_or_else(|| DEFAULT_PRESET.to_string()),
                max_fps: pipeline.max_fps.unwrap_or(DEFAULT_MAX_FPS),
                backend_timeout: Duration::from_millis(
                    pipeline
                        .backend_timeout_ms
                        .unwrap_or(DEFAULT_BACKEND_TIMEOUT_MS),
                ),
                fusion: pipeline.fusion,
                scripted_backends: pipeline
                    .scripted_backends
                    .unwrap_or_else(|| vec![BackendType::Yolo]),
                tracker: pipeline.tracker.unwrap_or_default(),
            },
            alerts: file.alerts.unwrap_or_default(),
            zones: file.zones.unwrap_or_else(default_zones),
            presets: file.presets.unwrap_or_default(),
            source: SourceSettings {
                url: source.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(preset) = std::env::var("ARGOS_PRESET") {
            if !preset.trim().is_empty() {
                self.pipeline.preset = preset.trim().to_string();
            }
        }
        if let Ok(fps) = std::env::var("ARGOS_MAX_FPS") {
            self.pipeline.max_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("ARGOS_MAX_FPS must be a positive integer"))?;
        }
        if let Ok(timeout) = std::env::var("ARGOS_BACKEND_TIMEOUT_MS") {
            let millis: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("ARGOS_BACKEND_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.pipeline.backend_timeout = Duration::from_millis(millis);
        }
        if let Ok(server) = std::env::var("ARGOS_NTFY_SERVER") {
            if !server.trim().is_empty() {
                self.alerts.ntfy_server = server.trim().to_string();
            }
        }
        // An empty topic is meaningful: it turns push delivery off.
        if let Ok(topic) = std::env::var("ARGOS_NTFY_TOPIC") {
            self.alerts.ntfy_topic = topic.trim().to_string();
        }
        if let Ok(classes) = std::env::var("ARGOS_ALERT_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.alerts.alert_classes = parsed;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.pipeline.max_fps == 0 {
            return Err(anyhow!("pipeline.max_fps must be greater than zero"));
        }
        if self.pipeline.backend_timeout.is_zero() {
            return Err(anyhow!("pipeline.backend_timeout_ms must be greater than zero"));
        }
        if let Some(fusion) = &self.pipeline.fusion {
            fusion.validate().context("pipeline.fusion")?;
        }
        for preset in &self.presets {
            preset
                .fusion
                .validate()
                .with_context(|| format!("preset '{}'", preset.id))?;
        }
        if self.preset(&self.pipeline.preset).is_none() {
            return Err(anyhow!("unknown preset '{}'", self.pipeline.preset));
        }
        self.alerts.validate()?;
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        self.zone_manager()?;
        Ok(())
    }

    /// Look up a preset among the file's presets, then the built-ins.
    pub fn preset(&self, preset_id: &str) -> Option<Preset> {
        self.presets
            .iter()
            .find(|p| p.id == preset_id)
            .cloned()
            .or_else(|| builtin_presets().into_iter().find(|p| p.id == preset_id))
    }

    /// Zone manager holding the configured zones.
    pub fn zone_manager(&self) -> Result<ZoneManager> {
        let mut manager = ZoneManager::new();
        for zone in &self.zones {
            manager
                .add_zone(zone.clone())
                .with_context(|| format!("zone '{}'", zone.id))?;
        }
        Ok(manager)
    }
}

fn read_config_file(path: &Path) -> Result<ArgosConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))?
    } else {
        toml::from_str(&raw).with_context(|| format!("invalid config file {}", path.display()))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
