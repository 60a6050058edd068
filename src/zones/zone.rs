use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{ArgosError, Result};

pub const DEFAULT_ZONE_COLOR: &str = "#f59e0b";

/// Zone severity. Ordered: `Interest < Warning < Danger`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneType {
    Interest,
    Warning,
    Danger,
}

impl ZoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneType::Interest => "interest",
            ZoneType::Warning => "warning",
            ZoneType::Danger => "danger",
        }
    }
}

impl fmt::Display for ZoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneType {
    type Err = ArgosError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "interest" => Ok(ZoneType::Interest),
            "warning" => Ok(ZoneType::Warning),
            "danger" => Ok(ZoneType::Danger),
            other => Err(ArgosError::Config(format!("unknown zone type '{}'", other))),
        }
    }
}

/// A user-defined polygonal region in normalized (0..=1) frame coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub zone_type: ZoneType,
    /// Ordered vertices; the ring is closed implicitly.
    pub polygon: Vec<(f64, f64)>,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_color() -> String {
    DEFAULT_ZONE_COLOR.to_string()
}

fn default_enabled() -> bool {
    true
}

impl Zone {
    pub fn new(id: &str, name: &str, zone_type: ZoneType, polygon: Vec<(f64, f64)>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            zone_type,
            polygon,
            color: default_color(),
            enabled: true,
        }
    }

    pub fn with_color(mut self, color: &str) -> Self {
        self.color = color.to_string();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Checks everything except geometry: id, name and color.
    pub(crate) fn validate_fields(&self) -> Result<()> {
        static ZONE_ID_RE: OnceLock<std::result::Result<regex::Regex, regex::Error>> =
            OnceLock::new();
        static COLOR_RE: OnceLock<std::result::Result<regex::Regex, regex::Error>> =
            OnceLock::new();

        let id_re = ZONE_ID_RE
            .get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9:_-]{1,64}$"))
            .as_ref()
            .map_err(|e| invalid(&self.id, e))?;
        if !id_re.is_match(&self.id) {
            return Err(invalid(
                &self.id,
                "id must be 1..64 characters of [A-Za-z0-9:_-]",
            ));
        }
        if self.name.trim().is_empty() {
            return Err(invalid(&self.id, "name must not be empty"));
        }

        let color_re = COLOR_RE
            .get_or_init(|| regex::Regex::new(r"^#[0-9A-Fa-f]{6}$"))
            .as_ref()
            .map_err(|e| invalid(&self.id, e))?;
        if !color_re.is_match(&self.color) {
            return Err(invalid(
                &self.id,
                format!("color must be #rrggbb, got '{}'", self.color),
            ));
        }
        Ok(())
    }
}

fn invalid(zone_id: &str, reason: impl ToString) -> ArgosError {
    ArgosError::InvalidZone {
        zone_id: zone_id.to_string(),
        reason: reason.to_string(),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneEventKind {
    Enter,
    Inside,
    Exit,
}

impl ZoneEventKind {
    /// Enter and inside count as presence; exit does not.
    pub fn is_presence(&self) -> bool {
        matches!(self, ZoneEventKind::Enter | ZoneEventKind::Inside)
    }
}

/// A tracked identity's transition relative to one zone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoneEvent {
    pub tracker_id: u64,
    pub class_name: String,
    pub zone_id: String,
    pub zone_name: String,
    pub zone_type: ZoneType,
    #[serde(rename = "event_type")]
    pub kind: ZoneEventKind,
    pub timestamp: f64,
}

/// Sample layout for a pool camera: a warning strip along the edge and a
/// danger area over the water.
pub fn default_zones() -> Vec<Zone> {
    vec![
        Zone::new(
            "pool-edge",
            "Pool Edge",
            ZoneType::Warning,
            vec![(0.1, 0.35), (0.9, 0.35), (0.9, 0.45), (0.1, 0.45)],
        ),
        Zone::new(
            "pool-water",
            "In the Water",
            ZoneType::Danger,
            vec![(0.1, 0.45), (0.9, 0.45), (0.9, 0.85), (0.1, 0.85)],
        )
        .with_color("#ef4444"),
    ]
}
