//! Error taxonomy for the detection core.
//!
//! Backend failures never escape a frame: the fusion engine converts them into
//! exclusions. Configuration errors are returned before any state changes.

use thiserror::Error;

use crate::detect::BackendType;

pub type Result<T> = std::result::Result<T, ArgosError>;

#[derive(Debug, Error)]
pub enum ArgosError {
    /// A backend raised an error while loading or detecting.
    #[error("backend {backend_id} failed: {reason}")]
    BackendFailure { backend_id: String, reason: String },

    /// A backend did not answer within the per-frame deadline.
    #[error("backend {backend_id} timed out after {timeout_ms} ms")]
    BackendTimeout { backend_id: String, timeout_ms: u64 },

    #[error("backend type '{0}' has no registered constructor")]
    UnsupportedBackend(BackendType),

    #[error("preset '{0}' not found")]
    PresetNotFound(String),

    #[error("backend '{0}' not found")]
    BackendNotFound(String),

    /// Polygon rejected at upsert time; the previous zone (if any) is kept.
    #[error("zone '{zone_id}' has invalid geometry: {reason}")]
    InvalidZoneGeometry { zone_id: String, reason: String },

    #[error("zone '{zone_id}' is invalid: {reason}")]
    InvalidZone { zone_id: String, reason: String },

    #[error("alert delivery failed: {0}")]
    AlertDelivery(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ArgosError {
    pub(crate) fn backend_failure(backend_id: &str, reason: impl ToString) -> Self {
        Self::BackendFailure {
            backend_id: backend_id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn geometry(zone_id: &str, reason: impl ToString) -> Self {
        Self::InvalidZoneGeometry {
            zone_id: zone_id.to_string(),
            reason: reason.to_string(),
        }
    }
}
