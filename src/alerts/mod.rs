//! Alert notifier.
//!
//! Turns zone presence events into alerts. An alert needs the same identity
//! to stay in a zone for `min_frames_in_zone` consecutive frames, and the
//! (class, zone) pair must be outside its cooldown window. Cooldowns are
//! measured on event timestamps, so replayed footage debounces the same way
//! live footage does.
//!
//! Continued occupancy re-alerts once the cooldown elapses; it does not stay
//! silent until the identity leaves.

mod delivery;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::{ArgosError, Result};
use crate::zones::{ZoneEvent, ZoneEventKind, ZoneType};

#[cfg(feature = "notify-ntfy")]
pub use delivery::NtfySink;
pub use delivery::{AlertDispatcher, AlertSink, LogSink, PushMessage};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl AlertPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPriority::Low => "low",
            AlertPriority::Normal => "normal",
            AlertPriority::High => "high",
            AlertPriority::Urgent => "urgent",
        }
    }

    /// ntfy priority header value (2..=5).
    pub fn ntfy_level(&self) -> u8 {
        match self {
            AlertPriority::Low => 2,
            AlertPriority::Normal => 3,
            AlertPriority::High => 4,
            AlertPriority::Urgent => 5,
        }
    }

    pub fn for_zone(zone_type: ZoneType) -> Self {
        match zone_type {
            ZoneType::Danger => AlertPriority::Urgent,
            ZoneType::Warning => AlertPriority::High,
            ZoneType::Interest => AlertPriority::Normal,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub title: String,
    pub message: String,
    pub priority: AlertPriority,
    pub zone_type: ZoneType,
    pub zone_id: String,
    pub tracker_id: u64,
    pub class_name: String,
    pub timestamp: f64,
    pub sent: bool,
}

impl Alert {
    /// `sequence` keeps ids unique when two alerts share a second.
    fn from_event(event: &ZoneEvent, sequence: u64) -> Self {
        let title = match event.zone_type {
            ZoneType::Danger => "CRITICAL ALERT",
            ZoneType::Warning => "Warning",
            ZoneType::Interest => "Notice",
        };
        Self {
            id: format!(
                "{}-{}-{}-{}",
                event.tracker_id, event.zone_id, event.timestamp as i64, sequence
            ),
            title: title.to_string(),
            message: format!("{} detected in {}", capitalize(&event.class_name), event.zone_name),
            priority: AlertPriority::for_zone(event.zone_type),
            zone_type: event.zone_type,
            zone_id: event.zone_id.clone(),
            tracker_id: event.tracker_id,
            class_name: event.class_name.clone(),
            timestamp: event.timestamp,
            sent: false,
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    pub ntfy_server: String,
    /// Empty disables push delivery; alerts are still recorded.
    pub ntfy_topic: String,
    pub min_frames_in_zone: u32,
    pub cooldown_seconds: f64,
    /// Classes that may raise alerts, matched case-insensitively.
    pub alert_classes: Vec<String>,
    pub history_limit: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ntfy_server: "https://ntfy.sh".to_string(),
            ntfy_topic: "argos-alerts".to_string(),
            min_frames_in_zone: 3,
            cooldown_seconds: 30.0,
            alert_classes: ["person", "dog", "cat", "child"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            history_limit: 100,
        }
    }
}

impl AlertConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_frames_in_zone == 0 {
            return Err(ArgosError::Config(
                "alerts.min_frames_in_zone must be at least 1".to_string(),
            ));
        }
        if !self.cooldown_seconds.is_finite() || self.cooldown_seconds < 0.0 {
            return Err(ArgosError::Config(format!(
                "alerts.cooldown_seconds must be a non-negative number, got {}",
                self.cooldown_seconds
            )));
        }
        if self.history_limit == 0 {
            return Err(ArgosError::Config(
                "alerts.history_limit must be at least 1".to_string(),
            ));
        }
        if !self.ntfy_topic.is_empty() && self.ntfy_server.trim().is_empty() {
            return Err(ArgosError::Config(
                "alerts.ntfy_server is required when a topic is set".to_string(),
            ));
        }
        Ok(())
    }

    fn allows(&self, class_name: &str) -> bool {
        self.alert_classes
            .iter()
            .any(|c| c.eq_ignore_ascii_case(class_name))
    }
}

pub struct AlertNotifier {
    config: AlertConfig,
    /// (tracker id, zone id) -> consecutive frames in zone.
    frame_counts: HashMap<(u64, String), u32>,
    /// (lowercased class, zone id) -> timestamp of the last alert.
    last_alerts: HashMap<(String, String), f64>,
    history: Arc<Mutex<VecDeque<Alert>>>,
    /// Monotonic over the notifier's lifetime; never reset.
    next_sequence: u64,
    dispatcher: Option<AlertDispatcher>,
}

impl AlertNotifier {
    /// Notifier without delivery. Alerts are produced and recorded only.
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            frame_counts: HashMap::new(),
            last_alerts: HashMap::new(),
            history: Arc::new(Mutex::new(VecDeque::new())),
            next_sequence: 1,
            dispatcher: None,
        }
    }

    /// Attach a delivery sink, replacing any previous one.
    pub fn with_sink(mut self, sink: Box<dyn AlertSink>) -> Result<Self> {
        self.dispatcher = Some(AlertDispatcher::spawn(sink, self.history.clone())?);
        Ok(self)
    }

    /// Sink implied by the config: ntfy when a topic is set and the
    /// `notify-ntfy` feature is on, otherwise the log.
    pub fn default_sink(config: &AlertConfig) -> Box<dyn AlertSink> {
        if config.ntfy_topic.is_empty() {
            return Box::new(LogSink);
        }
        ntfy_sink(config)
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    pub fn update_config(&mut self, config: AlertConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        self.trim_history();
        Ok(())
    }

    /// Run one frame's zone events through the debounce policy.
    pub fn process(&mut self, events: &[ZoneEvent]) -> Vec<Alert> {
        if !self.config.enabled {
            return Vec::new();
        }

        let mut alerts = Vec::new();
        for event in events {
            if !event.kind.is_presence() || !self.config.allows(&event.class_name) {
                continue;
            }

            let key = (event.tracker_id, event.zone_id.clone());
            let count = match event.kind {
                ZoneEventKind::Enter => {
                    self.frame_counts.insert(key, 1);
                    1
                }
                _ => {
                    let count = self.frame_counts.entry(key).or_insert(0);
                    *count += 1;
                    *count
                }
            };
            if count < self.config.min_frames_in_zone {
                continue;
            }

            let cooldown_key = (event.class_name.to_lowercase(), event.zone_id.clone());
            if self.in_cooldown(&cooldown_key, event.timestamp) {
                continue;
            }

            let alert = Alert::from_event(event, self.next_sequence);
            self.next_sequence += 1;
            log::info!(
                "alert {}: {} ({} in {})",
                alert.id,
                alert.message,
                alert.priority.as_str(),
                event.zone_id
            );
            self.last_alerts.insert(cooldown_key, event.timestamp);
            self.record(alert.clone());
            alerts.push(alert);
        }

        // Counters only survive while their identity/zone pair keeps
        // showing up in the event stream.
        self.frame_counts.retain(|(tracker_id, zone_id), _| {
            events
                .iter()
                .any(|e| e.tracker_id == *tracker_id && &e.zone_id == zone_id)
        });
        if let Some(now) = events.iter().map(|e| e.timestamp).reduce(f64::max) {
            let cooldown = self.config.cooldown_seconds;
            self.last_alerts.retain(|_, last| now - *last < cooldown);
        }

        alerts
    }

    fn in_cooldown(&self, key: &(String, String), now: f64) -> bool {
        self.last_alerts
            .get(key)
            .map(|last| now - last < self.config.cooldown_seconds)
            .unwrap_or(false)
    }

    fn record(&self, alert: Alert) {
        let mut history = lock_history(&self.history);
        history.push_back(alert);
        while history.len() > self.config.history_limit {
            history.pop_front();
        }
    }

    fn trim_history(&self) {
        let mut history = lock_history(&self.history);
        while history.len() > self.config.history_limit {
            history.pop_front();
        }
    }

    /// Hand alerts to the delivery worker without waiting. Returns how many
    /// were queued.
    pub fn dispatch(&self, alerts: &[Alert]) -> usize {
        let Some(dispatcher) = &self.dispatcher else {
            return 0;
        };
        alerts
            .iter()
            .filter(|alert| dispatcher.submit((*alert).clone()))
            .count()
    }

    /// The last `limit` alerts, oldest first.
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        let history = lock_history(&self.history);
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Forget history and all debounce state.
    pub fn clear_history(&mut self) {
        lock_history(&self.history).clear();
        self.frame_counts.clear();
        self.last_alerts.clear();
    }

    /// Stop the delivery worker after it drains.
    pub fn shutdown(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.stop();
        }
    }
}

#[cfg(feature = "notify-ntfy")]
fn ntfy_sink(config: &AlertConfig) -> Box<dyn AlertSink> {
    Box::new(NtfySink::new(&config.ntfy_server, &config.ntfy_topic))
}

#[cfg(not(feature = "notify-ntfy"))]
fn ntfy_sink(_config: &AlertConfig) -> Box<dyn AlertSink> {
    log::warn!("ntfy topic set but built without notify-ntfy; logging alerts instead");
    Box::new(LogSink)
}

fn lock_history(history: &Mutex<VecDeque<Alert>>) -> std::sync::MutexGuard<'_, VecDeque<Alert>> {
    match history.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
