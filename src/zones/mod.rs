//! Zone manager: geofencing of tracked identities.
//!
//! Each frame, every tracked object's bottom-center point is tested against
//! the enabled zones and compared with the zones it occupied on the previous
//! frame. The differences become `enter`, `inside` and `exit` events.

mod geometry;
mod zone;

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::tracker::TrackedObject;

pub use geometry::PreparedPolygon;
pub use zone::{default_zones, Zone, ZoneEvent, ZoneEventKind, ZoneType, DEFAULT_ZONE_COLOR};

struct ZoneEntry {
    zone: Zone,
    polygon: PreparedPolygon,
}

/// Zones an identity occupied on the last processed frame.
#[derive(Clone, Debug)]
struct Membership {
    class_name: String,
    zones: BTreeSet<String>,
}

#[derive(Default)]
pub struct ZoneManager {
    zones: Vec<ZoneEntry>,
    membership: BTreeMap<u64, Membership>,
}

impl ZoneManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager preloaded with `default_zones()`.
    pub fn with_default_zones() -> Self {
        let mut manager = Self::new();
        for zone in default_zones() {
            if let Err(err) = manager.add_zone(zone) {
                log::warn!("skipping default zone: {}", err);
            }
        }
        manager
    }

    /// Insert or replace a zone by id.
    ///
    /// Invalid zones are rejected and any existing zone with the same id is
    /// kept as it was.
    pub fn add_zone(&mut self, zone: Zone) -> Result<()> {
        zone.validate_fields()?;
        let polygon = PreparedPolygon::new(&zone.id, &zone.polygon)?;
        match self.zones.iter_mut().find(|e| e.zone.id == zone.id) {
            Some(entry) => {
                log::info!("updated zone {} ({})", zone.id, zone.zone_type);
                *entry = ZoneEntry { zone, polygon };
            }
            None => {
                log::info!("added zone {} ({})", zone.id, zone.zone_type);
                self.zones.push(ZoneEntry { zone, polygon });
            }
        }
        Ok(())
    }

    /// Returns false when no zone had that id.
    pub fn remove_zone(&mut self, zone_id: &str) -> bool {
        let before = self.zones.len();
        self.zones.retain(|e| e.zone.id != zone_id);
        let removed = self.zones.len() != before;
        if removed {
            log::info!("removed zone {}", zone_id);
        }
        removed
    }

    /// Drop every zone and all membership state.
    pub fn clear(&mut self) {
        self.zones.clear();
        self.membership.clear();
    }

    /// Zones in insertion order.
    pub fn zones(&self) -> Vec<Zone> {
        self.zones.iter().map(|e| e.zone.clone()).collect()
    }

    pub fn zone(&self, zone_id: &str) -> Option<&Zone> {
        self.entry(zone_id).map(|e| &e.zone)
    }

    fn entry(&self, zone_id: &str) -> Option<&ZoneEntry> {
        self.zones.iter().find(|e| e.zone.id == zone_id)
    }

    /// Enabled zones containing the pixel point `(x, y)` of a
    /// `frame_width` x `frame_height` frame.
    pub fn check_point(&self, x: f32, y: f32, frame_width: u32, frame_height: u32) -> Vec<&Zone> {
        if frame_width == 0 || frame_height == 0 {
            return Vec::new();
        }
        let nx = x as f64 / frame_width as f64;
        let ny = y as f64 / frame_height as f64;
        self.zones
            .iter()
            .filter(|e| e.zone.enabled && e.polygon.contains(nx, ny))
            .map(|e| &e.zone)
            .collect()
    }

    /// Diff this frame's zone occupancy against the previous frame's.
    ///
    /// Identities seen last frame but missing now exit every previous zone
    /// that still exists, then are forgotten. Exits for deleted zones are
    /// suppressed.
    pub fn check_objects(
        &mut self,
        objects: &[TrackedObject],
        frame_width: u32,
        frame_height: u32,
        timestamp: f64,
    ) -> Vec<ZoneEvent> {
        let mut events = Vec::new();
        let mut current: BTreeMap<u64, Membership> = BTreeMap::new();
        let empty = BTreeSet::new();

        for obj in objects {
            let (x, y) = obj.bottom_center;
            let now: BTreeSet<String> = self
                .check_point(x, y, frame_width, frame_height)
                .into_iter()
                .map(|z| z.id.clone())
                .collect();
            let before = self
                .membership
                .get(&obj.tracker_id)
                .map(|m| &m.zones)
                .unwrap_or(&empty);

            for zone_id in now.difference(before) {
                self.push_event(&mut events, obj.tracker_id, &obj.class_name, zone_id, ZoneEventKind::Enter, timestamp);
            }
            for zone_id in now.intersection(before) {
                self.push_event(&mut events, obj.tracker_id, &obj.class_name, zone_id, ZoneEventKind::Inside, timestamp);
            }
            for zone_id in before.difference(&now) {
                self.push_event(&mut events, obj.tracker_id, &obj.class_name, zone_id, ZoneEventKind::Exit, timestamp);
            }

            current.insert(
                obj.tracker_id,
                Membership {
                    class_name: obj.class_name.clone(),
                    zones: now,
                },
            );
        }

        for (tracker_id, previous) in &self.membership {
            if current.contains_key(tracker_id) {
                continue;
            }
            for zone_id in &previous.zones {
                self.push_event(&mut events, *tracker_id, &previous.class_name, zone_id, ZoneEventKind::Exit, timestamp);
            }
        }

        self.membership = current;
        events
    }

    /// Builds an event unless the zone no longer exists.
    fn push_event(
        &self,
        events: &mut Vec<ZoneEvent>,
        tracker_id: u64,
        class_name: &str,
        zone_id: &str,
        kind: ZoneEventKind,
        timestamp: f64,
    ) {
        if let Some(entry) = self.entry(zone_id) {
            events.push(ZoneEvent {
                tracker_id,
                class_name: class_name.to_string(),
                zone_id: zone_id.to_string(),
                zone_name: entry.zone.name.clone(),
                zone_type: entry.zone.zone_type,
                kind,
                timestamp,
            });
        }
    }

    /// Identities currently tracked inside at least one zone.
    pub fn occupied(&self) -> usize {
        self.membership.values().filter(|m| !m.zones.is_empty()).count()
    }
}

/// Presence events (enter/inside) in zones of `severity` or worse.
pub fn events_at_least(events: &[ZoneEvent], severity: ZoneType) -> Vec<ZoneEvent> {
    events
        .iter()
        .filter(|e| e.kind.is_presence() && e.zone_type >= severity)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};

    fn object(tracker_id: u64, foot_x: f32, foot_y: f32) -> TrackedObject {
        let det = Detection::new(
            0,
            "person",
            0.9,
            BoundingBox::new(foot_x - 5.0, foot_y - 20.0, foot_x + 5.0, foot_y),
        );
        TrackedObject::from_detection(tracker_id, &det)
    }

    fn manager_with_square(zone_type: ZoneType) -> ZoneManager {
        let mut zm = ZoneManager::new();
        zm.add_zone(Zone::new(
            "z1",
            "Square",
            zone_type,
            vec![(0.2, 0.2), (0.8, 0.2), (0.8, 0.8), (0.2, 0.8)],
        ))
        .unwrap();
        zm
    }

    fn kinds(events: &[ZoneEvent]) -> Vec<ZoneEventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn enter_inside_exit_sequence() {
        let mut zm = manager_with_square(ZoneType::Danger);
        let e1 = zm.check_objects(&[object(1, 50.0, 50.0)], 100, 100, 1.0);
        assert_eq!(kinds(&e1), vec![ZoneEventKind::Enter]);
        let e2 = zm.check_objects(&[object(1, 55.0, 50.0)], 100, 100, 2.0);
        assert_eq!(kinds(&e2), vec![ZoneEventKind::Inside]);
        let e3 = zm.check_objects(&[object(1, 95.0, 50.0)], 100, 100, 3.0);
        assert_eq!(kinds(&e3), vec![ZoneEventKind::Exit]);
        assert_eq!(e3[0].zone_name, "Square");
        assert_eq!(e3[0].timestamp, 3.0);
    }

    #[test]
    fn vanished_identity_exits_then_is_forgotten() {
        let mut zm = manager_with_square(ZoneType::Warning);
        zm.check_objects(&[object(4, 50.0, 50.0)], 100, 100, 1.0);
        assert_eq!(zm.occupied(), 1);
        let events = zm.check_objects(&[], 100, 100, 2.0);
        assert_eq!(kinds(&events), vec![ZoneEventKind::Exit]);
        assert_eq!(events[0].tracker_id, 4);
        assert_eq!(events[0].class_name, "person");
        assert!(zm.check_objects(&[], 100, 100, 3.0).is_empty());
        assert_eq!(zm.occupied(), 0);
    }

    #[test]
    fn exit_suppressed_for_deleted_zone() {
        let mut zm = manager_with_square(ZoneType::Warning);
        zm.check_objects(&[object(1, 50.0, 50.0)], 100, 100, 1.0);
        assert!(zm.remove_zone("z1"));
        assert!(zm.check_objects(&[object(1, 50.0, 50.0)], 100, 100, 2.0).is_empty());
        assert!(!zm.remove_zone("z1"));
    }

    #[test]
    fn invalid_update_keeps_previous_zone() {
        let mut zm = manager_with_square(ZoneType::Warning);
        let err = zm
            .add_zone(Zone::new("z1", "Broken", ZoneType::Danger, vec![(0.0, 0.0), (1.0, 1.0)]))
            .unwrap_err();
        assert!(matches!(err, crate::ArgosError::InvalidZoneGeometry { .. }));
        let zone = zm.zone("z1").unwrap();
        assert_eq!(zone.name, "Square");
        assert_eq!(zone.zone_type, ZoneType::Warning);
    }

    #[test]
    fn upsert_replaces_in_place() {
        let mut zm = manager_with_square(ZoneType::Warning);
        zm.add_zone(Zone::new("z2", "Other", ZoneType::Interest, vec![(0.0, 0.0), (0.1, 0.0), (0.1, 0.1)]))
            .unwrap();
        zm.add_zone(Zone::new(
            "z1",
            "Renamed",
            ZoneType::Danger,
            vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)],
        ))
        .unwrap();
        let ids: Vec<String> = zm.zones().into_iter().map(|z| z.id).collect();
        assert_eq!(ids, vec!["z1".to_string(), "z2".to_string()]);
        assert_eq!(zm.zone("z1").unwrap().name, "Renamed");
    }

    #[test]
    fn disabled_zone_is_ignored() {
        let mut zm = ZoneManager::new();
        zm.add_zone(
            Zone::new("z1", "Off", ZoneType::Danger, vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)])
                .disabled(),
        )
        .unwrap();
        assert!(zm.check_point(50.0, 50.0, 100, 100).is_empty());
        assert!(zm.check_point(50.0, 50.0, 0, 100).is_empty());
    }

    #[test]
    fn severity_filter_keeps_presence_only() {
        let mut zm = ZoneManager::with_default_zones();
        // Foot in the water area of a 100x100 frame.
        let events = zm.check_objects(&[object(1, 50.0, 60.0), object(2, 50.0, 40.0)], 100, 100, 1.0);
        assert_eq!(events.len(), 2);
        let danger = events_at_least(&events, ZoneType::Danger);
        assert_eq!(danger.len(), 1);
        assert_eq!(danger[0].zone_id, "pool-water");
        assert_eq!(events_at_least(&events, ZoneType::Warning).len(), 2);

        let exits = zm.check_objects(&[], 100, 100, 2.0);
        assert!(events_at_least(&exits, ZoneType::Interest).is_empty());
    }
}
