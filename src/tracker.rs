//! Identity tracker contract.
//!
//! The zone manager only needs stable identities with a reference point,
//! which is what `TrackedObject` carries. `PassthroughTracker` trusts ids a
//! backend already attached; `IouTracker` assigns them by box overlap for
//! backends that have none.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::detect::{BoundingBox, Detection, FusedDetectionResult, Keypoint};

/// A detection with a stable identity across frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub tracker_id: u64,
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub center: (f32, f32),
    /// Ground contact point; zone membership is tested against it.
    pub bottom_center: (f32, f32),
    #[serde(default)]
    pub keypoints: Vec<Keypoint>,
}

impl TrackedObject {
    pub fn from_detection(tracker_id: u64, det: &Detection) -> Self {
        Self {
            tracker_id,
            class_id: det.class_id,
            class_name: det.class_name.clone(),
            confidence: det.confidence,
            bbox: det.bbox,
            center: det.bbox.center(),
            bottom_center: det.bbox.bottom_center(),
            keypoints: det.keypoints.clone(),
        }
    }
}

pub trait Tracker: Send {
    /// Associate this frame's fused detections with identities.
    fn update(&mut self, fused: &FusedDetectionResult) -> Vec<TrackedObject>;

    /// Forget every identity, e.g. after the backend set changes.
    fn reset(&mut self);
}

/// Uses tracker ids already attached by a tracking-capable backend.
///
/// Detections without an id are dropped: zone transitions are meaningless
/// without a stable identity.
#[derive(Debug, Default)]
pub struct PassthroughTracker {
    dropped: u64,
}

impl PassthroughTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detections discarded so far for lacking an identity.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Tracker for PassthroughTracker {
    fn update(&mut self, fused: &FusedDetectionResult) -> Vec<TrackedObject> {
        let mut objects = Vec::with_capacity(fused.detections.len());
        for det in &fused.detections {
            match det.tracker_id {
                Some(id) => objects.push(TrackedObject::from_detection(id, det)),
                None => self.dropped += 1,
            }
        }
        if objects.len() < fused.detections.len() {
            log::debug!(
                "{} detections without tracker id skipped",
                fused.detections.len() - objects.len()
            );
        }
        objects
    }

    fn reset(&mut self) {
        self.dropped = 0;
    }
}

/// Tracker selection for the daemon.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerKind {
    #[default]
    Iou,
    Passthrough,
}

impl TrackerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerKind::Iou => "iou",
            TrackerKind::Passthrough => "passthrough",
        }
    }

    pub fn build(&self) -> Box<dyn Tracker> {
        match self {
            TrackerKind::Iou => Box::new(IouTracker::default()),
            TrackerKind::Passthrough => Box::new(PassthroughTracker::new()),
        }
    }
}

impl fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "iou" => Ok(TrackerKind::Iou),
            "passthrough" => Ok(TrackerKind::Passthrough),
            other => Err(format!("unknown tracker '{}'", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct IouTrackerConfig {
    /// Detections at or above this score may start a new track.
    pub track_thresh: f32,
    /// Detections below this score are ignored entirely.
    pub low_thresh: f32,
    /// Minimum IoU between a track's last box and a detection.
    pub match_iou: f32,
    /// Frames a track may go unmatched before it is dropped.
    pub track_buffer: u32,
}

impl Default for IouTrackerConfig {
    fn default() -> Self {
        Self {
            track_thresh: 0.5,
            low_thresh: 0.1,
            match_iou: 0.3,
            track_buffer: 30,
        }
    }
}

#[derive(Clone, Debug)]
struct Track {
    id: u64,
    class_id: u32,
    bbox: BoundingBox,
    missed: u32,
}

/// Two-stage IoU association in the style of ByteTrack, without motion
/// prediction.
///
/// High-score detections are matched first, then low-score detections pick
/// up tracks the first pass left over. Only unmatched high-score detections
/// open new tracks. Ids are never reused, even across `reset`.
#[derive(Debug)]
pub struct IouTracker {
    config: IouTrackerConfig,
    tracks: Vec<Track>,
    next_id: u64,
}

impl Default for IouTracker {
    fn default() -> Self {
        Self::new(IouTrackerConfig::default())
    }
}

impl IouTracker {
    pub fn new(config: IouTrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    /// Tracks currently alive, including ones missed in recent frames.
    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Greedy assignment over same-class pairs, best IoU first.
    fn associate(
        &self,
        track_idx: &[usize],
        dets: &[&Detection],
    ) -> (Vec<(usize, usize)>, Vec<usize>, Vec<usize>) {
        let mut pairs = Vec::new();
        for (ti, &t) in track_idx.iter().enumerate() {
            let track = &self.tracks[t];
            for (di, det) in dets.iter().enumerate() {
                if det.class_id != track.class_id {
                    continue;
                }
                let iou = track.bbox.iou(&det.bbox);
                if iou >= self.config.match_iou {
                    pairs.push((iou, ti, di));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut track_used = vec![false; track_idx.len()];
        let mut det_used = vec![false; dets.len()];
        let mut matches = Vec::new();
        for (_, ti, di) in pairs {
            if track_used[ti] || det_used[di] {
                continue;
            }
            track_used[ti] = true;
            det_used[di] = true;
            matches.push((track_idx[ti], di));
        }
        let unmatched_tracks = track_idx
            .iter()
            .zip(&track_used)
            .filter(|(_, used)| !**used)
            .map(|(t, _)| *t)
            .collect();
        let unmatched_dets = (0..dets.len()).filter(|di| !det_used[*di]).collect();
        (matches, unmatched_tracks, unmatched_dets)
    }
}

impl Tracker for IouTracker {
    fn update(&mut self, fused: &FusedDetectionResult) -> Vec<TrackedObject> {
        let (high, low): (Vec<&Detection>, Vec<&Detection>) = fused
            .detections
            .iter()
            .filter(|d| d.confidence >= self.config.low_thresh)
            .partition(|d| d.confidence >= self.config.track_thresh);

        let all_tracks: Vec<usize> = (0..self.tracks.len()).collect();
        let (first, remaining, unmatched_high) = self.associate(&all_tracks, &high);
        let (second, _, _) = self.associate(&remaining, &low);

        let mut seen = vec![false; self.tracks.len()];
        let mut objects = Vec::with_capacity(first.len() + second.len() + unmatched_high.len());
        for (t, det) in first
            .iter()
            .map(|&(t, di)| (t, high[di]))
            .chain(second.iter().map(|&(t, di)| (t, low[di])))
        {
            let track = &mut self.tracks[t];
            track.bbox = det.bbox;
            track.missed = 0;
            seen[t] = true;
            objects.push(TrackedObject::from_detection(track.id, det));
        }

        for track in self.tracks.iter_mut().zip(&seen).filter(|(_, s)| !**s).map(|(t, _)| t) {
            track.missed += 1;
        }
        let buffer = self.config.track_buffer;
        self.tracks.retain(|t| t.missed <= buffer);

        for di in unmatched_high {
            let det = high[di];
            let id = self.next_id;
            self.next_id += 1;
            self.tracks.push(Track {
                id,
                class_id: det.class_id,
                bbox: det.bbox,
                missed: 0,
            });
            log::debug!("new track {} ({})", id, det.class_name);
            objects.push(TrackedObject::from_detection(id, det));
        }
        objects
    }

    fn reset(&mut self) {
        self.tracks.clear();
    }
}
