//! Detection loop.
//!
//! Drives one frame at a time through pipeline, tracker, zones and alerts,
//! paced to `max_fps`. A failing frame is logged and skipped; the loop only
//! stops when the stop flag is raised, and it releases every backend before
//! returning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::alerts::{Alert, AlertNotifier};
use crate::detect::FusedDetectionResult;
use crate::frame::{Frame, FrameSource};
use crate::pipeline::PipelineManager;
use crate::tracker::{TrackedObject, Tracker};
use crate::zones::{ZoneEvent, ZoneManager};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// What one frame produced.
#[derive(Clone, Debug, Serialize)]
pub struct FrameReport {
    pub fused: FusedDetectionResult,
    pub objects: Vec<TrackedObject>,
    pub events: Vec<ZoneEvent>,
    pub alerts: Vec<Alert>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub frames: u64,
    pub failed_frames: u64,
    pub alerts: u64,
}

pub struct DetectionLoop {
    pipeline: Arc<Mutex<PipelineManager>>,
    zones: Arc<Mutex<ZoneManager>>,
    tracker: Box<dyn Tracker>,
    notifier: AlertNotifier,
    frame_interval: Duration,
    stats: LoopStats,
}

impl DetectionLoop {
    pub fn new(
        pipeline: Arc<Mutex<PipelineManager>>,
        zones: Arc<Mutex<ZoneManager>>,
        tracker: Box<dyn Tracker>,
        notifier: AlertNotifier,
        max_fps: u32,
    ) -> Self {
        Self {
            pipeline,
            zones,
            tracker,
            notifier,
            frame_interval: frame_interval(max_fps),
            stats: LoopStats::default(),
        }
    }

    /// Shared handle for administrative changes while the loop runs.
    pub fn pipeline(&self) -> Arc<Mutex<PipelineManager>> {
        self.pipeline.clone()
    }

    pub fn zones(&self) -> Arc<Mutex<ZoneManager>> {
        self.zones.clone()
    }

    pub fn notifier(&self) -> &AlertNotifier {
        &self.notifier
    }

    pub fn notifier_mut(&mut self) -> &mut AlertNotifier {
        &mut self.notifier
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Process a single frame end to end and queue any alerts for delivery.
    pub fn step(&mut self, frame: &Frame) -> Result<FrameReport> {
        let fused = {
            let pipeline = self
                .pipeline
                .lock()
                .map_err(|_| anyhow!("pipeline lock poisoned"))?;
            pipeline.process_frame(frame)
        };

        let objects = self.tracker.update(&fused);

        let events = {
            let mut zones = self
                .zones
                .lock()
                .map_err(|_| anyhow!("zone manager lock poisoned"))?;
            zones.check_objects(&objects, fused.frame_width, fused.frame_height, fused.timestamp)
        };

        let alerts = self.notifier.process(&events);
        if !alerts.is_empty() {
            self.notifier.dispatch(&alerts);
        }

        self.stats.frames += 1;
        self.stats.alerts += alerts.len() as u64;
        Ok(FrameReport {
            fused,
            objects,
            events,
            alerts,
        })
    }

    /// Run until `stop` is set. Returns the loop's counters.
    pub fn run(&mut self, source: &mut dyn FrameSource, stop: Arc<AtomicBool>) -> LoopStats {
        let mut last_health_log = Instant::now();
        log::info!(
            "detection loop running at up to {:.1} fps",
            1.0 / self.frame_interval.as_secs_f64()
        );

        while !stop.load(Ordering::SeqCst) {
            let started = Instant::now();

            match source.next_frame() {
                Ok(frame) => match self.step(&frame) {
                    Ok(report) => {
                        if !report.fused.failed_backends.is_empty() {
                            log::debug!(
                                "frame processed without: {}",
                                report.fused.failed_backends.join(", ")
                            );
                        }
                    }
                    Err(err) => {
                        self.stats.failed_frames += 1;
                        log::warn!("frame skipped: {}", err);
                    }
                },
                Err(err) => {
                    self.stats.failed_frames += 1;
                    log::warn!("frame source error: {}", err);
                }
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                log::info!(
                    "source healthy={} frames={} failed={} alerts={}",
                    source.is_healthy(),
                    self.stats.frames,
                    self.stats.failed_frames,
                    self.stats.alerts
                );
                last_health_log = Instant::now();
            }

            if let Some(remaining) = self.frame_interval.checked_sub(started.elapsed()) {
                std::thread::sleep(remaining);
            }
        }

        self.shutdown();
        self.stats
    }

    /// Release backends and drain alert delivery.
    pub fn shutdown(&mut self) {
        log::info!("detection loop stopping");
        match self.pipeline.lock() {
            Ok(mut pipeline) => pipeline.shutdown(),
            Err(poisoned) => poisoned.into_inner().shutdown(),
        }
        self.tracker.reset();
        self.notifier.shutdown();
    }
}

fn frame_interval(max_fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / max_fps.max(1) as f64)
}
