//! Fusion engine.
//!
//! Runs every active backend on the same frame concurrently and merges their
//! outputs with the configured strategy. Each backend runs on its own worker
//! thread; the engine waits on a channel until a shared deadline. A backend
//! that errors, panics, times out, or is still busy with an earlier frame is
//! excluded from this frame only.

mod config;
pub mod strategies;

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::TryLockError;
use std::thread;
use std::time::{Duration, Instant};

use crate::detect::{DetectionResult, FusedDetectionResult, SharedBackend};
use crate::error::{ArgosError, Result};
use crate::frame::Frame;

pub use config::{ConfidenceAggregation, FusionConfig, FusionStrategy};
pub use strategies::BackendOutput;

pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(2);

pub struct FusionEngine {
    config: FusionConfig,
    backend_timeout: Duration,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn update_config(&mut self, config: FusionConfig) {
        self.config = config;
    }

    pub fn backend_timeout(&self) -> Duration {
        self.backend_timeout
    }

    pub fn set_backend_timeout(&mut self, timeout: Duration) {
        self.backend_timeout = timeout;
    }

    /// Run `backends` on `frame` and fuse what comes back.
    pub fn process(&self, frame: &Frame, backends: &[(String, SharedBackend)]) -> FusedDetectionResult {
        let start = Instant::now();
        let (outputs, failed_backends) = self.dispatch(frame, backends);
        let inference_time_ms = if outputs.is_empty() {
            0.0
        } else {
            start.elapsed().as_secs_f64() * 1000.0
        };

        let detections = strategies::fuse(&self.config, &outputs);
        FusedDetectionResult {
            detections,
            inference_time_ms,
            frame_width: frame.width,
            frame_height: frame.height,
            backends_used: outputs.iter().map(|o| o.result.backend_type).collect(),
            fusion_strategy: self.config.strategy.as_str().to_string(),
            individual_results: outputs.into_iter().map(|o| o.result).collect(),
            failed_backends,
            timestamp: frame.timestamp,
        }
    }

    /// Fan out one worker per backend and collect results in backend order.
    fn dispatch(
        &self,
        frame: &Frame,
        backends: &[(String, SharedBackend)],
    ) -> (Vec<BackendOutput>, Vec<String>) {
        let (tx, rx) = mpsc::channel();
        let mut slots: Vec<Option<Result<DetectionResult>>> = backends.iter().map(|_| None).collect();
        let mut pending = 0usize;
        let use_pose = self.config.strategy == FusionStrategy::Cascade;

        for (idx, (backend_id, backend)) in backends.iter().enumerate() {
            let pose_source = use_pose && self.is_pose_source(backend);
            let tx = tx.clone();
            let frame = frame.clone();
            let backend = backend.clone();
            let id = backend_id.clone();
            let spawned = thread::Builder::new()
                .name(format!("detect-{}", backend_id))
                .spawn(move || {
                    let outcome = run_backend(&id, &backend, &frame, pose_source);
                    // The receiver may be gone if the deadline passed.
                    let _ = tx.send((idx, outcome));
                });
            match spawned {
                Ok(_) => pending += 1,
                Err(e) => {
                    slots[idx] = Some(Err(ArgosError::backend_failure(backend_id, e)));
                }
            }
        }
        drop(tx);

        let deadline = Instant::now() + self.backend_timeout;
        while pending > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((idx, outcome)) => {
                    slots[idx] = Some(outcome);
                    pending -= 1;
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let mut outputs = Vec::with_capacity(backends.len());
        let mut failed = Vec::new();
        for ((backend_id, _), slot) in backends.iter().zip(slots) {
            match slot {
                Some(Ok(result)) => outputs.push(BackendOutput::new(backend_id, result)),
                Some(Err(err)) => {
                    log::warn!("backend {} excluded from frame: {}", backend_id, err);
                    failed.push(backend_id.clone());
                }
                None => {
                    let err = ArgosError::BackendTimeout {
                        backend_id: backend_id.clone(),
                        timeout_ms: self.backend_timeout.as_millis() as u64,
                    };
                    log::warn!("backend {} excluded from frame: {}", backend_id, err);
                    failed.push(backend_id.clone());
                }
            }
        }
        (outputs, failed)
    }

    fn is_pose_source(&self, backend: &SharedBackend) -> bool {
        match backend.try_lock() {
            Ok(guard) => self.config.is_pose_source(guard.capabilities().backend_type),
            Err(_) => false,
        }
    }
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self::new(FusionConfig::default())
    }
}

/// Run one backend. Never blocks on a backend that is still busy.
fn run_backend(
    backend_id: &str,
    backend: &SharedBackend,
    frame: &Frame,
    pose: bool,
) -> Result<DetectionResult> {
    let mut guard = match backend.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::WouldBlock) => {
            return Err(ArgosError::backend_failure(
                backend_id,
                "still busy with a previous frame",
            ))
        }
        Err(TryLockError::Poisoned(_)) => {
            return Err(ArgosError::backend_failure(backend_id, "backend lock poisoned"))
        }
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        if pose {
            guard.detect_pose(frame)
        } else {
            guard.detect(frame)
        }
    }));
    match outcome {
        Ok(result) => result,
        Err(_) => Err(ArgosError::backend_failure(backend_id, "backend panicked")),
    }
}
