//! argosd - Argos detection daemon
//!
//! This daemon:
//! 1. Loads configuration (file, environment, flags)
//! 2. Applies the configured preset to the pipeline
//! 3. Loads zones and the alert sink
//! 4. Runs the detection loop until Ctrl-C

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use argos_core::config::{ArgosConfig, SourceSettings};
use argos_core::{
    AlertNotifier, BackendFactory, DetectionLoop, Frame, FrameSource, PipelineManager,
    SyntheticSource, TrackerKind,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Argos detection daemon: multi-backend fusion, zones and alerts"
)]
struct Args {
    /// TOML (or .json) configuration file.
    #[arg(long, env = "ARGOS_CONFIG")]
    config: Option<PathBuf>,

    /// Preset to apply at startup.
    #[arg(long, env = "ARGOS_PRESET")]
    preset: Option<String>,

    /// Upper bound on processed frames per second.
    #[arg(long, env = "ARGOS_MAX_FPS", value_parser = clap::value_parser!(u32).range(1..))]
    max_fps: Option<u32>,

    /// Identity tracker: iou or passthrough.
    #[arg(long)]
    tracker: Option<TrackerKind>,

    /// Stop after this many frames.
    #[arg(long)]
    frames: Option<u64>,

    /// Print the available presets and exit.
    #[arg(long)]
    list_presets: bool,

    /// Print the pipeline status as JSON after applying the preset and exit.
    #[arg(long)]
    status: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = ArgosConfig::load_from(args.config.as_deref())?;
    if let Some(preset) = args.preset {
        cfg.pipeline.preset = preset;
    }
    if let Some(max_fps) = args.max_fps {
        cfg.pipeline.max_fps = max_fps;
    }
    if let Some(tracker) = args.tracker {
        cfg.pipeline.tracker = tracker;
    }

    let mut factory = BackendFactory::with_defaults();
    for backend_type in &cfg.pipeline.scripted_backends {
        if !factory.supports(*backend_type) {
            log::info!("{} backend served by the scripted stub", backend_type);
            factory.register_scripted(*backend_type);
        }
    }
    let mut pipeline =
        PipelineManager::new(factory).with_backend_timeout(cfg.pipeline.backend_timeout);
    for preset in &cfg.presets {
        pipeline
            .register_preset(preset.clone())
            .with_context(|| format!("register preset '{}'", preset.id))?;
    }

    if args.list_presets {
        for preset in pipeline.presets() {
            println!("{:<16} {:<16} {}", preset.id, preset.name, preset.description);
        }
        return Ok(());
    }

    pipeline.apply_preset(&cfg.pipeline.preset)?;
    if let Some(fusion) = cfg.pipeline.fusion.clone() {
        pipeline.update_fusion_config(fusion)?;
    }
    log::info!(
        "preset={} strategy={} backends={}",
        cfg.pipeline.preset,
        pipeline.fusion_config().strategy,
        pipeline.active_backends().len()
    );

    if args.status {
        println!("{}", serde_json::to_string_pretty(&pipeline.status())?);
        return Ok(());
    }

    let zones = cfg.zone_manager()?;
    log::info!(
        "{} zones loaded, tracker={}",
        zones.zones().len(),
        cfg.pipeline.tracker
    );

    let sink = AlertNotifier::default_sink(&cfg.alerts);
    let notifier = AlertNotifier::new(cfg.alerts.clone()).with_sink(sink)?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let mut source = open_source(&cfg.source, args.frames, stop.clone())?;

    let mut detection = DetectionLoop::new(
        Arc::new(Mutex::new(pipeline)),
        Arc::new(Mutex::new(zones)),
        cfg.pipeline.tracker.build(),
        notifier,
        cfg.pipeline.max_fps,
    );
    log::info!("argosd running. source {}", cfg.source.url);
    let stats = detection.run(source.as_mut(), stop);
    log::info!(
        "argosd stopped: frames={} failed={} alerts={}",
        stats.frames,
        stats.failed_frames,
        stats.alerts
    );
    Ok(())
}

fn open_source(
    settings: &SourceSettings,
    frame_limit: Option<u64>,
    stop: Arc<AtomicBool>,
) -> Result<Box<dyn FrameSource>> {
    if !settings.url.starts_with("stub://") {
        return Err(anyhow!(
            "unsupported source '{}': argosd only generates stub:// frames; \
             embed the library to push frames from a camera",
            settings.url
        ));
    }
    let source = SyntheticSource::new(settings.width, settings.height);
    Ok(match frame_limit {
        Some(limit) => Box::new(LimitedSource {
            inner: source,
            remaining: limit,
            stop,
        }),
        None => Box::new(source),
    })
}

/// Raises the stop flag once `remaining` frames have been handed out.
struct LimitedSource<S> {
    inner: S,
    remaining: u64,
    stop: Arc<AtomicBool>,
}

impl<S: FrameSource> FrameSource for LimitedSource<S> {
    fn next_frame(&mut self) -> Result<Frame> {
        if self.remaining == 0 {
            self.stop.store(true, Ordering::SeqCst);
            return Err(anyhow!("frame limit reached"));
        }
        self.remaining -= 1;
        if self.remaining == 0 {
            self.stop.store(true, Ordering::SeqCst);
        }
        self.inner.next_frame()
    }

    fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }
}
