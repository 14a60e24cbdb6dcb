//! preview - grab one frame per detector and write the ROI overlay to PNG
//!
//! Used to aim the camera and tune detector regions before a capture run.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use train_tracker::{
    DetectorParams, DeviceRegistry, DirectionVerdict, EventSink, FrameUpdate, MotionDetector,
    Schedule, SourceOpener, TrackerConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension). Overrides TRAIN_TRACKER_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Camera device id, e.g. /dev/video0 or stub://yard.
    #[arg(long)]
    device: Option<String>,
    /// Output directory for preview images.
    #[arg(long, default_value = "preview_out")]
    out: PathBuf,
}

struct Discard;

impl EventSink for Discard {
    fn on_frame(&self, _update: FrameUpdate) {}

    fn on_verdict(&self, _verdict: &DirectionVerdict) -> Result<()> {
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => TrackerConfig::load_from(Some(path))?,
        None => TrackerConfig::load()?,
    };
    if let Some(device) = args.device.clone() {
        cfg.camera.device = device;
    }
    fs::create_dir_all(&args.out)
        .with_context(|| format!("create output directory {}", args.out.display()))?;

    let resolution = cfg.camera.resolution();
    let registry = DeviceRegistry::new(Arc::new(SourceOpener), resolution);
    let schedule = Schedule::new(cfg.camera.fps, cfg.display);

    for settings in &cfg.detectors {
        let detector = MotionDetector::new(
            &settings.location,
            registry.handle(&cfg.camera.device)?,
            DetectorParams::new(resolution, settings.tick_params(true))?,
            Arc::new(Discard),
            schedule,
        );
        let image = detector.preview_once()?;
        let path = args
            .out
            .join(format!("{}.png", settings.location.to_lowercase()));
        image
            .save(&path)
            .with_context(|| format!("write preview {}", path.display()))?;
        log::info!(
            "{}: roi {} -> {}",
            settings.location,
            settings.roi,
            path.display()
        );
    }
    Ok(())
}
