//! train_trackerd - headless train direction tracker
//!
//! This daemon:
//! 1. Loads configuration (file named by TRAIN_TRACKER_CONFIG, env overrides)
//! 2. Starts one detector per configured location on the shared camera
//! 3. Records every direction verdict to a per-run CSV file
//! 4. Saves cropped frames while a train is in view
//! 5. Stops on Ctrl-C or when the configured capture duration elapses

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use train_tracker::{
    ArtifactWriter, DetectorParams, DeviceRegistry, DirectionVerdict, EventSink, FanoutSink,
    FrameUpdate, MotionDetector, ResultWriter, Schedule, SourceOpener, TrackerConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension). Overrides TRAIN_TRACKER_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Start every detector in calibration mode (no events, no images).
    #[arg(long)]
    calibrate: bool,
    /// Camera device id, e.g. /dev/video0 or stub://yard.
    #[arg(long)]
    device: Option<String>,
    /// Stop after this many minutes (0 runs until Ctrl-C).
    #[arg(long)]
    duration_minutes: Option<f64>,
    /// Do not save frames while motion is detected.
    #[arg(long)]
    no_images: bool,
}

/// Console side of the daemon: verdict lines on stdout, status on the log,
/// and a terminal bell while a train is detected when audio is enabled.
struct OperatorConsole {
    audio_enabled: bool,
}

impl EventSink for OperatorConsole {
    fn on_frame(&self, update: FrameUpdate) {
        if self.audio_enabled && update.train_detected {
            let mut stderr = std::io::stderr();
            let _ = stderr.write_all(b"\x07").and_then(|_| stderr.flush());
        }
    }

    fn on_verdict(&self, verdict: &DirectionVerdict) -> Result<()> {
        println!(
            "{} {} train moving {}",
            verdict.timestamp.format("%Y-%m-%d %H:%M:%S"),
            verdict.location,
            verdict.direction
        );
        Ok(())
    }

    fn on_status(&self, location: &str, message: &str) {
        log::warn!("[{}] {}", location, message);
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
    if let Some(minutes) = args.duration_minutes {
        if !minutes.is_finite() || minutes < 0.0 {
            return Err(anyhow!("--duration-minutes must be >= 0"));
        }
        cfg.capture_duration = (minutes > 0.0).then(|| Duration::from_secs_f64(minutes * 60.0));
    }

    let results = Arc::new(ResultWriter::create_in(
        &cfg.results_dir,
        &cfg.timestamp_format,
        Local::now(),
    )?);
    let artifacts = if cfg.images.enabled && !args.no_images {
        Some(ArtifactWriter::new(
            &cfg.images.dir,
            &cfg.images.extension,
            &cfg.timestamp_format,
        )?)
    } else {
        None
    };
    let sink: Arc<dyn EventSink> = Arc::new(
        FanoutSink::new()
            .with(results.clone())
            .with(Arc::new(OperatorConsole {
                audio_enabled: cfg.audio_enabled,
            })),
    );

    let resolution = cfg.camera.resolution();
    let registry = DeviceRegistry::new(Arc::new(SourceOpener), resolution);
    let schedule = Schedule::new(cfg.camera.fps, cfg.display);

    let mut detectors = Vec::with_capacity(cfg.detectors.len());
    for settings in &cfg.detectors {
        let handle = registry.handle(&cfg.camera.device)?;
        let params = DetectorParams::new(resolution, settings.tick_params(args.calibrate))?;
        detectors.push(MotionDetector::with_artifacts(
            &settings.location,
            handle,
            params,
            sink.clone(),
            schedule,
            artifacts.clone(),
        ));
    }

    for detector in &detectors {
        if let Err(err) = detector.start() {
            for started in &detectors {
                started.stop(true)?;
            }
            return Err(err.context(format!("start detector {}", detector.location())));
        }
    }
    log::info!(
        "train_trackerd running {} detector(s) on {}{}",
        detectors.len(),
        cfg.camera.device,
        if args.calibrate { " (calibrating)" } else { "" }
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("set Ctrl-C handler")?;

    match cfg.capture_duration {
        Some(duration) => {
            log::info!(
                "capturing for {:.1} minutes (Ctrl-C to stop early)",
                duration.as_secs_f64() / 60.0
            );
            if rx.recv_timeout(duration).is_err() {
                log::info!("capture duration elapsed");
            }
        }
        None => {
            log::info!("waiting for shutdown signal (Ctrl-C)...");
            let _ = rx.recv();
        }
    }

    log::info!("stopping detectors...");
    for detector in &detectors {
        detector.stop(true)?;
    }
    registry.release_all()?;
    results.close()?;
    log::info!("results written to {}", results.path().display());
    Ok(())
}
