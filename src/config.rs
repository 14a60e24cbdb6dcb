use anyhow::{anyhow, bail, Result};
use chrono::format::{Item, StrftimeItems};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::Resolution;
use crate::detect::TickParams;
use crate::frame::BoundingBox;

const DEFAULT_DEVICE: &str = "stub://yard";
const DEFAULT_FPS: u32 = 10;
const DEFAULT_CAPTURE_WIDTH: u32 = 640;
const DEFAULT_CAPTURE_HEIGHT: u32 = 480;
const DEFAULT_DISPLAY_WIDTH: u32 = 640;
const DEFAULT_DISPLAY_HEIGHT: u32 = 480;
const DEFAULT_IMAGE_DIR: &str = "images";
const DEFAULT_IMAGE_EXTENSION: &str = "png";
const DEFAULT_RESULTS_DIR: &str = "results";
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S%.3f";
const DEFAULT_THRESHOLD: f64 = 25.0;
const DEFAULT_TOLERANCE: f64 = 100_000.0;
const DEFAULT_LOCATIONS: [&str; 2] = ["LEFT", "RIGHT"];

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    camera: Option<CameraConfigFile>,
    display: Option<DisplayConfigFile>,
    images: Option<ImageConfigFile>,
    results_dir: Option<PathBuf>,
    timestamp_format: Option<String>,
    capture_duration_minutes: Option<f64>,
    audio_enabled: Option<bool>,
    detectors: Option<Vec<DetectorConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ImageConfigFile {
    dir: Option<PathBuf>,
    extension: Option<String>,
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct DetectorConfigFile {
    location: String,
    roi: Option<BoundingBox>,
    threshold: Option<f64>,
    tolerance: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub camera: CameraSettings,
    pub display: Resolution,
    pub images: ImageSettings,
    pub results_dir: PathBuf,
    pub timestamp_format: String,
    /// `None` runs until interrupted.
    pub capture_duration: Option<Duration>,
    pub audio_enabled: bool,
    pub detectors: Vec<DetectorSettings>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

impl CameraSettings {
    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageSettings {
    pub enabled: bool,
    pub dir: PathBuf,
    pub extension: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub location: String,
    pub roi: BoundingBox,
    pub threshold: f64,
    pub tolerance: f64,
}

impl DetectorSettings {
    pub fn tick_params(&self, calibrating: bool) -> TickParams {
        TickParams {
            roi: self.roi,
            threshold: self.threshold,
            tolerance: self.tolerance,
            calibrating,
        }
    }
}

impl TrackerConfig {
    /// Load from the file named by `TRAIN_TRACKER_CONFIG` (if set), then
    /// apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TRAIN_TRACKER_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, with an explicit config file instead of the env var.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TrackerConfigFile) -> Result<Self> {
        let camera = CameraSettings {
            device: file
                .camera
                .as_ref()
                .and_then(|camera| camera.device.clone())
                .unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            fps: file
                .camera
                .as_ref()
                .and_then(|camera| camera.fps)
                .unwrap_or(DEFAULT_FPS),
            width: file
                .camera
                .as_ref()
                .and_then(|camera| camera.width)
                .unwrap_or(DEFAULT_CAPTURE_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|camera| camera.height)
                .unwrap_or(DEFAULT_CAPTURE_HEIGHT),
        };
        let display = Resolution {
            width: file
                .display
                .as_ref()
                .and_then(|display| display.width)
                .unwrap_or(DEFAULT_DISPLAY_WIDTH),
            height: file
                .display
                .as_ref()
                .and_then(|display| display.height)
                .unwrap_or(DEFAULT_DISPLAY_HEIGHT),
        };
        let images = ImageSettings {
            enabled: file
                .images
                .as_ref()
                .and_then(|images| images.enabled)
                .unwrap_or(true),
            dir: file
                .images
                .as_ref()
                .and_then(|images| images.dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_DIR)),
            extension: file
                .images
                .and_then(|images| images.extension)
                .unwrap_or_else(|| DEFAULT_IMAGE_EXTENSION.to_string()),
        };
        let capture_duration = match file.capture_duration_minutes {
            Some(minutes) if !minutes.is_finite() || minutes < 0.0 => {
                bail!("capture_duration_minutes must be >= 0, got {}", minutes)
            }
            Some(minutes) if minutes > 0.0 => Some(Duration::from_secs_f64(minutes * 60.0)),
            _ => None,
        };

        let detectors = match file.detectors {
            Some(detectors) => detectors
                .into_iter()
                .map(|detector| -> Result<DetectorSettings> {
                    let roi = match detector.roi {
                        Some(roi) => roi,
                        None => BoundingBox::full_frame(camera.width, camera.height)?,
                    };
                    Ok(DetectorSettings {
                        location: detector.location,
                        roi,
                        threshold: detector.threshold.unwrap_or(DEFAULT_THRESHOLD),
                        tolerance: detector.tolerance.unwrap_or(DEFAULT_TOLERANCE),
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            None => default_detectors(camera.width, camera.height)?,
        };

        Ok(Self {
            camera,
            display,
            images,
            results_dir: file
                .results_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RESULTS_DIR)),
            timestamp_format: file
                .timestamp_format
                .unwrap_or_else(|| DEFAULT_TIMESTAMP_FORMAT.to_string()),
            capture_duration,
            audio_enabled: file.audio_enabled.unwrap_or(false),
            detectors,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("TRAIN_TRACKER_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(fps) = std::env::var("TRAIN_TRACKER_FPS") {
            self.camera.fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("TRAIN_TRACKER_FPS must be a positive integer"))?;
        }
        if let Ok(dir) = std::env::var("TRAIN_TRACKER_IMAGE_DIR") {
            if !dir.trim().is_empty() {
                self.images.dir = PathBuf::from(dir);
            }
        }
        if let Ok(dir) = std::env::var("TRAIN_TRACKER_RESULTS_DIR") {
            if !dir.trim().is_empty() {
                self.results_dir = PathBuf::from(dir);
            }
        }
        if let Ok(audio) = std::env::var("TRAIN_TRACKER_AUDIO") {
            self.audio_enabled = parse_flag(&audio)
                .ok_or_else(|| anyhow!("TRAIN_TRACKER_AUDIO must be true/false or 1/0"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.camera.fps == 0 {
            return Err(anyhow!("camera fps must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        if self.display.width == 0 || self.display.height == 0 {
            return Err(anyhow!("display resolution must be non-zero"));
        }
        if self.detectors.is_empty() {
            return Err(anyhow!("at least one detector must be configured"));
        }

        let extension = self.images.extension.trim_start_matches('.').to_lowercase();
        if image::ImageFormat::from_extension(&extension).is_none() {
            return Err(anyhow!("unsupported image extension {:?}", extension));
        }
        self.images.extension = extension;

        if StrftimeItems::new(&self.timestamp_format).any(|item| matches!(item, Item::Error)) {
            return Err(anyhow!(
                "invalid timestamp format {:?}",
                self.timestamp_format
            ));
        }

        let mut seen = HashSet::new();
        for detector in &mut self.detectors {
            detector.location = detector.location.trim().to_string();
            if detector.location.is_empty() {
                return Err(anyhow!("detector location must not be empty"));
            }
            if !seen.insert(detector.location.clone()) {
                return Err(anyhow!("duplicate detector location {}", detector.location));
            }
            detector
                .roi
                .check_within(self.camera.width, self.camera.height)
                .map_err(|e| anyhow!("detector {}: {}", detector.location, e))?;
            for (name, value) in [
                ("threshold", detector.threshold),
                ("tolerance", detector.tolerance),
            ] {
                if !value.is_finite() || value < 0.0 {
                    return Err(anyhow!(
                        "detector {}: {} must be a finite value >= 0",
                        detector.location,
                        name
                    ));
                }
            }
        }
        Ok(())
    }
}

fn default_detectors(width: u32, height: u32) -> Result<Vec<DetectorSettings>> {
    let roi = BoundingBox::full_frame(width, height)?;
    Ok(DEFAULT_LOCATIONS
        .iter()
        .map(|location| DetectorSettings {
            location: location.to_string(),
            roi,
            threshold: DEFAULT_THRESHOLD,
            tolerance: DEFAULT_TOLERANCE,
        })
        .collect())
}

fn read_config_file(path: &Path) -> Result<TrackerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
