//! Persistence for detector output.
//!
//! - `ResultWriter`: one CSV file per process run, one row per verdict
//! - `ArtifactWriter`: cropped frames saved while motion is detected
//!
//! Both name files with a `chrono` strftime pattern.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local};
use image::GrayImage;

use crate::sink::{DirectionVerdict, EventSink, FrameUpdate};

pub const RESULTS_HEADER: &str =
    "Timestamp,Location,Threshold Slider Value,Detection Tolerance Slider Value,Direction";

// ----------------------------------------------------------------------------
// Results CSV
// ----------------------------------------------------------------------------

/// Append-only verdict log.
///
/// Every row is flushed as soon as it is written so a crash loses at most
/// the verdict in flight. After `close` further records fail.
pub struct ResultWriter {
    path: PathBuf,
    timestamp_format: String,
    out: Mutex<Option<BufWriter<File>>>,
}

impl ResultWriter {
    /// Create `<dir>/<started>.csv`, formatting `started` with `timestamp_format`.
    pub fn create_in(dir: &Path, timestamp_format: &str, started: DateTime<Local>) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("create results directory {}", dir.display()))?;
        let name = format!("{}.csv", started.format(timestamp_format));
        Self::create(&dir.join(name), timestamp_format)
    }

    /// Create (or truncate) `path` and write the header.
    pub fn create(path: &Path, timestamp_format: &str) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("create results file {}", path.display()))?;
        let mut out = BufWriter::new(file);
        writeln!(out, "{}", RESULTS_HEADER)?;
        out.flush()
            .with_context(|| format!("write results header to {}", path.display()))?;
        log::info!("recording results to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            timestamp_format: timestamp_format.to_string(),
            out: Mutex::new(Some(out)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<BufWriter<File>>>> {
        self.out
            .lock()
            .map_err(|_| anyhow!("results writer lock poisoned"))
    }

    /// Append one verdict row.
    pub fn record(&self, verdict: &DirectionVerdict) -> Result<()> {
        let row = format_row(verdict, &self.timestamp_format);
        let mut guard = self.lock()?;
        let Some(out) = guard.as_mut() else {
            bail!("results file {} is closed", self.path.display());
        };
        writeln!(out, "{}", row)
            .and_then(|_| out.flush())
            .with_context(|| format!("write result to {}", self.path.display()))
    }

    /// Flush and close. Closing twice is harmless.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.lock()?;
        if let Some(mut out) = guard.take() {
            out.flush()
                .with_context(|| format!("flush results file {}", self.path.display()))?;
            log::info!("closed results file {}", self.path.display());
        }
        Ok(())
    }
}

impl EventSink for ResultWriter {
    fn on_frame(&self, _update: FrameUpdate) {}

    fn on_verdict(&self, verdict: &DirectionVerdict) -> Result<()> {
        self.record(verdict)
    }
}

fn format_row(verdict: &DirectionVerdict, timestamp_format: &str) -> String {
    format!(
        "{},{},{:.0},{:.0},{}",
        csv_field(&verdict.timestamp.format(timestamp_format).to_string()),
        csv_field(&verdict.location),
        verdict.threshold_value,
        verdict.tolerance_value,
        verdict.direction
    )
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// ----------------------------------------------------------------------------
// Image artifacts
// ----------------------------------------------------------------------------

/// Saves frames as `<dir>/<timestamp>.<extension>`.
#[derive(Clone, Debug)]
pub struct ArtifactWriter {
    dir: PathBuf,
    extension: String,
    timestamp_format: String,
}

impl ArtifactWriter {
    pub fn new(dir: &Path, extension: &str, timestamp_format: &str) -> Result<Self> {
        let extension = extension.trim_start_matches('.').to_string();
        if image::ImageFormat::from_extension(&extension).is_none() {
            bail!("unsupported image extension {:?}", extension);
        }
        fs::create_dir_all(dir)
            .with_context(|| format!("create image directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            extension,
            timestamp_format: timestamp_format.to_string(),
        })
    }

    pub fn path_for(&self, at: DateTime<Local>) -> PathBuf {
        self.dir.join(format!(
            "{}.{}",
            at.format(&self.timestamp_format),
            self.extension
        ))
    }

    pub fn save(&self, frame: &GrayImage, at: DateTime<Local>) -> Result<PathBuf> {
        let path = self.path_for(at);
        frame
            .save(&path)
            .with_context(|| format!("save image {}", path.display()))?;
        Ok(path)
    }
}
