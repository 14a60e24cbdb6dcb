use std::sync::{PoisonError, RwLock};

use anyhow::{bail, Result};

use crate::detect::TickParams;
use crate::frame::{BoundingBox, Resolution};

#[derive(Clone, Copy, Debug)]
struct Bound {
    tick: TickParams,
    /// Frame size the ROI must fit: the requested resolution until a capture
    /// starts, then the size the device settled on.
    frame: Resolution,
}

/// Live tunables of one detector instance.
///
/// Setters may be called from any thread while capture runs; the capture task
/// reads one `TickParams` snapshot per tick, so the ROI corners and the
/// thresholds it works with always belong together.
#[derive(Debug)]
pub struct DetectorParams {
    inner: RwLock<Bound>,
}

impl DetectorParams {
    pub fn new(resolution: Resolution, initial: TickParams) -> Result<Self> {
        validate_values(&initial)?;
        initial
            .roi
            .check_within(resolution.width, resolution.height)?;
        Ok(Self {
            inner: RwLock::new(Bound {
                tick: initial,
                frame: resolution,
            }),
        })
    }

    fn read(&self) -> Bound {
        // A poisoned lock still holds a complete `Bound`.
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current values.
    pub fn snapshot(&self) -> TickParams {
        self.read().tick
    }

    pub fn set_threshold(&self, threshold: f64) -> Result<()> {
        self.update(|p| p.threshold = threshold)
    }

    pub fn set_tolerance(&self, tolerance: f64) -> Result<()> {
        self.update(|p| p.tolerance = tolerance)
    }

    /// Replace the region of interest. The box must fit the current frame
    /// size; a running detector re-baselines on its next tick.
    pub fn set_roi(&self, roi: BoundingBox) -> Result<()> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        roi.check_within(guard.frame.width, guard.frame.height)?;
        guard.tick.roi = roi;
        Ok(())
    }

    /// Check the current ROI against the frames a device will actually
    /// deliver and, if it fits, hold later `set_roi` calls to that size.
    pub(crate) fn bind_frame_size(&self, frame: Resolution) -> Result<()> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.tick.roi.check_within(frame.width, frame.height)?;
        guard.frame = frame;
        Ok(())
    }

    pub fn set_calibrating(&self, calibrating: bool) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.tick.calibrating = calibrating;
    }

    /// Flip calibration mode and return the new value.
    pub fn toggle_calibrating(&self) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.tick.calibrating = !guard.tick.calibrating;
        guard.tick.calibrating
    }

    /// Frame size the ROI is currently checked against.
    pub fn resolution(&self) -> Resolution {
        self.read().frame
    }

    fn update(&self, apply: impl FnOnce(&mut TickParams)) -> Result<()> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.tick;
        apply(&mut next);
        validate_values(&next)?;
        guard.tick = next;
        Ok(())
    }
}

fn validate_values(params: &TickParams) -> Result<()> {
    if !params.threshold.is_finite() || params.threshold < 0.0 {
        bail!("threshold must be a finite value >= 0, got {}", params.threshold);
    }
    if !params.tolerance.is_finite() || params.tolerance < 0.0 {
        bail!("tolerance must be a finite value >= 0, got {}", params.tolerance);
    }
    Ok(())
}
