use anyhow::Result;
use image::GrayImage;

use super::differencer::Differencer;
use super::moments::{analyze_moments, MotionSample};
use super::state_machine::{DetectorState, StepOutcome};
use crate::frame::{preprocess, BoundingBox, RawFrame};

/// Tunables read once per tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickParams {
    pub roi: BoundingBox,
    pub threshold: f64,
    pub tolerance: f64,
    pub calibrating: bool,
}

/// Everything one pipeline pass produced.
#[derive(Debug)]
pub struct TickReport {
    /// Cropped grayscale frame the tick worked on.
    pub current: GrayImage,
    /// Binarized difference frame.
    pub diff: GrayImage,
    pub sample: MotionSample,
    pub outcome: StepOutcome,
}

/// Preprocess → difference → moments → hysteresis, for one detector instance.
#[derive(Default)]
pub struct MotionPipeline {
    differencer: Differencer,
    state: DetectorState,
}

impl MotionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one tick. `Ok(None)` is a bootstrap tick: the baseline was (re)set
    /// and no sample was produced.
    pub fn process(&mut self, frame: &RawFrame, params: &TickParams) -> Result<Option<TickReport>> {
        let current = preprocess(frame, &params.roi)?;
        let Some(diff) = self.differencer.process(&current, params.threshold) else {
            return Ok(None);
        };
        let sample = analyze_moments(&diff);

        self.state.set_calibrating(params.calibrating);
        let outcome = self
            .state
            .step(sample.intensity_sum, sample.centroid_x, params.tolerance);

        Ok(Some(TickReport {
            current,
            diff,
            sample,
            outcome,
        }))
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }
}
