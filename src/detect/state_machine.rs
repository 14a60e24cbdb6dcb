use super::direction::{classify_direction, Direction};

/// Consecutive above-tolerance ticks needed before a motion event starts.
pub const HYSTERESIS_MAX: u8 = 3;

/// Result of feeding one tick into `DetectorState::step`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepOutcome {
    /// Instantaneous comparison `intensity_sum > tolerance` for this tick.
    pub detected: bool,
    /// Set on the tick where tracking began.
    pub event_started: bool,
    /// Set on the tick where a motion event ended.
    pub completed: Option<Direction>,
}

/// Hysteresis-debounced detection state for one detector instance.
///
/// Entry needs `HYSTERESIS_MAX` consecutive detections; the event ends as soon
/// as the counter falls back to zero. Centroid x samples are only held while
/// tracking and are cleared on the tick the event completes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectorState {
    hysteresis_counter: u8,
    tracking: bool,
    centroid_samples: Vec<f64>,
    calibrating: bool,
}

impl DetectorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hysteresis_counter(&self) -> u8 {
        self.hysteresis_counter
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    pub fn centroid_samples(&self) -> &[f64] {
        &self.centroid_samples
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibrating
    }

    /// While calibrating the state is frozen; comparisons are still reported.
    pub fn set_calibrating(&mut self, calibrating: bool) {
        self.calibrating = calibrating;
    }

    /// Advance one tick.
    pub fn step(&mut self, intensity_sum: f64, centroid_x: f64, tolerance: f64) -> StepOutcome {
        let detected = intensity_sum > tolerance;
        let mut outcome = StepOutcome {
            detected,
            event_started: false,
            completed: None,
        };

        if self.calibrating {
            return outcome;
        }

        if detected {
            self.hysteresis_counter = (self.hysteresis_counter + 1).min(HYSTERESIS_MAX);
            if self.hysteresis_counter == HYSTERESIS_MAX && !self.tracking {
                self.tracking = true;
                outcome.event_started = true;
            }
        } else {
            self.hysteresis_counter = self.hysteresis_counter.saturating_sub(1);
            if self.tracking && self.hysteresis_counter == 0 {
                outcome.completed = Some(classify_direction(&self.centroid_samples));
                self.tracking = false;
                self.centroid_samples.clear();
            }
        }

        if self.tracking {
            self.centroid_samples.push(centroid_x);
        }

        outcome
    }
}
