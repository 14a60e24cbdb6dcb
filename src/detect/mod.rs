//! Motion detection and direction classification.
//!
//! Stages, in tick order:
//! - `Differencer`: binarized absolute difference against the previous frame
//! - `analyze_moments`: intensity sum and centroid of the difference frame
//! - `DetectorState`: hysteresis debounce and centroid sample accumulation
//! - `classify_direction`: majority vote over centroid displacements
//!
//! `MotionPipeline` strings them together behind the preprocessor.

mod differencer;
mod direction;
mod moments;
mod pipeline;
mod state_machine;

pub use differencer::{Differencer, MOTION_PIXEL};
pub use direction::{classify_direction, direction_votes, Direction};
pub use moments::{analyze_moments, MotionSample};
pub use pipeline::{MotionPipeline, TickParams, TickReport};
pub use state_machine::{DetectorState, StepOutcome, HYSTERESIS_MAX};
