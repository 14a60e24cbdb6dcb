//! Train Tracker
//!
//! Detects trains crossing a fixed camera region and classifies their
//! direction of travel (East or West) from a live frame stream.
//!
//! # Architecture
//!
//! Each tick of a detector runs the same pipeline:
//!
//! 1. **Preprocess**: grayscale, crop to the region of interest.
//! 2. **Difference**: binarized absolute difference against the previous frame.
//! 3. **Moments**: intensity sum and centroid of the difference.
//! 4. **Debounce**: a hysteresis counter decides when a motion event starts and ends.
//! 5. **Classify**: centroid x displacements collected during the event vote on direction.
//!
//! Several detectors may watch different regions of one camera; the device is
//! shared through a reference-counted handle and opened only while in use.
//!
//! # Module Structure
//!
//! - `frame`: RawFrame, BoundingBox, preprocessing
//! - `detect`: differencer, moments, state machine, direction classifier
//! - `capture`: shared device handles, detector scheduling, live tunables
//! - `ingest`: frame sources (synthetic, V4L2)
//! - `sink`: event sink interface and channel/fan-out sinks
//! - `storage`: results CSV and image artifacts
//! - `display`: motion view and ROI overlay rendering
//! - `config`: file + environment configuration

pub mod capture;
pub mod config;
pub mod detect;
pub mod display;
pub mod frame;
pub mod ingest;
pub mod sink;
pub mod storage;

pub use capture::{
    CaptureLease, DetectorParams, DeviceRegistry, MotionDetector, Resolution, Schedule,
    SharedCaptureHandle,
};
pub use config::TrackerConfig;
pub use detect::{classify_direction, DetectorState, Direction, MotionSample, TickParams};
pub use frame::{preprocess, BoundingBox, RawFrame, RegionError};
pub use ingest::{CaptureDevice, DeviceOpener, SourceOpener};
pub use sink::{ChannelSink, DirectionVerdict, EventSink, FanoutSink, FrameUpdate, SinkEvent};
pub use storage::{ArtifactWriter, ResultWriter};
